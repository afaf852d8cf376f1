//! Frame-driven core of the deck.
//!
//! The host loop calls [`Engine::intake`] for every pointer event and
//! [`Engine::tick`] once per frame. Everything here runs on the host's
//! thread; the poller and command dispatcher live on their own threads and
//! only meet the engine through the snapshot cell and the command sink.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    angular::SpinMode,
    config::{Config, GestureConfig},
    dispatch::{CommandDispatcher, CommandSink, RemoteCommand},
    geometry::{Disc, Rect},
    gesture::{DragEnd, GestureRecognizer, PointerEvent},
    panel::{PanelButton, PanelLayout, PanelState},
    poller::{PollHealth, PollerHandle, SnapshotCell},
    remote::{FailureKind, PlaybackApi, TrackMeta},
    scratch::{ScratchTrigger, ScratchVoice},
    sync::{Correction, Synchronizer},
};

/// What the engine needs from the renderer and the audio output.
pub trait FrameSink {
    fn draw_rotated(&mut self, angle_degrees: f64);
    fn play_sample(&mut self, voice: ScratchVoice);
    fn silence(&mut self);
}

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub track_id: Arc<str>,
    pub meta: Arc<TrackMeta>,
}

#[derive(Debug, Clone)]
pub struct FrameReport {
    pub angle: f64,
    pub mode: SpinMode,
    pub correction: Correction,
    pub scratch: Option<ScratchVoice>,
    pub panel_visible: bool,
    pub playing: bool,
    pub stale: bool,
    pub auth_expired: bool,
    pub progress: Option<f32>,
    pub now_playing: Option<NowPlaying>,
}

pub struct Engine<C: CommandSink> {
    gesture_config: GestureConfig,
    sync: Synchronizer,
    gestures: GestureRecognizer,
    scratch: ScratchTrigger,
    panel: PanelState,
    commands: C,
    cell: Arc<SnapshotCell>,
    health: Arc<PollHealth>,
    last_tick: Option<Instant>,
}

impl<C: CommandSink> Engine<C> {
    pub fn new(
        config: &Config,
        viewport: Rect,
        cell: Arc<SnapshotCell>,
        health: Arc<PollHealth>,
        commands: C,
    ) -> Self {
        let sync = Synchronizer::new(config.sync.clone());
        let scratch = ScratchTrigger::new(config.scratch.clone(), sync.nominal_velocity());
        let disc = Disc::for_viewport(viewport, config.ui.vinyl.label_ratio());
        Self {
            gesture_config: config.gesture.clone(),
            sync,
            gestures: GestureRecognizer::new(config.gesture.clone(), disc),
            scratch,
            panel: PanelState::new(&config.panel, PanelLayout::for_viewport(viewport)),
            commands,
            cell,
            health,
            last_tick: None,
        }
    }

    /// Applies new tunables without disturbing the platter or any drag.
    pub fn reconfigure(&mut self, config: &Config) {
        self.sync.reconfigure(config.sync.clone());
        self.scratch
            .reconfigure(config.scratch.clone(), self.sync.nominal_velocity());
        self.gesture_config = config.gesture.clone();
        self.gestures.set_config(config.gesture.clone());
        self.panel.reconfigure(&config.panel);
    }

    pub fn set_viewport(&mut self, viewport: Rect, label_ratio: f32) {
        self.gestures
            .set_disc(Disc::for_viewport(viewport, label_ratio));
        self.panel.set_layout(PanelLayout::for_viewport(viewport));
    }

    pub fn intake(&mut self, event: PointerEvent, now: Instant) {
        match event {
            PointerEvent::Down(pos) => {
                // A second press means the release of the first was lost.
                if let Some(drag) = self.gestures.abandon(now) {
                    self.finish_drag(&drag, now);
                }
                self.panel.touch(now);
                if let Some(button) = self.panel.button_at(pos) {
                    self.press_button(button, now);
                    return;
                }
                if self.gestures.pointer_down(pos, now) {
                    self.sync.begin_drag(now);
                }
            }
            PointerEvent::Move(pos) => {
                if let Some(delta) = self.gestures.pointer_move(pos, now) {
                    self.panel.touch(now);
                    self.sync.manual_rotate(delta);
                }
            }
            PointerEvent::Up(pos) => {
                let release = self.gestures.pointer_up(pos, now);
                if release.drag.is_some() || release.tap.is_some() {
                    self.panel.touch(now);
                }

                if let Some(tap) = release.tap {
                    if self.gestures.disc().label_contains(tap) {
                        self.panel.toggle(now);
                    }
                }

                if let Some(drag) = release.drag {
                    self.finish_drag(&drag, now);
                }
            }
        }
    }

    fn finish_drag(&mut self, drag: &DragEnd, now: Instant) {
        if let Some(target) = self.sync.end_drag(drag, &self.gesture_config, now) {
            log::debug!(
                "Scratched {:.1} deg, seeking to {target} ms",
                drag.rotation_degrees
            );
            self.commands.send(RemoteCommand::Seek(target));
        }
    }

    fn press_button(&mut self, button: PanelButton, now: Instant) {
        let command = match button {
            PanelButton::Previous => RemoteCommand::Previous,
            PanelButton::Next => RemoteCommand::Next,
            PanelButton::PlayPause if self.sync.is_playing() => RemoteCommand::Pause,
            PanelButton::PlayPause => RemoteCommand::Play,
        };
        self.sync.note_command(command, now);
        self.commands.send(command);
    }

    pub fn tick(&mut self, now: Instant, sink: &mut dyn FrameSink) -> FrameReport {
        let dt = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);

        if self.panel.tick(now) {
            log::debug!("Controls hidden after inactivity");
        }

        let latest = self.cell.latest();
        let correction = self
            .sync
            .tick(now, latest.as_deref(), self.health.is_stale());

        let scratch = self.scratch.update(
            self.sync.mode(),
            self.gestures.velocity(now),
            dt.as_secs_f64(),
        );

        sink.draw_rotated(self.sync.angle());
        match scratch {
            Some(voice) => sink.play_sample(voice),
            None => sink.silence(),
        }

        FrameReport {
            angle: self.sync.angle(),
            mode: self.sync.mode(),
            correction,
            scratch,
            panel_visible: self.panel.is_visible(),
            playing: self.sync.is_playing(),
            stale: self.sync.is_stale(),
            auth_expired: self.health.last_failure() == Some(FailureKind::AuthExpired),
            progress: self.sync.progress(now),
            now_playing: self.sync.snapshot().map(|s| NowPlaying {
                track_id: Arc::clone(&s.track_id),
                meta: Arc::clone(&s.meta),
            }),
        }
    }

    pub fn panel(&self) -> &PanelState {
        &self.panel
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn commands(&self) -> &C {
        &self.commands
    }
}

/// An engine wired to a live player: poller and dispatcher threads plus the
/// frame-side state. Dropping it stops both threads without waiting.
pub struct Deck {
    engine: Engine<CommandDispatcher>,
    poller: PollerHandle,
    api: Arc<dyn PlaybackApi>,
}

impl Deck {
    pub fn start(api: Arc<dyn PlaybackApi>, config: &Config, viewport: Rect) -> anyhow::Result<Self> {
        let cell = Arc::new(SnapshotCell::new());
        let health = Arc::new(PollHealth::new());
        let poller = PollerHandle::spawn(
            Arc::clone(&api),
            config.poller.clone(),
            Arc::clone(&cell),
            Arc::clone(&health),
        )?;
        let dispatcher = CommandDispatcher::spawn(Arc::clone(&api), Some(poller.refresher()))?;
        let engine = Engine::new(config, viewport, cell, health, dispatcher);

        Ok(Self {
            engine,
            poller,
            api,
        })
    }

    pub fn engine(&self) -> &Engine<CommandDispatcher> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<CommandDispatcher> {
        &mut self.engine
    }

    pub fn reconfigure(&mut self, config: &Config) {
        self.engine.reconfigure(config);
        self.poller.reconfigure(config.poller.clone());
    }

    pub fn api(&self) -> Arc<dyn PlaybackApi> {
        Arc::clone(&self.api)
    }
}
