//! Dead-reckoning of the platter against the remote player.
//!
//! Between polls the record turns at the nominal speed. A fresh snapshot is
//! only allowed to move the record when the drift exceeds the correction
//! threshold, or when the player is paused. While a drag owns the angle no
//! snapshot touches it.

use std::time::{Duration, Instant};

use crate::{
    angular::{normalize_degrees, rpm_to_degrees_per_second, shortest_delta, AngularModel, SpinMode},
    config::{GestureConfig, SyncConfig},
    dispatch::RemoteCommand,
    gesture::{has_seek_intent, DragEnd},
    remote::{PlaybackSnapshot, SnapshotUpdate},
};

const MAX_FRAME_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    None,
    /// Snapshot agreed with the extrapolated angle within tolerance.
    Held { drift: f64 },
    Snapped { drift: f64 },
}

#[derive(Debug, Clone, Copy)]
struct PositionAnchor {
    position_ms: u64,
    at: Instant,
}

#[derive(Debug)]
pub struct Synchronizer {
    config: SyncConfig,
    model: AngularModel,
    nominal_velocity: f64,
    snapshot: Option<PlaybackSnapshot>,
    seen_generation: u64,
    playing: bool,
    stale: bool,
    realign: bool,
    fence: Option<Instant>,
    anchor: Option<PositionAnchor>,
    drag_origin_ms: Option<u64>,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        let nominal_velocity = rpm_to_degrees_per_second(config.rpm());
        let model = AngularModel::new(config.reference_angle_deg);
        Self {
            config,
            model,
            nominal_velocity,
            snapshot: None,
            seen_generation: 0,
            playing: false,
            stale: false,
            realign: false,
            fence: None,
            anchor: None,
            drag_origin_ms: None,
        }
    }

    pub fn reconfigure(&mut self, config: SyncConfig) {
        self.nominal_velocity = rpm_to_degrees_per_second(config.rpm());
        self.config = config;
        if self.playing && !self.stale {
            self.model.set_velocity(self.nominal_velocity);
        }
        self.realign = true;
    }

    /// Degrees per second at the configured turntable speed.
    pub fn nominal_velocity(&self) -> f64 {
        self.nominal_velocity
    }

    pub fn angle_for_position(&self, position_ms: u64) -> f64 {
        let degrees_per_ms = self.nominal_velocity / 1000.0;
        normalize_degrees(self.config.reference_angle_deg + position_ms as f64 * degrees_per_ms)
    }

    /// Once per frame: advance by dead reckoning, then fold in whatever the
    /// poller published since the last frame.
    pub fn tick(
        &mut self,
        now: Instant,
        latest: Option<&SnapshotUpdate>,
        stale: bool,
    ) -> Correction {
        let dt = self
            .model
            .last_update()
            .map(|last| now.saturating_duration_since(last).min(MAX_FRAME_STEP))
            .unwrap_or(Duration::ZERO);
        self.model.mark_updated(now);
        self.model.advance(dt.as_secs_f64());

        if stale != self.stale {
            self.stale = stale;
            if stale {
                log::debug!(
                    "Spin frozen at {:.1} deg/s while the poller is stale",
                    self.model.velocity()
                );
            }
        }

        let mut fresh = false;
        if let Some(update) = latest {
            if update.generation > self.seen_generation {
                self.seen_generation = update.generation;
                if self.is_fenced(update.requested_at) {
                    log::debug!("Ignoring playback state requested before the last command");
                } else {
                    self.accept(update);
                    fresh = true;
                }
            }
        }

        if self.model.mode() == SpinMode::Manual {
            if fresh {
                self.realign = true;
            }
            return Correction::None;
        }

        if fresh || self.realign {
            self.realign = false;
            return self.reconcile(now);
        }
        Correction::None
    }

    fn is_fenced(&self, requested_at: Instant) -> bool {
        matches!(self.fence, Some(fence) if requested_at < fence)
    }

    fn accept(&mut self, update: &SnapshotUpdate) {
        match update.snapshot.as_ref() {
            Some(snapshot) => {
                if self.snapshot.as_ref().map(|s| &s.track_id) != Some(&snapshot.track_id) {
                    log::info!(
                        "Now playing: {} - {}",
                        snapshot.meta.artist,
                        snapshot.meta.title
                    );
                }
                self.playing = snapshot.is_playing;
                self.anchor = Some(PositionAnchor {
                    position_ms: snapshot.position_ms,
                    at: snapshot.fetched_at,
                });
                self.snapshot = Some(snapshot.clone());
            }
            None => {
                if self.snapshot.is_some() {
                    log::info!("Nothing playing");
                }
                self.playing = false;
                self.anchor = None;
                self.snapshot = None;
            }
        }
        self.model
            .set_velocity(if self.playing { self.nominal_velocity } else { 0.0 });
    }

    fn reconcile(&mut self, now: Instant) -> Correction {
        if self.snapshot.is_none() {
            return Correction::None;
        }
        let expected = self.angle_for_position(self.position_at(now));
        let drift = shortest_delta(self.model.angle(), expected);
        if !self.playing || drift.abs() > self.config.correction_threshold_deg() {
            if drift.abs() > f64::EPSILON {
                log::debug!("Snapping platter by {drift:.2} deg");
            }
            self.model.set_angle(expected);
            Correction::Snapped { drift }
        } else {
            Correction::Held { drift }
        }
    }

    pub fn begin_drag(&mut self, now: Instant) {
        self.drag_origin_ms = self.snapshot.as_ref().map(|_| self.position_at(now));
        self.model.set_mode(SpinMode::Manual);
    }

    pub fn manual_rotate(&mut self, delta_degrees: f64) {
        if self.model.mode() == SpinMode::Manual {
            self.model.rotate_by(delta_degrees);
        }
    }

    /// Hands the platter back to the player. Returns the seek target when the
    /// drag was meant to move playback.
    pub fn end_drag(&mut self, drag: &DragEnd, gestures: &GestureConfig, now: Instant) -> Option<u64> {
        let origin = self.drag_origin_ms.take();
        self.model.set_mode(SpinMode::Driven);
        self.model.mark_updated(now);

        let duration_ms = self.snapshot.as_ref().map(|s| s.duration_ms);
        let (Some(origin), Some(duration_ms)) = (origin, duration_ms) else {
            self.realign = true;
            return None;
        };
        if !has_seek_intent(drag, gestures) {
            self.realign = true;
            return None;
        }

        let offset = drag.rotation_degrees * self.config.ms_per_degree();
        let target = (origin as f64 + offset).round().clamp(0.0, duration_ms as f64) as u64;

        self.anchor = Some(PositionAnchor {
            position_ms: target,
            at: now,
        });
        self.model.set_angle(self.angle_for_position(target));
        self.fence = Some(now + self.config.command_settle());
        self.realign = false;
        Some(target)
    }

    /// Local side of a button press: fence off older snapshots and assume the
    /// command succeeds.
    pub fn note_command(&mut self, command: RemoteCommand, now: Instant) {
        let position = self.position_at(now);
        match command {
            RemoteCommand::Play if self.snapshot.is_some() => self.playing = true,
            RemoteCommand::Pause => self.playing = false,
            _ => {}
        }
        if let Some(anchor) = self.anchor.as_mut() {
            anchor.position_ms = position;
            anchor.at = now;
        }
        self.model
            .set_velocity(if self.playing { self.nominal_velocity } else { 0.0 });
        self.fence = Some(now + self.config.command_settle());
    }

    /// Best estimate of the remote position at `now`.
    pub fn position_at(&self, now: Instant) -> u64 {
        if let Some(origin) = self.drag_origin_ms {
            return origin;
        }
        let Some(anchor) = self.anchor else {
            return 0;
        };
        let duration = self.duration_ms().unwrap_or(u64::MAX);
        // Stale keeps extrapolating along with the platter.
        let position = if self.playing {
            let elapsed = now.saturating_duration_since(anchor.at).as_millis() as u64;
            anchor.position_ms.saturating_add(elapsed)
        } else {
            anchor.position_ms
        };
        position.min(duration)
    }

    pub fn progress(&self, now: Instant) -> Option<f32> {
        let duration = self.duration_ms()?;
        Some((self.position_at(now) as f64 / duration as f64).clamp(0.0, 1.0) as f32)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.duration_ms)
    }

    pub fn snapshot(&self) -> Option<&PlaybackSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn angle(&self) -> f64 {
        self.model.angle()
    }

    pub fn velocity(&self) -> f64 {
        self.model.velocity()
    }

    pub fn mode(&self) -> SpinMode {
        self.model.mode()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}
