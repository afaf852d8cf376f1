//! Record Deck - a spinning record that follows the player.
//!
//! ## Command line flags
//!
//! - `--windowed`: run in a window instead of fullscreen

use std::{
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use eframe::egui::{
    self, Align2, Color32, ColorImage, CornerRadius, CursorIcon, FontId, Pos2, Stroke,
    TextureHandle, TextureOptions, ViewportBuilder, ViewportCommand,
};
use record_deck::{
    audio::ScratchOutput,
    backend,
    config::{Config, ConfigWatcher},
    engine::{Deck, FrameReport, FrameSink},
    geometry::{Disc, Point, Rect},
    gesture::PointerEvent,
    panel::{PanelButton, PanelLayout},
    remote::{artwork_for_track, TrackArtwork},
    scratch::ScratchVoice,
    vinyl::{decode_artwork, render_record, RecordArtOptions, VinylCache},
};

const BACKGROUND: Color32 = Color32::from_rgb(245, 230, 200);
const PROGRESS_FILL: Color32 = Color32::from_rgb(30, 215, 96);
const PROGRESS_TRACK: Color32 = Color32::from_rgb(80, 80, 80);
const WINDOW_SIZE: f32 = 1080.0;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

struct ArtworkReady {
    track_id: Arc<str>,
    /// `None` when the player had already moved on; nothing is cached.
    record: Option<ColorImage>,
}

/// Collects what the engine wants drawn and routes scratch audio.
struct HostFrame<'a> {
    angle_degrees: f64,
    audio: &'a mut ScratchOutput,
}

impl FrameSink for HostFrame<'_> {
    fn draw_rotated(&mut self, angle_degrees: f64) {
        self.angle_degrees = angle_degrees;
    }

    fn play_sample(&mut self, voice: ScratchVoice) {
        self.audio.play(voice);
    }

    fn silence(&mut self) {
        self.audio.silence();
    }
}

struct DeckApp {
    deck: Deck,
    config: Config,
    watcher: Option<ConfigWatcher>,
    scratch_audio: ScratchOutput,
    hide_cursor: bool,
    art_options: RecordArtOptions,
    vinyl_cache: VinylCache,
    blank_record: Arc<ColorImage>,
    record_texture: Option<TextureHandle>,
    texture_track: Option<Option<Arc<str>>>,
    artwork_tx: Sender<ArtworkReady>,
    artwork_rx: Receiver<ArtworkReady>,
    artwork_inflight: Option<Arc<str>>,
    viewport: Option<Rect>,
    pointer_down: Option<Point>,
}

impl DeckApp {
    fn new(
        cc: &eframe::CreationContext<'_>,
        config: Config,
        watcher: Option<ConfigWatcher>,
        hide_cursor: bool,
    ) -> anyhow::Result<Self> {
        let api = backend::connect(&config.player);
        let viewport = to_rect(cc.egui_ctx.screen_rect());
        let deck = Deck::start(api, &config, viewport)?;
        let scratch_audio = ScratchOutput::open(&config.player.sfx_dir);
        let art_options = RecordArtOptions::from_config(&config.ui.vinyl);
        let blank_record = Arc::new(render_record(None, &art_options));
        let (artwork_tx, artwork_rx) = mpsc::channel();

        Ok(Self {
            deck,
            config,
            watcher,
            scratch_audio,
            hide_cursor,
            art_options,
            vinyl_cache: VinylCache::default(),
            blank_record,
            record_texture: None,
            texture_track: None,
            artwork_tx,
            artwork_rx,
            artwork_inflight: None,
            viewport: None,
            pointer_down: None,
        })
    }

    fn maintain_config_watcher(&mut self) {
        let Some(config) = self.watcher.as_ref().and_then(ConfigWatcher::poll) else {
            return;
        };

        if config.player != self.config.player {
            log::info!("Player backend and sample changes apply on restart");
        }
        if config.ui.vinyl != self.config.ui.vinyl {
            self.art_options = RecordArtOptions::from_config(&config.ui.vinyl);
            self.blank_record = Arc::new(render_record(None, &self.art_options));
            self.vinyl_cache.clear();
            self.texture_track = None;
            self.viewport = None;
        }
        self.deck.reconfigure(&config);
        self.config = config;
    }

    fn sync_viewport(&mut self, ctx: &egui::Context) {
        let viewport = to_rect(ctx.screen_rect());
        if self.viewport != Some(viewport) {
            self.deck
                .engine_mut()
                .set_viewport(viewport, self.config.ui.vinyl.label_ratio());
            self.viewport = Some(viewport);
        }
    }

    fn forward_pointer_events(&mut self, ctx: &egui::Context) {
        let events = ctx.input(|i| i.events.clone());
        for event in events {
            let pointer = match event {
                egui::Event::PointerButton {
                    pos,
                    button: egui::PointerButton::Primary,
                    pressed,
                    ..
                } => {
                    let pos = to_point(pos);
                    if pressed {
                        self.pointer_down = Some(pos);
                        PointerEvent::Down(pos)
                    } else {
                        self.pointer_down = None;
                        PointerEvent::Up(pos)
                    }
                }
                egui::Event::PointerMoved(pos) if self.pointer_down.is_some() => {
                    let pos = to_point(pos);
                    self.pointer_down = Some(pos);
                    PointerEvent::Move(pos)
                }
                egui::Event::PointerGone => match self.pointer_down.take() {
                    Some(last) => PointerEvent::Up(last),
                    None => continue,
                },
                _ => continue,
            };
            self.deck.engine_mut().intake(pointer, Instant::now());
        }
    }

    fn drain_artwork(&mut self) {
        loop {
            match self.artwork_rx.try_recv() {
                Ok(ready) => {
                    if self.artwork_inflight.as_ref() == Some(&ready.track_id) {
                        self.artwork_inflight = None;
                    }
                    let Some(record) = ready.record else {
                        continue;
                    };
                    // The blank record may be standing in for this track.
                    let shown = self.texture_track.as_ref().and_then(Option::as_ref);
                    if shown == Some(&ready.track_id) {
                        self.texture_track = None;
                    }
                    self.vinyl_cache.insert(ready.track_id, record);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn request_artwork(&mut self, track_id: Arc<str>) {
        if self.artwork_inflight.as_ref() == Some(&track_id) {
            return;
        }

        let api = self.deck.api();
        let tx = self.artwork_tx.clone();
        let options = self.art_options.clone();
        let request_track = Arc::clone(&track_id);

        let spawned = thread::Builder::new()
            .name("artwork".into())
            .spawn(move || {
                let art = match artwork_for_track(api.as_ref(), &request_track) {
                    Ok(TrackArtwork::Art(bytes)) => match decode_artwork(&bytes) {
                        Ok(image) => Some(image),
                        Err(e) => {
                            log::warn!("{e:#}");
                            None
                        }
                    },
                    Ok(TrackArtwork::Missing) => None,
                    Ok(TrackArtwork::TrackChanged) => {
                        log::debug!("Track changed while fetching artwork for {request_track:?}");
                        let _ = tx.send(ArtworkReady {
                            track_id: request_track,
                            record: None,
                        });
                        return;
                    }
                    Err(e) => {
                        log::warn!("Artwork fetch failed: {e}");
                        None
                    }
                };
                let record = Some(render_record(art.as_ref(), &options));
                let _ = tx.send(ArtworkReady {
                    track_id: request_track,
                    record,
                });
            });

        match spawned {
            Ok(_) => self.artwork_inflight = Some(track_id),
            Err(e) => log::warn!("Failed to start artwork thread: {e}"),
        }
    }

    fn update_record_texture(&mut self, ctx: &egui::Context, report: &FrameReport) {
        let track = report.now_playing.as_ref().map(|np| Arc::clone(&np.track_id));
        if self.texture_track.as_ref() == Some(&track) && self.record_texture.is_some() {
            return;
        }

        let image = match &track {
            Some(id) => match self.vinyl_cache.get(id) {
                Some(image) => image,
                None => {
                    self.request_artwork(Arc::clone(id));
                    if self.texture_track.is_some() && self.record_texture.is_some() {
                        // Keep showing the previous record until the new one is ready.
                        return;
                    }
                    Arc::clone(&self.blank_record)
                }
            },
            None => Arc::clone(&self.blank_record),
        };

        let image = (*image).clone();
        match self.record_texture.as_mut() {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => {
                self.record_texture = Some(ctx.load_texture("record", image, TextureOptions::LINEAR))
            }
        }
        self.texture_track = Some(track);
    }
}

impl eframe::App for DeckApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(ViewportCommand::Close);
        }
        if self.hide_cursor {
            ctx.set_cursor_icon(CursorIcon::None);
        }

        self.maintain_config_watcher();
        self.sync_viewport(ctx);
        self.forward_pointer_events(ctx);
        self.drain_artwork();

        let mut sink = HostFrame {
            angle_degrees: 0.0,
            audio: &mut self.scratch_audio,
        };
        let report = self.deck.engine_mut().tick(Instant::now(), &mut sink);
        let angle = sink.angle_degrees;

        self.update_record_texture(ctx, &report);

        let panel_frame = egui::Frame::central_panel(&ctx.style()).fill(BACKGROUND);
        egui::CentralPanel::default()
            .frame(panel_frame)
            .show(ctx, |ui| {
                let screen = ctx.screen_rect();
                let disc = Disc::for_viewport(to_rect(screen), self.config.ui.vinyl.label_ratio());
                if let Some(texture) = &self.record_texture {
                    paint_record(ui, screen, &disc, texture, angle.to_radians() as f32);
                }
                if report.panel_visible {
                    paint_panel(ui, self.deck.engine().panel().layout(), &report);
                }
            });

        ctx.request_repaint_after(FRAME_INTERVAL);
    }
}

fn paint_record(ui: &egui::Ui, clip: egui::Rect, disc: &Disc, texture: &TextureHandle, angle: f32) {
    let half = disc.radius;
    let center = to_pos(disc.center);
    let (sin_r, cos_r) = angle.sin_cos();

    let corners = [
        (egui::vec2(-half, -half), Pos2::new(0.0, 0.0)),
        (egui::vec2(half, -half), Pos2::new(1.0, 0.0)),
        (egui::vec2(half, half), Pos2::new(1.0, 1.0)),
        (egui::vec2(-half, half), Pos2::new(0.0, 1.0)),
    ];

    let mut mesh = egui::Mesh::with_texture(texture.id());
    for (offset, uv) in corners {
        let rotated = egui::vec2(
            offset.x * cos_r - offset.y * sin_r,
            offset.x * sin_r + offset.y * cos_r,
        );
        mesh.vertices.push(egui::epaint::Vertex {
            pos: center + rotated,
            uv,
            color: Color32::WHITE,
        });
    }
    mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
    ui.painter_at(clip).add(egui::Shape::mesh(mesh));
}

fn paint_panel(ui: &egui::Ui, layout: &PanelLayout, report: &FrameReport) {
    let painter = ui.painter();
    let scale = layout.scale;

    painter.rect_filled(
        to_egui_rect(layout.strip),
        CornerRadius::same(0),
        Color32::from_black_alpha(180),
    );

    for (button, rect) in &layout.buttons {
        let rect = to_egui_rect(*rect);
        painter.circle_filled(rect.center(), rect.width() / 2.0, Color32::from_white_alpha(28));
        paint_button_icon(painter, *button, rect, report.playing);
    }

    if let Some(now_playing) = &report.now_playing {
        painter.text(
            to_pos(layout.title),
            Align2::CENTER_CENTER,
            &now_playing.meta.title,
            FontId::proportional(34.0 * scale),
            Color32::WHITE,
        );
        painter.text(
            to_pos(layout.artist),
            Align2::CENTER_CENTER,
            &now_playing.meta.artist,
            FontId::proportional(26.0 * scale),
            Color32::from_gray(200),
        );
    }

    let status = if report.auth_expired {
        Some("Player sign-in expired")
    } else if report.stale {
        Some("Reconnecting to player")
    } else {
        None
    };
    if let Some(status) = status {
        painter.text(
            Pos2::new(layout.strip.center().x, layout.strip.min.y + 22.0 * scale),
            Align2::CENTER_CENTER,
            status,
            FontId::proportional(20.0 * scale),
            Color32::from_rgb(240, 170, 60),
        );
    }

    let track = to_egui_rect(layout.progress);
    painter.rect_filled(track, CornerRadius::same(2), PROGRESS_TRACK);
    if let Some(progress) = report.progress {
        let mut filled = track;
        filled.set_width(track.width() * progress.clamp(0.0, 1.0));
        painter.rect_filled(filled, CornerRadius::same(2), PROGRESS_FILL);
    }
}

fn paint_button_icon(painter: &egui::Painter, button: PanelButton, rect: egui::Rect, playing: bool) {
    let c = rect.center();
    let s = rect.width() * 0.22;
    let triangle = |tip_x: f32, base_x: f32| {
        egui::Shape::convex_polygon(
            vec![
                Pos2::new(base_x, c.y - s),
                Pos2::new(tip_x, c.y),
                Pos2::new(base_x, c.y + s),
            ],
            Color32::WHITE,
            Stroke::NONE,
        )
    };
    let bar = |x: f32, width: f32| {
        egui::Rect::from_min_max(Pos2::new(x, c.y - s), Pos2::new(x + width, c.y + s))
    };

    match button {
        PanelButton::PlayPause if playing => {
            painter.rect_filled(bar(c.x - s * 0.8, s * 0.55), CornerRadius::same(1), Color32::WHITE);
            painter.rect_filled(bar(c.x + s * 0.25, s * 0.55), CornerRadius::same(1), Color32::WHITE);
        }
        PanelButton::PlayPause => {
            painter.add(triangle(c.x + s, c.x - s * 0.7));
        }
        PanelButton::Next => {
            painter.add(triangle(c.x + s * 0.6, c.x - s));
            painter.rect_filled(bar(c.x + s * 0.6, s * 0.3), CornerRadius::same(1), Color32::WHITE);
        }
        PanelButton::Previous => {
            painter.add(triangle(c.x - s * 0.6, c.x + s));
            painter.rect_filled(bar(c.x - s * 0.9, s * 0.3), CornerRadius::same(1), Color32::WHITE);
        }
    }
}

fn to_point(pos: Pos2) -> Point {
    Point::new(pos.x, pos.y)
}

fn to_pos(point: Point) -> Pos2 {
    Pos2::new(point.x, point.y)
}

fn to_rect(rect: egui::Rect) -> Rect {
    Rect {
        min: to_point(rect.min),
        max: to_point(rect.max),
    }
}

fn to_egui_rect(rect: Rect) -> egui::Rect {
    egui::Rect::from_min_max(to_pos(rect.min), to_pos(rect.max))
}

fn main() -> anyhow::Result<()> {
    let windowed = std::env::args().any(|arg| arg == "--windowed");

    // RUST_LOG=debug shows poll results, snaps and scratch bursts.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let (config, config_path) = match Config::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            log::warn!("{e:#}; using defaults");
            (Config::default(), None)
        }
    };
    match &config_path {
        Some(path) => log::info!("Loaded config from {}", path.display()),
        None => log::info!("No config file found, using defaults"),
    }

    let watcher = config_path
        .as_deref()
        .and_then(|path| match ConfigWatcher::watch(path) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("Config hot reload disabled: {e:#}");
                None
            }
        });

    let fullscreen = config.ui.vinyl.fullscreen && !windowed;
    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_title("Record Deck")
            .with_inner_size([WINDOW_SIZE, WINDOW_SIZE])
            .with_fullscreen(fullscreen),
        ..Default::default()
    };

    eframe::run_native(
        "Record Deck",
        native_options,
        Box::new(
            move |cc| -> Result<Box<dyn eframe::App>, Box<dyn std::error::Error + Send + Sync>> {
                let app = DeckApp::new(cc, config, watcher, fullscreen)?;
                Ok(Box::new(app))
            },
        ),
    )
    .map_err(|e| anyhow::anyhow!("Window failed: {e}"))
}
