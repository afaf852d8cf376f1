use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use record_deck::{
    angular::{shortest_delta, SpinMode},
    backend::{DemoPlayer, DemoTrack},
    config::{Config, PollerConfig},
    dispatch::{RecordingSink, RemoteCommand},
    engine::{Deck, Engine, FrameReport, FrameSink},
    geometry::{Point, Rect},
    gesture::PointerEvent,
    poller::{PollHealth, SnapshotCell},
    remote::{FailureKind, PlaybackApi, PlaybackSnapshot, RawPlayback, SnapshotUpdate, TrackMeta},
    scratch::ScratchVoice,
    sync::Correction,
};

const CENTER: f32 = 540.0;
const GRAB_RADIUS: f32 = 300.0;

#[derive(Default)]
struct Recorder {
    angle: f64,
    voices: Vec<ScratchVoice>,
    silences: usize,
}

impl FrameSink for Recorder {
    fn draw_rotated(&mut self, angle_degrees: f64) {
        self.angle = angle_degrees;
    }

    fn play_sample(&mut self, voice: ScratchVoice) {
        self.voices.push(voice);
    }

    fn silence(&mut self) {
        self.silences += 1;
    }
}

struct Harness {
    engine: Engine<RecordingSink>,
    cell: Arc<SnapshotCell>,
    health: Arc<PollHealth>,
    sink: Recorder,
    t0: Instant,
    generation: u64,
}

impl Harness {
    fn new() -> Self {
        let cell = Arc::new(SnapshotCell::new());
        let health = Arc::new(PollHealth::new());
        let viewport = Rect {
            min: Point::new(0.0, 0.0),
            max: Point::new(1080.0, 1080.0),
        };
        let engine = Engine::new(
            &Config::default(),
            viewport,
            Arc::clone(&cell),
            Arc::clone(&health),
            RecordingSink::default(),
        );
        Self {
            engine,
            cell,
            health,
            sink: Recorder::default(),
            t0: Instant::now(),
            generation: 0,
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn publish(&mut self, at_ms: u64, position_ms: i64, playing: bool) {
        self.generation += 1;
        let at = self.at(at_ms);
        let raw = RawPlayback {
            track_id: "track-1".into(),
            meta: TrackMeta {
                title: "Needle Drop".into(),
                artist: "Side B".into(),
                album: "Demo".into(),
            },
            is_playing: playing,
            position_ms,
            duration_ms: 200_000,
        };
        let snapshot = PlaybackSnapshot::from_raw(raw, at, at).unwrap();
        assert!(self.cell.publish(SnapshotUpdate {
            generation: self.generation,
            requested_at: at,
            snapshot: Some(snapshot),
        }));
    }

    fn tick(&mut self, ms: u64) -> FrameReport {
        let now = self.at(ms);
        self.engine.tick(now, &mut self.sink)
    }

    /// Ticks every 16 ms from `from` up to and including `to`.
    fn run(&mut self, from: u64, to: u64) -> FrameReport {
        let mut t = from;
        let mut report = self.tick(t);
        while t < to {
            t = (t + 16).min(to);
            report = self.tick(t);
        }
        report
    }

    fn pointer(&mut self, event: PointerEvent, ms: u64) {
        let now = self.at(ms);
        self.engine.intake(event, now);
    }

    /// Grabs the record at 3 o'clock and turns it `degrees` clockwise over
    /// `duration_ms`, ticking frames along the way.
    fn turn(&mut self, start_ms: u64, degrees: f64, duration_ms: u64) {
        let steps = 10;
        self.pointer(PointerEvent::Down(rim_point(0.0)), start_ms);
        for i in 1..=steps {
            let t = start_ms + duration_ms * i / steps;
            let angle = degrees * i as f64 / steps as f64;
            self.pointer(PointerEvent::Move(rim_point(angle)), t);
            self.tick(t);
        }
        let end = start_ms + duration_ms;
        self.pointer(PointerEvent::Up(rim_point(degrees)), end);
    }

    fn tap(&mut self, at: Point, ms: u64) {
        self.pointer(PointerEvent::Down(at), ms);
        self.pointer(PointerEvent::Up(at), ms + 80);
    }

    fn sent(&self) -> &[RemoteCommand] {
        &self.engine.commands().sent
    }
}

fn rim_point(degrees: f64) -> Point {
    let radians = degrees.to_radians();
    Point::new(
        CENTER + GRAB_RADIUS * radians.cos() as f32,
        CENTER + GRAB_RADIUS * radians.sin() as f32,
    )
}

fn label_point() -> Point {
    Point::new(CENTER + 40.0, CENTER)
}

#[test]
fn record_turns_with_the_player() {
    let mut h = Harness::new();
    h.publish(0, 0, true);
    let first = h.tick(0);
    assert_eq!(first.mode, SpinMode::Driven);
    assert!(first.playing);

    let report = h.run(0, 1_000);
    assert!((shortest_delta(0.0, report.angle) - 200.0).abs() < 1e-6);
    assert_eq!(h.sink.angle, report.angle);
    assert!(h.sent().is_empty());
    assert_eq!(
        report.now_playing.map(|np| np.meta.title.clone()),
        Some(String::from("Needle Drop"))
    );
}

#[test]
fn drift_beyond_threshold_snaps_to_the_player() {
    let mut h = Harness::new();
    h.publish(0, 0, true);
    h.run(0, 1_000);

    // The player is 50 ms ahead: 10 degrees.
    h.publish(1_000, 1_050, true);
    let report = h.tick(1_000);
    assert!(matches!(report.correction, Correction::Snapped { drift } if (drift - 10.0).abs() < 1e-3));
    assert!((report.angle - 210.0).abs() < 1e-6);
}

#[test]
fn decisive_turn_seeks_once() {
    let mut h = Harness::new();
    h.publish(0, 30_000, true);
    h.run(0, 1_000);

    h.turn(1_000, 15.0, 150);
    assert_eq!(h.sent().len(), 1);
    let RemoteCommand::Seek(target) = h.sent()[0] else {
        panic!("expected a seek, got {:?}", h.sent());
    };
    // 31 s into the track when grabbed, plus 15 degrees at 100 ms each.
    assert!(target.abs_diff(32_500) <= 1, "target {target}");

    let report = h.tick(1_150);
    assert_eq!(report.mode, SpinMode::Driven);
    assert!(report.progress.is_some_and(|p| (p - 32_500.0 / 200_000.0).abs() < 1e-3));
}

#[test]
fn small_nudge_scratches_without_seeking() {
    let mut h = Harness::new();
    h.publish(0, 30_000, true);
    h.run(0, 1_000);

    h.turn(1_000, 3.0, 500);
    assert!(h.sent().is_empty());

    // Back in step with the player on the next frame.
    let report = h.tick(1_516);
    let expected = (31_516.0 * 0.2_f64).rem_euclid(360.0);
    assert!(shortest_delta(report.angle, expected).abs() < 1e-3);
}

#[test]
fn second_press_closes_an_unreleased_drag() {
    let mut h = Harness::new();
    h.publish(0, 30_000, true);
    h.run(0, 1_000);

    h.pointer(PointerEvent::Down(rim_point(0.0)), 1_000);
    h.pointer(PointerEvent::Move(rim_point(3.0)), 1_050);
    assert_eq!(h.tick(1_050).mode, SpinMode::Manual);

    // The release never arrived; the next press lands off the record.
    h.pointer(PointerEvent::Down(Point::new(5.0, 5.0)), 1_100);
    let report = h.tick(1_116);
    assert_eq!(report.mode, SpinMode::Driven);
    assert!(h.sent().is_empty());
    let expected = (31_116.0 * 0.2_f64).rem_euclid(360.0);
    assert!(shortest_delta(report.angle, expected).abs() < 1e-3);

    h.publish(1_200, 31_250, true);
    assert_eq!(h.tick(1_200).mode, SpinMode::Driven);
}

#[test]
fn fast_scratch_makes_noise_and_stops_on_release() {
    let mut h = Harness::new();
    h.publish(0, 30_000, true);
    h.tick(0);

    h.turn(100, 60.0, 100);
    assert!(!h.sink.voices.is_empty());
    assert!(h.sink.voices.iter().all(|v| !v.reverse && v.volume > 0.0));

    let silences = h.sink.silences;
    let report = h.tick(216);
    assert_eq!(report.scratch, None);
    assert_eq!(h.sink.silences, silences + 1);
}

#[test]
fn label_tap_reveals_the_panel_until_idle() {
    let mut h = Harness::new();
    h.publish(0, 0, true);
    assert!(!h.tick(0).panel_visible);

    h.tap(label_point(), 100);
    assert!(h.tick(200).panel_visible);
    assert!(h.tick(5_100).panel_visible);
    assert!(!h.tick(5_300).panel_visible);
    assert!(h.sent().is_empty());
}

#[test]
fn buttons_act_only_while_the_panel_shows() {
    let mut h = Harness::new();
    h.publish(0, 10_000, true);
    h.tick(0);

    let layout = h.engine.panel().layout().clone();
    let play_pause = layout.buttons[1].1.center();
    let next = layout.buttons[2].1.center();

    h.tap(next, 100);
    assert!(h.sent().is_empty());

    h.tap(label_point(), 300);
    h.tick(400);
    h.tap(play_pause, 500);
    assert_eq!(h.sent(), [RemoteCommand::Pause]);
    let report = h.tick(600);
    assert!(!report.playing);

    h.tap(play_pause, 700);
    h.tap(next, 900);
    assert_eq!(
        h.sent(),
        [RemoteCommand::Pause, RemoteCommand::Play, RemoteCommand::Next]
    );
    assert!(h.tick(1_000).playing);
}

#[test]
fn stale_poller_keeps_spinning_then_recovers() {
    let mut h = Harness::new();
    h.publish(0, 0, true);
    h.tick(0);

    for _ in 0..3 {
        h.health.record_miss(FailureKind::Network, 3);
    }
    let report = h.tick(16);
    assert!(report.stale);
    assert!(!report.auth_expired);

    let before = report.angle;
    let report = h.run(16, 516);
    assert!((shortest_delta(before, report.angle) - 100.0).abs() < 1e-6);

    h.health.record_success();
    h.publish(600, 10_000, true);
    let report = h.tick(600);
    assert!(!report.stale);
    assert!(matches!(report.correction, Correction::Snapped { .. }));
}

#[test]
fn expired_credentials_are_reported() {
    let mut h = Harness::new();
    h.health.record_miss(FailureKind::AuthExpired, 3);
    let report = h.tick(0);
    assert!(report.auth_expired);
    assert!(!report.stale);
}

#[test]
fn demo_player_round_trip() {
    let player = Arc::new(DemoPlayer::new(vec![DemoTrack::new(
        "loop",
        "Locked Groove",
        "Demo",
        Duration::from_secs(300),
    )]));
    player.pause().unwrap();
    player.seek(60_000).unwrap();

    let config = Config {
        poller: PollerConfig {
            interval_ms: 50,
            ..PollerConfig::default()
        },
        ..Config::default()
    };
    let viewport = Rect {
        min: Point::new(0.0, 0.0),
        max: Point::new(1080.0, 1080.0),
    };
    let api: Arc<dyn PlaybackApi> = player.clone();
    let mut deck = Deck::start(api, &config, viewport).unwrap();
    let mut sink = Recorder::default();

    let deadline = Instant::now() + Duration::from_secs(5);
    let report = loop {
        let report = deck.engine_mut().tick(Instant::now(), &mut sink);
        if report.now_playing.is_some() || Instant::now() > deadline {
            break report;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    assert!(!report.playing);
    assert!(report.progress.is_some_and(|p| (p - 0.2).abs() < 1e-3));

    // A quarter turn forward: 90 degrees at 100 ms each.
    let start = Instant::now();
    let engine = deck.engine_mut();
    engine.intake(PointerEvent::Down(rim_point(0.0)), start);
    for i in 1..=9 {
        let t = start + Duration::from_millis(20 * i);
        engine.intake(PointerEvent::Move(rim_point(10.0 * i as f64)), t);
    }
    engine.intake(PointerEvent::Up(rim_point(90.0)), start + Duration::from_millis(200));

    let deadline = Instant::now() + Duration::from_secs(5);
    while player.position_ms() != 69_000 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(player.position_ms(), 69_000);
}
