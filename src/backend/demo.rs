//! A self-contained player for running the deck without any media source,
//! and for driving the engine from tests.

use std::{
    collections::VecDeque,
    io::Cursor,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::remote::{ApiError, PlaybackApi, RawPlayback, TrackMeta};

/// Pressing "previous" this far into a track restarts it instead.
const RESTART_THRESHOLD_MS: u64 = 3_000;

#[derive(Debug, Clone, PartialEq)]
pub struct DemoTrack {
    pub id: String,
    pub meta: TrackMeta,
    pub duration_ms: u64,
    pub art_color: [u8; 3],
}

impl DemoTrack {
    pub fn new(id: &str, title: &str, artist: &str, duration: Duration) -> Self {
        Self {
            id: id.to_owned(),
            meta: TrackMeta {
                title: title.to_owned(),
                artist: artist.to_owned(),
                album: String::from("Demo Sessions"),
            },
            duration_ms: duration.as_millis() as u64,
            art_color: [200, 120, 40],
        }
    }

    pub fn with_art_color(mut self, rgb: [u8; 3]) -> Self {
        self.art_color = rgb;
        self
    }
}

#[derive(Debug)]
struct DemoState {
    tracks: Vec<DemoTrack>,
    current: usize,
    playing: bool,
    anchor_ms: u64,
    anchor_at: Instant,
    injected: VecDeque<ApiError>,
    offline: Option<ApiError>,
}

impl DemoState {
    fn position_at(&self, now: Instant) -> u64 {
        let Some(track) = self.tracks.get(self.current) else {
            return 0;
        };
        let elapsed = if self.playing {
            now.saturating_duration_since(self.anchor_at).as_millis() as u64
        } else {
            0
        };
        self.anchor_ms.saturating_add(elapsed).min(track.duration_ms)
    }

    fn rebase(&mut self, position_ms: u64, now: Instant) {
        self.anchor_ms = position_ms;
        self.anchor_at = now;
    }

    /// Rolls over to the next track once the current one has run out.
    fn settle(&mut self, now: Instant) {
        while self.playing {
            let Some(track) = self.tracks.get(self.current) else {
                return;
            };
            let elapsed = now.saturating_duration_since(self.anchor_at).as_millis() as u64;
            let reached = self.anchor_ms.saturating_add(elapsed);
            if reached < track.duration_ms {
                return;
            }
            let overshoot = reached - track.duration_ms;
            let ended_at = now
                .checked_sub(Duration::from_millis(overshoot))
                .unwrap_or(now);
            self.current = (self.current + 1) % self.tracks.len();
            self.rebase(0, ended_at);
        }
    }

    fn step(&mut self, forward: bool, now: Instant) {
        if self.tracks.is_empty() {
            return;
        }
        let len = self.tracks.len();
        self.current = if forward {
            (self.current + 1) % len
        } else {
            (self.current + len - 1) % len
        };
        self.rebase(0, now);
    }
}

/// An in-memory playlist that plays in real time. Failures can be queued up
/// to exercise the poller's backoff and staleness handling.
#[derive(Debug)]
pub struct DemoPlayer {
    state: Mutex<DemoState>,
}

impl Default for DemoPlayer {
    fn default() -> Self {
        Self::new(vec![
            DemoTrack::new("demo-1", "Groove Theory", "The Platters", Duration::from_secs(212))
                .with_art_color([214, 98, 64]),
            DemoTrack::new("demo-2", "Needle Drop", "Side B", Duration::from_secs(187))
                .with_art_color([64, 132, 214]),
            DemoTrack::new("demo-3", "Run-out Groove", "Locked Loop", Duration::from_secs(244))
                .with_art_color([92, 180, 96]),
        ])
    }
}

impl DemoPlayer {
    /// Zero-length tracks are dropped; they could never be played through.
    pub fn new(mut tracks: Vec<DemoTrack>) -> Self {
        tracks.retain(|track| {
            if track.duration_ms == 0 {
                log::warn!("Skipping demo track {:?} with no duration", track.id);
            }
            track.duration_ms > 0
        });
        Self {
            state: Mutex::new(DemoState {
                tracks,
                current: 0,
                playing: true,
                anchor_ms: 0,
                anchor_at: Instant::now(),
                injected: VecDeque::new(),
                offline: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DemoState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next snapshot request fails with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, error: ApiError) {
        self.lock().injected.push_back(error);
    }

    /// Every call fails with `error` until cleared with `None`.
    pub fn set_offline(&self, error: Option<ApiError>) {
        self.lock().offline = error;
    }

    pub fn position_ms(&self) -> u64 {
        let mut state = self.lock();
        let now = Instant::now();
        state.settle(now);
        state.position_at(now)
    }

    pub fn current_track(&self) -> Option<DemoTrack> {
        let mut state = self.lock();
        state.settle(Instant::now());
        state.tracks.get(state.current).cloned()
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn command(&self, f: impl FnOnce(&mut DemoState, Instant)) -> Result<(), ApiError> {
        let mut state = self.lock();
        if let Some(error) = state.offline.clone() {
            return Err(error);
        }
        let now = Instant::now();
        state.settle(now);
        f(&mut *state, now);
        Ok(())
    }
}

impl PlaybackApi for DemoPlayer {
    fn get_snapshot(&self) -> Result<Option<RawPlayback>, ApiError> {
        let mut state = self.lock();
        if let Some(error) = state.offline.clone() {
            return Err(error);
        }
        if let Some(error) = state.injected.pop_front() {
            return Err(error);
        }

        let now = Instant::now();
        state.settle(now);
        let position = state.position_at(now);
        Ok(state.tracks.get(state.current).map(|track| RawPlayback {
            track_id: track.id.clone(),
            meta: track.meta.clone(),
            is_playing: state.playing,
            position_ms: position as i64,
            duration_ms: track.duration_ms as i64,
        }))
    }

    fn seek(&self, position_ms: u64) -> Result<(), ApiError> {
        self.command(|state, now| {
            let duration = state
                .tracks
                .get(state.current)
                .map(|track| track.duration_ms)
                .unwrap_or(0);
            state.rebase(position_ms.min(duration), now);
        })
    }

    fn play(&self) -> Result<(), ApiError> {
        self.command(|state, now| {
            if !state.playing {
                let position = state.position_at(now);
                state.playing = true;
                state.rebase(position, now);
            }
        })
    }

    fn pause(&self) -> Result<(), ApiError> {
        self.command(|state, now| {
            if state.playing {
                let position = state.position_at(now);
                state.playing = false;
                state.rebase(position, now);
            }
        })
    }

    fn next(&self) -> Result<(), ApiError> {
        self.command(|state, now| state.step(true, now))
    }

    fn previous(&self) -> Result<(), ApiError> {
        self.command(|state, now| {
            if state.position_at(now) > RESTART_THRESHOLD_MS {
                state.rebase(0, now);
            } else {
                state.step(false, now);
            }
        })
    }

    /// A flat swatch in the track's color, encoded the way a real service
    /// would hand it over.
    fn artwork(&self) -> Result<Option<Vec<u8>>, ApiError> {
        let color = match self.current_track() {
            Some(track) => track.art_color,
            None => return Ok(None),
        };
        let swatch = image::RgbaImage::from_fn(64, 64, |x, y| {
            let shade = ((x + y) / 8) as u8;
            image::Rgba([
                color[0].saturating_sub(shade),
                color[1].saturating_sub(shade),
                color[2].saturating_sub(shade),
                255,
            ])
        });
        let mut png = Cursor::new(Vec::new());
        swatch
            .write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| ApiError::Unavailable(format!("artwork encode failed: {e}")))?;
        Ok(Some(png.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_playlist() -> DemoPlayer {
        DemoPlayer::new(vec![
            DemoTrack::new("a", "A", "Artist", Duration::from_secs(60)),
            DemoTrack::new("b", "B", "Artist", Duration::from_secs(90)),
        ])
    }

    #[test]
    fn snapshot_reports_the_current_track() {
        let player = short_playlist();
        let raw = player.get_snapshot().unwrap().unwrap();
        assert_eq!(raw.track_id, "a");
        assert_eq!(raw.duration_ms, 60_000);
        assert!(raw.is_playing);
        assert!(raw.position_ms < 1_000);
    }

    #[test]
    fn seek_and_pause_hold_position() {
        let player = short_playlist();
        player.pause().unwrap();
        player.seek(42_000).unwrap();
        assert_eq!(player.position_ms(), 42_000);
        player.seek(500_000).unwrap();
        assert_eq!(player.position_ms(), 60_000);
        assert!(!player.is_playing());
    }

    #[test]
    fn previous_restarts_then_steps_back() {
        let player = short_playlist();
        player.pause().unwrap();
        player.next().unwrap();
        player.seek(10_000).unwrap();
        player.previous().unwrap();
        assert_eq!(player.current_track().unwrap().id, "b");
        assert_eq!(player.position_ms(), 0);
        player.previous().unwrap();
        assert_eq!(player.current_track().unwrap().id, "a");
    }

    #[test]
    fn playback_rolls_into_the_next_track() {
        let player = short_playlist();
        player.seek(59_990).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let raw = player.get_snapshot().unwrap().unwrap();
        assert_eq!(raw.track_id, "b");
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let player = short_playlist();
        player.fail_next(ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        });
        player.fail_next(ApiError::Network("reset".into()));
        assert!(matches!(
            player.get_snapshot(),
            Err(ApiError::RateLimited { .. })
        ));
        assert!(matches!(player.get_snapshot(), Err(ApiError::Network(_))));
        assert!(player.get_snapshot().is_ok());
    }

    #[test]
    fn offline_player_rejects_everything() {
        let player = short_playlist();
        player.set_offline(Some(ApiError::AuthExpired));
        assert_eq!(player.get_snapshot(), Err(ApiError::AuthExpired));
        assert_eq!(player.next(), Err(ApiError::AuthExpired));
        player.set_offline(None);
        assert!(player.next().is_ok());
    }

    #[test]
    fn empty_playlist_means_nothing_playing() {
        let player = DemoPlayer::new(Vec::new());
        assert_eq!(player.get_snapshot(), Ok(None));
        assert_eq!(player.artwork(), Ok(None));
        assert!(player.next().is_ok());
    }

    #[test]
    fn zero_length_tracks_are_skipped() {
        let player = DemoPlayer::new(vec![
            DemoTrack::new("empty", "Nothing", "Artist", Duration::ZERO),
            DemoTrack::new("a", "A", "Artist", Duration::from_secs(60)),
        ]);
        let raw = player.get_snapshot().unwrap().unwrap();
        assert_eq!(raw.track_id, "a");
        player.next().unwrap();
        assert_eq!(player.current_track().unwrap().id, "a");

        let silent = DemoPlayer::new(vec![DemoTrack::new(
            "empty",
            "Nothing",
            "Artist",
            Duration::ZERO,
        )]);
        assert_eq!(silent.get_snapshot(), Ok(None));
    }

    #[test]
    fn artwork_decodes_as_an_image() {
        let player = short_playlist();
        let bytes = player.artwork().unwrap().unwrap();
        let art = crate::vinyl::decode_artwork(&bytes).unwrap();
        assert_eq!(art.size, [64, 64]);
    }
}
