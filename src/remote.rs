//! Boundary to the remote music player.
//!
//! Backends implement [`PlaybackApi`]; everything behind it (HTTP clients,
//! OS media sessions, credentials) belongs to the backend. The engine only
//! ever sees validated [`PlaybackSnapshot`]s.

use std::{sync::Arc, time::Duration, time::Instant};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("rate limited by the playback service")]
    RateLimited { retry_after: Option<Duration> },
    #[error("playback service authorization expired")]
    AuthExpired,
    #[error("network failure: {0}")]
    Network(String),
    #[error("{command} was rejected by the player")]
    Rejected { command: &'static str },
    #[error("playback service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::RateLimited { .. } => FailureKind::RateLimited,
            ApiError::AuthExpired => FailureKind::AuthExpired,
            ApiError::Network(_) | ApiError::Unavailable(_) => FailureKind::Network,
            ApiError::Rejected { .. } => FailureKind::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot: position {position_ms}ms, duration {duration_ms}ms")]
    Malformed { position_ms: i64, duration_ms: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FailureKind {
    Network = 1,
    RateLimited = 2,
    AuthExpired = 3,
    Rejected = 4,
    Malformed = 5,
}

impl FailureKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FailureKind::Network),
            2 => Some(FailureKind::RateLimited),
            3 => Some(FailureKind::AuthExpired),
            4 => Some(FailureKind::Rejected),
            5 => Some(FailureKind::Malformed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackMeta {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// Playback state as reported by a backend, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPlayback {
    pub track_id: String,
    pub meta: TrackMeta,
    pub is_playing: bool,
    pub position_ms: i64,
    pub duration_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSnapshot {
    pub track_id: Arc<str>,
    pub meta: Arc<TrackMeta>,
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub requested_at: Instant,
    pub fetched_at: Instant,
}

impl PlaybackSnapshot {
    pub fn from_raw(
        raw: RawPlayback,
        requested_at: Instant,
        fetched_at: Instant,
    ) -> Result<Self, SnapshotError> {
        let malformed = SnapshotError::Malformed {
            position_ms: raw.position_ms,
            duration_ms: raw.duration_ms,
        };
        if raw.duration_ms <= 0 || raw.position_ms < 0 || raw.position_ms > raw.duration_ms {
            return Err(malformed);
        }

        Ok(Self {
            track_id: Arc::from(raw.track_id),
            meta: Arc::new(raw.meta),
            is_playing: raw.is_playing,
            position_ms: raw.position_ms as u64,
            duration_ms: raw.duration_ms as u64,
            requested_at,
            fetched_at,
        })
    }
}

/// One published poll result. `snapshot` is `None` when the player reports
/// nothing playing.
#[derive(Clone, Debug)]
pub struct SnapshotUpdate {
    pub generation: u64,
    pub requested_at: Instant,
    pub snapshot: Option<PlaybackSnapshot>,
}

/// A remote player. Implementations are shared between the poller thread,
/// the command dispatcher and artwork loading, so calls may arrive
/// concurrently and must not assume a particular thread.
pub trait PlaybackApi: Send + Sync + 'static {
    fn get_snapshot(&self) -> Result<Option<RawPlayback>, ApiError>;
    fn seek(&self, position_ms: u64) -> Result<(), ApiError>;
    fn play(&self) -> Result<(), ApiError>;
    fn pause(&self) -> Result<(), ApiError>;
    fn next(&self) -> Result<(), ApiError>;
    fn previous(&self) -> Result<(), ApiError>;

    /// Encoded album art of the current track, if the backend has any.
    fn artwork(&self) -> Result<Option<Vec<u8>>, ApiError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackArtwork {
    Art(Vec<u8>),
    Missing,
    /// The player moved to another track around the fetch.
    TrackChanged,
}

/// Art for one particular track. [`PlaybackApi::artwork`] only answers for
/// whatever is current, so the player is checked on both sides of the fetch.
pub fn artwork_for_track(api: &dyn PlaybackApi, track_id: &str) -> Result<TrackArtwork, ApiError> {
    if !is_current(api, track_id)? {
        return Ok(TrackArtwork::TrackChanged);
    }
    let art = api.artwork()?;
    if !is_current(api, track_id)? {
        return Ok(TrackArtwork::TrackChanged);
    }
    Ok(match art {
        Some(bytes) => TrackArtwork::Art(bytes),
        None => TrackArtwork::Missing,
    })
}

fn is_current(api: &dyn PlaybackApi, track_id: &str) -> Result<bool, ApiError> {
    Ok(api
        .get_snapshot()?
        .is_some_and(|raw| raw.track_id == track_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DemoPlayer, DemoTrack};

    fn raw(position_ms: i64, duration_ms: i64) -> RawPlayback {
        RawPlayback {
            track_id: "track".to_string(),
            meta: TrackMeta::default(),
            is_playing: true,
            position_ms,
            duration_ms,
        }
    }

    #[test]
    fn rejects_out_of_range_values() {
        let now = Instant::now();
        assert!(PlaybackSnapshot::from_raw(raw(-1, 1000), now, now).is_err());
        assert!(PlaybackSnapshot::from_raw(raw(10, 0), now, now).is_err());
        assert!(PlaybackSnapshot::from_raw(raw(1001, 1000), now, now).is_err());
        assert!(PlaybackSnapshot::from_raw(raw(1000, 1000), now, now).is_ok());
    }

    /// Skips to the next track while handing over the art of the old one.
    struct SkipsDuringArtwork(DemoPlayer);

    impl PlaybackApi for SkipsDuringArtwork {
        fn get_snapshot(&self) -> Result<Option<RawPlayback>, ApiError> {
            self.0.get_snapshot()
        }
        fn seek(&self, position_ms: u64) -> Result<(), ApiError> {
            self.0.seek(position_ms)
        }
        fn play(&self) -> Result<(), ApiError> {
            self.0.play()
        }
        fn pause(&self) -> Result<(), ApiError> {
            self.0.pause()
        }
        fn next(&self) -> Result<(), ApiError> {
            self.0.next()
        }
        fn previous(&self) -> Result<(), ApiError> {
            self.0.previous()
        }
        fn artwork(&self) -> Result<Option<Vec<u8>>, ApiError> {
            let art = self.0.artwork();
            self.0.next()?;
            art
        }
    }

    fn two_tracks() -> DemoPlayer {
        DemoPlayer::new(vec![
            DemoTrack::new("a", "A", "Artist", Duration::from_secs(60)),
            DemoTrack::new("b", "B", "Artist", Duration::from_secs(60)),
        ])
    }

    #[test]
    fn artwork_is_fetched_for_the_current_track() {
        let player = two_tracks();
        assert!(matches!(
            artwork_for_track(&player, "a"),
            Ok(TrackArtwork::Art(_))
        ));
        assert_eq!(artwork_for_track(&player, "b"), Ok(TrackArtwork::TrackChanged));
    }

    #[test]
    fn artwork_is_dropped_when_the_track_changes_mid_fetch() {
        let player = SkipsDuringArtwork(two_tracks());
        assert_eq!(artwork_for_track(&player, "a"), Ok(TrackArtwork::TrackChanged));
        assert_eq!(player.0.current_track().map(|t| t.id), Some(String::from("b")));
    }

    #[test]
    fn nothing_playing_has_no_artwork_to_fetch() {
        let player = DemoPlayer::new(Vec::new());
        assert_eq!(artwork_for_track(&player, "a"), Ok(TrackArtwork::TrackChanged));
    }
}
