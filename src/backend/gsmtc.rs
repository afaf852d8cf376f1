//! Windows system media transport controls: whatever app currently owns the
//! media session (Spotify, a browser tab, ...) drives the deck.

use std::{cell::RefCell, future::IntoFuture};

use futures::executor::block_on;
use windows::{
    core::{Error as WinError, Result as WinResult},
    Foundation::TimeSpan,
    Media::Control::{
        GlobalSystemMediaTransportControlsSession,
        GlobalSystemMediaTransportControlsSessionManager,
        GlobalSystemMediaTransportControlsSessionMediaProperties,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus,
    },
    Storage::Streams::{
        DataReader, IRandomAccessStreamReference, IRandomAccessStreamWithContentType,
        InputStreamOptions,
    },
    Win32::{
        Foundation::RPC_E_CHANGED_MODE,
        System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED},
    },
};

use crate::remote::{ApiError, PlaybackApi, RawPlayback, TrackMeta};

const TICKS_PER_MS: i64 = 10_000;

/// Keeps COM initialized for the life of the calling thread. The poller and
/// the dispatcher each get their own.
struct ComApartment {
    owned: bool,
}

impl ComApartment {
    fn enter() -> Result<Self, ApiError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_ok() {
            Ok(Self { owned: true })
        } else if hr == RPC_E_CHANGED_MODE {
            Ok(Self { owned: false })
        } else {
            Err(ApiError::Unavailable(format!("COM init failed: {hr:?}")))
        }
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

thread_local! {
    static APARTMENT: RefCell<Option<ComApartment>> = const { RefCell::new(None) };
}

fn ensure_com() -> Result<(), ApiError> {
    APARTMENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(ComApartment::enter()?);
        }
        Ok(())
    })
}

fn unavailable(e: WinError) -> ApiError {
    ApiError::Unavailable(format!("{e:?}"))
}

fn block_on_operation<O, T>(operation: O) -> WinResult<T>
where
    O: IntoFuture<Output = WinResult<T>>,
{
    block_on(operation.into_future())
}

fn time_span_to_ms(span: TimeSpan) -> i64 {
    span.Duration / TICKS_PER_MS
}

#[derive(Debug, Default)]
pub struct SystemMediaPlayer;

impl SystemMediaPlayer {
    pub fn new() -> Self {
        Self
    }

    /// `None` when no app currently owns a media session.
    fn session(&self) -> Result<Option<GlobalSystemMediaTransportControlsSession>, ApiError> {
        ensure_com()?;
        let manager = GlobalSystemMediaTransportControlsSessionManager::RequestAsync()
            .and_then(block_on_operation)
            .map_err(unavailable)?;
        Ok(manager.GetCurrentSession().ok())
    }

    fn command<F>(&self, name: &'static str, action: F) -> Result<(), ApiError>
    where
        F: FnOnce(&GlobalSystemMediaTransportControlsSession) -> WinResult<bool>,
    {
        let session = self
            .session()?
            .ok_or_else(|| ApiError::Unavailable(String::from("no active media session")))?;
        match action(&session) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ApiError::Rejected { command: name }),
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn read_snapshot(session: &GlobalSystemMediaTransportControlsSession) -> WinResult<RawPlayback> {
    let props = block_on_operation(session.TryGetMediaPropertiesAsync()?)?;
    let status = session.GetPlaybackInfo()?.PlaybackStatus()?;

    let meta = TrackMeta {
        title: props.Title()?.to_string_lossy(),
        artist: props.Artist()?.to_string_lossy(),
        album: props.AlbumTitle()?.to_string_lossy(),
    };

    let timeline = session.GetTimelineProperties()?;
    let mut start = time_span_to_ms(timeline.StartTime()?);
    let mut end = time_span_to_ms(timeline.EndTime()?);
    if end < start {
        std::mem::swap(&mut start, &mut end);
    }
    let position = time_span_to_ms(timeline.Position()?);

    // Sessions expose no stable track id.
    let track_id = format!("{}\u{1f}{}\u{1f}{}", meta.title, meta.artist, meta.album);

    Ok(RawPlayback {
        track_id,
        meta,
        is_playing: status == GlobalSystemMediaTransportControlsSessionPlaybackStatus::Playing,
        position_ms: position - start,
        duration_ms: end - start,
    })
}

fn load_thumbnail_bytes(
    props: &GlobalSystemMediaTransportControlsSessionMediaProperties,
) -> WinResult<Option<Vec<u8>>> {
    let reference: IRandomAccessStreamReference = match props.Thumbnail() {
        Ok(reference) => reference,
        Err(_) => return Ok(None),
    };

    let stream: IRandomAccessStreamWithContentType =
        block_on_operation(reference.OpenReadAsync()?)?;
    let reader = DataReader::CreateDataReader(&stream.GetInputStreamAt(0)?)?;
    reader.SetInputStreamOptions(InputStreamOptions::Partial)?;

    const CHUNK: u32 = 64 * 1024;
    let mut buffer = Vec::new();
    loop {
        let loaded = block_on_operation(reader.LoadAsync(CHUNK)?)?;
        if loaded == 0 {
            break;
        }
        let start = buffer.len();
        buffer.resize(start + loaded as usize, 0);
        reader.ReadBytes(&mut buffer[start..])?;
        if loaded < CHUNK {
            break;
        }
    }

    Ok((!buffer.is_empty()).then_some(buffer))
}

impl PlaybackApi for SystemMediaPlayer {
    fn get_snapshot(&self) -> Result<Option<RawPlayback>, ApiError> {
        match self.session()? {
            Some(session) => read_snapshot(&session).map(Some).map_err(unavailable),
            None => Ok(None),
        }
    }

    fn seek(&self, position_ms: u64) -> Result<(), ApiError> {
        self.command("seek", |session| {
            let start = session.GetTimelineProperties()?.StartTime()?.Duration;
            let ticks = start + (position_ms as i64).saturating_mul(TICKS_PER_MS);
            block_on_operation(session.TryChangePlaybackPositionAsync(ticks)?)
        })
    }

    fn play(&self) -> Result<(), ApiError> {
        self.command("play", |session| block_on_operation(session.TryPlayAsync()?))
    }

    fn pause(&self) -> Result<(), ApiError> {
        self.command("pause", |session| block_on_operation(session.TryPauseAsync()?))
    }

    fn next(&self) -> Result<(), ApiError> {
        self.command("next", |session| block_on_operation(session.TrySkipNextAsync()?))
    }

    fn previous(&self) -> Result<(), ApiError> {
        self.command("previous", |session| {
            block_on_operation(session.TrySkipPreviousAsync()?)
        })
    }

    fn artwork(&self) -> Result<Option<Vec<u8>>, ApiError> {
        let Some(session) = self.session()? else {
            return Ok(None);
        };
        let props = session
            .TryGetMediaPropertiesAsync()
            .and_then(block_on_operation)
            .map_err(unavailable)?;
        load_thumbnail_bytes(&props).map_err(unavailable)
    }
}
