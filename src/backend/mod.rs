use std::sync::Arc;

use crate::{
    config::{PlayerBackend, PlayerConfig},
    remote::PlaybackApi,
};

pub mod demo;
#[cfg(windows)]
pub mod gsmtc;

pub use demo::{DemoPlayer, DemoTrack};

pub fn connect(config: &PlayerConfig) -> Arc<dyn PlaybackApi> {
    match config.backend {
        PlayerBackend::Demo => {
            log::info!("Using the built-in demo player");
            Arc::new(DemoPlayer::default())
        }
        #[cfg(windows)]
        PlayerBackend::SystemMedia => {
            log::info!("Following the system media session");
            Arc::new(gsmtc::SystemMediaPlayer::new())
        }
        #[cfg(not(windows))]
        PlayerBackend::SystemMedia => {
            log::warn!("System media control is only available on Windows; using the demo player");
            Arc::new(DemoPlayer::default())
        }
    }
}
