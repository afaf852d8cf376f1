//! A turntable that follows a remote player.
//!
//! The record on screen spins at 33⅓ RPM in step with whatever the player
//! reports, snaps back into line when it drifts, and can be grabbed: dragging
//! scratches, and a decisive turn seeks the player.

pub mod angular;
pub mod audio;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod geometry;
pub mod gesture;
pub mod panel;
pub mod poller;
pub mod remote;
pub mod scratch;
pub mod sync;
pub mod vinyl;

pub use engine::{Deck, Engine, FrameReport, FrameSink};
