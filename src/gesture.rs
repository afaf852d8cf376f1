//! Pointer handling for the platter.
//!
//! A press on the record opens a drag session; every move reports the
//! signed angle swept around the record's center. Release closes the session
//! and says whether the whole press was short and still enough to count as a
//! tap.

use std::time::{Duration, Instant};

use crate::{
    angular::shortest_delta,
    config::GestureConfig,
    geometry::{Disc, Point},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(Point),
    Move(Point),
    Up(Point),
}

#[derive(Debug, Clone)]
struct DragSession {
    start_timestamp: Instant,
    last_angle: f64,
    last_timestamp: Instant,
    accumulated_rotation_degrees: f64,
    velocity: f64,
    // Moves that share a timestamp are folded into the next velocity sample.
    velocity_anchor: (Instant, f64),
}

impl DragSession {
    fn new(pointer_angle: f64, now: Instant) -> Self {
        Self {
            start_timestamp: now,
            last_angle: pointer_angle,
            last_timestamp: now,
            accumulated_rotation_degrees: 0.0,
            velocity: 0.0,
            velocity_anchor: (now, 0.0),
        }
    }

    fn sample(&mut self, pointer_angle: f64, now: Instant) -> f64 {
        let delta = shortest_delta(self.last_angle, pointer_angle);
        self.last_angle = pointer_angle;
        self.accumulated_rotation_degrees += delta;

        let (anchor_at, anchor_rotation) = self.velocity_anchor;
        let dt = now.saturating_duration_since(anchor_at).as_secs_f64();
        if dt > 0.0 {
            self.velocity = (self.accumulated_rotation_degrees - anchor_rotation) / dt;
            self.velocity_anchor = (now, self.accumulated_rotation_degrees);
        }
        self.last_timestamp = now;
        delta
    }

    fn duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start_timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragEnd {
    pub rotation_degrees: f64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Release {
    pub drag: Option<DragEnd>,
    /// Set when the press qualified as a tap; holds the release position.
    pub tap: Option<Point>,
}

#[derive(Debug)]
pub struct GestureRecognizer {
    config: GestureConfig,
    disc: Disc,
    session: Option<DragSession>,
    press: Option<(Point, Instant)>,
}

impl GestureRecognizer {
    pub fn new(config: GestureConfig, disc: Disc) -> Self {
        Self {
            config,
            disc,
            session: None,
            press: None,
        }
    }

    pub fn set_config(&mut self, config: GestureConfig) {
        self.config = config;
    }

    pub fn set_disc(&mut self, disc: Disc) {
        self.disc = disc;
    }

    pub fn disc(&self) -> &Disc {
        &self.disc
    }

    pub fn is_dragging(&self) -> bool {
        self.session.is_some()
    }

    /// Returns true when the press landed on the record and a drag began.
    pub fn pointer_down(&mut self, pos: Point, now: Instant) -> bool {
        self.press = Some((pos, now));
        if self.disc.contains(pos) {
            self.session = Some(DragSession::new(self.disc.pointer_angle(pos), now));
            true
        } else {
            self.session = None;
            false
        }
    }

    /// Returns the signed degrees swept since the previous sample while a
    /// drag is active.
    pub fn pointer_move(&mut self, pos: Point, now: Instant) -> Option<f64> {
        let session = self.session.as_mut()?;
        // atan2 is meaningless right on the spindle
        if self.disc.center.distance(pos) < 1.0 {
            return Some(0.0);
        }
        Some(session.sample(self.disc.pointer_angle(pos), now))
    }

    pub fn pointer_up(&mut self, pos: Point, now: Instant) -> Release {
        let mut release = Release::default();

        if let Some((start, pressed_at)) = self.press.take() {
            let held = now.saturating_duration_since(pressed_at);
            if held < self.config.tap_max()
                && start.distance(pos) < self.config.tap_max_distance_px
            {
                release.tap = Some(pos);
            }
        }

        if let Some(mut session) = self.session.take() {
            if self.disc.center.distance(pos) >= 1.0 {
                session.sample(self.disc.pointer_angle(pos), now);
            }
            release.drag = Some(DragEnd {
                rotation_degrees: session.accumulated_rotation_degrees,
                duration: session.duration(now),
            });
        }

        release
    }

    /// Instantaneous drag speed in degrees per second; zero once the pointer
    /// has rested longer than the hold window.
    pub fn velocity(&self, now: Instant) -> f64 {
        match self.session.as_ref() {
            Some(session)
                if now.saturating_duration_since(session.last_timestamp)
                    <= self.config.velocity_hold() =>
            {
                session.velocity
            }
            _ => 0.0,
        }
    }

    /// Closes a drag whose release never arrived, keeping only the rotation
    /// already swept.
    pub fn abandon(&mut self, now: Instant) -> Option<DragEnd> {
        self.press = None;
        self.session.take().map(|session| DragEnd {
            rotation_degrees: session.accumulated_rotation_degrees,
            duration: session.duration(now),
        })
    }
}

/// Whether a finished drag should move the remote player.
pub fn has_seek_intent(drag: &DragEnd, config: &GestureConfig) -> bool {
    let rotation = drag.rotation_degrees.abs();
    rotation > config.seek_rotation_deg
        || (drag.duration > config.seek_hold() && rotation > config.seek_hold_rotation_deg)
}
