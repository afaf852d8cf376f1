use std::time::Instant;

pub const FULL_TURN: f64 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinMode {
    /// Rotation follows the remote player.
    Driven,
    /// A drag owns the angle.
    Manual,
}

/// Angle plus velocity of the platter. Angles are degrees, clockwise in
/// screen space.
#[derive(Debug, Clone)]
pub struct AngularModel {
    angle: f64,
    velocity: f64,
    mode: SpinMode,
    last_update: Option<Instant>,
}

impl AngularModel {
    pub fn new(angle: f64) -> Self {
        Self {
            angle: normalize_degrees(angle),
            velocity: 0.0,
            mode: SpinMode::Driven,
            last_update: None,
        }
    }

    pub fn advance(&mut self, dt_seconds: f64) {
        if self.mode != SpinMode::Driven || !dt_seconds.is_finite() || dt_seconds <= 0.0 {
            return;
        }
        self.angle = normalize_degrees(self.angle + self.velocity * dt_seconds);
    }

    pub fn set_angle(&mut self, angle: f64) {
        if angle.is_finite() {
            self.angle = normalize_degrees(angle);
        }
    }

    pub fn rotate_by(&mut self, delta: f64) {
        self.set_angle(self.angle + delta);
    }

    pub fn set_velocity(&mut self, velocity: f64) {
        self.velocity = if velocity.is_finite() { velocity } else { 0.0 };
    }

    pub fn set_mode(&mut self, mode: SpinMode) {
        self.mode = mode;
    }

    pub fn mark_updated(&mut self, now: Instant) {
        self.last_update = Some(now);
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn mode(&self) -> SpinMode {
        self.mode
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }
}

impl Default for AngularModel {
    fn default() -> Self {
        Self::new(0.0)
    }
}

pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(FULL_TURN);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= FULL_TURN {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in (-180, 180].
pub fn shortest_delta(from: f64, to: f64) -> f64 {
    let delta = normalize_degrees(to - from);
    if delta > FULL_TURN / 2.0 {
        delta - FULL_TURN
    } else {
        delta
    }
}

/// Degrees swept per second at the given turntable speed.
pub fn rpm_to_degrees_per_second(rpm: f64) -> f64 {
    rpm * FULL_TURN / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn advance_respects_mode() {
        let mut model = AngularModel::new(10.0);
        model.set_velocity(200.0);
        model.advance(0.5);
        assert!((model.angle() - 110.0).abs() < 1e-9);

        model.set_mode(SpinMode::Manual);
        model.advance(1.0);
        assert!((model.angle() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn advance_ignores_negative_and_nan_steps() {
        let mut model = AngularModel::new(45.0);
        model.set_velocity(200.0);
        model.advance(-1.0);
        model.advance(f64::NAN);
        assert_eq!(model.angle(), 45.0);
    }

    #[test]
    fn set_angle_wraps_into_range() {
        let mut model = AngularModel::default();
        model.set_angle(-30.0);
        assert!((model.angle() - 330.0).abs() < 1e-9);
        model.set_angle(725.0);
        assert!((model.angle() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn shortest_delta_crosses_zero() {
        assert!((shortest_delta(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((shortest_delta(10.0, 350.0) + 20.0).abs() < 1e-9);
        assert!((shortest_delta(0.0, 180.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn standard_lp_speed() {
        let per_second = rpm_to_degrees_per_second(100.0 / 3.0);
        assert!((per_second - 200.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn normalized_angle_stays_in_range(angle in -1.0e7f64..1.0e7) {
            let wrapped = normalize_degrees(angle);
            prop_assert!((0.0..FULL_TURN).contains(&wrapped));
        }

        #[test]
        fn driven_advance_moves_by_velocity_times_dt(
            start in 0.0f64..360.0,
            dt in 0.0f64..5.0,
        ) {
            let mut model = AngularModel::new(start);
            model.set_velocity(200.0);
            model.advance(dt);
            let expected = normalize_degrees(start + 200.0 * dt);
            prop_assert!(shortest_delta(expected, model.angle()).abs() < 1e-6);
        }
    }
}
