use crate::{angular::SpinMode, config::ScratchConfig};

/// Playback parameters for the scratch sample this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScratchVoice {
    pub rate: f32,
    pub volume: f32,
    pub reverse: bool,
}

/// Maps hand speed to scratch playback. Remembers only the last voice so a
/// direction change can fade back in instead of clicking.
#[derive(Debug, Clone)]
pub struct ScratchTrigger {
    config: ScratchConfig,
    nominal_velocity: f64,
    last: Option<ScratchVoice>,
}

impl ScratchTrigger {
    pub fn new(config: ScratchConfig, nominal_velocity: f64) -> Self {
        Self {
            config,
            nominal_velocity: nominal_velocity.abs().max(1.0),
            last: None,
        }
    }

    pub fn reconfigure(&mut self, config: ScratchConfig, nominal_velocity: f64) {
        self.config = config;
        self.nominal_velocity = nominal_velocity.abs().max(1.0);
    }

    pub fn update(&mut self, mode: SpinMode, velocity: f64, dt_seconds: f64) -> Option<ScratchVoice> {
        let speed = velocity.abs();
        if mode != SpinMode::Manual
            || !velocity.is_finite()
            || speed <= self.config.min_audible_deg_per_s
        {
            self.last = None;
            return None;
        }

        let (rate_min, rate_max) = self.config.rate_bounds();
        let rate = ((speed / self.nominal_velocity) as f32).clamp(rate_min, rate_max);
        let target = (speed / self.config.full_volume_deg_per_s()).clamp(0.0, 1.0) as f32;
        let reverse = velocity < 0.0;

        let step = if self.config.ramp_ms == 0 {
            1.0
        } else {
            (dt_seconds.max(0.0) * 1000.0 / self.config.ramp_ms as f64) as f32
        };
        let start = match self.last {
            Some(prev) if prev.reverse == reverse => prev.volume,
            _ => 0.0,
        };
        let volume = target.min(start + step);

        let voice = ScratchVoice {
            rate,
            volume,
            reverse,
        };
        self.last = Some(voice);
        Some(voice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: f64 = 1.0 / 60.0;

    fn trigger() -> ScratchTrigger {
        ScratchTrigger::new(ScratchConfig::default(), 200.0)
    }

    #[test]
    fn silent_unless_dragging_fast_enough() {
        let mut scratch = trigger();
        assert_eq!(scratch.update(SpinMode::Driven, 900.0, FRAME), None);
        assert_eq!(scratch.update(SpinMode::Manual, 30.0, FRAME), None);
        assert!(scratch.update(SpinMode::Manual, 400.0, FRAME).is_some());
    }

    #[test]
    fn rate_follows_speed_within_bounds() {
        let mut scratch = trigger();
        let voice = scratch.update(SpinMode::Manual, 400.0, FRAME).unwrap();
        assert!((voice.rate - 2.0).abs() < 1e-6);
        let fast = scratch.update(SpinMode::Manual, 5000.0, FRAME).unwrap();
        assert_eq!(fast.rate, 3.0);
    }

    #[test]
    fn volume_ramps_up_and_drops_immediately() {
        let mut scratch = trigger();
        let first = scratch.update(SpinMode::Manual, 720.0, FRAME).unwrap();
        assert!(first.volume < 1.0);
        let mut volume = first.volume;
        for _ in 0..5 {
            volume = scratch.update(SpinMode::Manual, 720.0, FRAME).unwrap().volume;
        }
        assert_eq!(volume, 1.0);

        let slower = scratch.update(SpinMode::Manual, 360.0, FRAME).unwrap();
        assert!((slower.volume - 0.5).abs() < 1e-6);
    }

    #[test]
    fn direction_flip_restarts_the_ramp() {
        let mut scratch = trigger();
        let mut steady = None;
        for _ in 0..10 {
            steady = scratch.update(SpinMode::Manual, 720.0, FRAME);
        }
        assert_eq!(steady.map(|v| v.volume), Some(1.0));

        let flipped = scratch.update(SpinMode::Manual, -720.0, FRAME).unwrap();
        assert!(flipped.reverse);
        assert!(flipped.volume < 0.5);
    }
}
