//! Volume ramp stepping.
//!
//! The actuator calls [`step`] once per tick with the real time elapsed since
//! the previous tick.  Long stalls (a throttled background tab) are clamped
//! so one late tick never jumps straight to the target.

use std::time::Duration;

use duck_proto::config::RampConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampParams {
    /// Volume units per second.  Zero or less disables ramping.
    pub rate_per_sec: f64,
    pub epsilon: f64,
    pub max_tick_delta: Duration,
}

impl From<&RampConfig> for RampParams {
    fn from(config: &RampConfig) -> Self {
        Self {
            rate_per_sec: config.rate_per_sec,
            epsilon: config.epsilon.abs(),
            max_tick_delta: config.max_tick_delta(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampStep {
    /// Write this intermediate level and keep ticking.
    Continue(f64),
    /// Close enough: commit the target and stop.
    Finish(f64),
}

pub fn step(position: f64, target: f64, elapsed: Duration, params: &RampParams) -> RampStep {
    let remaining = target - position;
    let ramping = params.rate_per_sec > 0.0;
    if remaining.abs() <= params.epsilon || !ramping {
        return RampStep::Finish(target);
    }

    let dt = elapsed.min(params.max_tick_delta).as_secs_f64();
    let max_step = params.rate_per_sec * dt;
    let next = position + remaining.clamp(-max_step, max_step);

    if (target - next).abs() <= params.epsilon {
        RampStep::Finish(target)
    } else {
        RampStep::Continue(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RampParams {
        RampParams::from(&RampConfig::default())
    }

    #[test]
    fn test_step_is_bounded_by_rate() {
        match step(1.0, 0.3, Duration::from_millis(32), &params()) {
            RampStep::Continue(next) => assert!((next - 0.904).abs() < 1e-9),
            other => panic!("unexpected step: {:?}", other),
        }
        match step(0.3, 1.0, Duration::from_millis(32), &params()) {
            RampStep::Continue(next) => assert!((next - 0.396).abs() < 1e-9),
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_late_tick_is_clamped() {
        // 2s stall still moves at most 120ms worth.
        match step(1.0, 0.0, Duration::from_secs(2), &params()) {
            RampStep::Continue(next) => assert!((next - 0.64).abs() < 1e-9),
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_snaps_within_epsilon() {
        assert_eq!(
            step(0.31, 0.3, Duration::from_millis(1), &params()),
            RampStep::Finish(0.3)
        );
        // 0.4 -> 0.304 after one tick, inside epsilon of 0.3.
        assert_eq!(
            step(0.4, 0.3, Duration::from_millis(32), &params()),
            RampStep::Finish(0.3)
        );
    }

    #[test]
    fn test_zero_rate_jumps() {
        let params = RampParams {
            rate_per_sec: 0.0,
            ..params()
        };
        assert_eq!(
            step(1.0, 0.3, Duration::from_millis(32), &params),
            RampStep::Finish(0.3)
        );
    }

    #[test]
    fn test_converges_in_bounded_ticks() {
        let params = params();
        let mut position = 1.0;
        let mut ticks = 0;
        loop {
            ticks += 1;
            match step(position, 0.3, Duration::from_millis(32), &params) {
                RampStep::Continue(next) => position = next,
                RampStep::Finish(v) => {
                    assert_eq!(v, 0.3);
                    break;
                }
            }
            assert!(ticks < 20, "ramp did not converge");
        }
        // 0.7 at 0.096 per tick, snapping inside 0.02.
        assert_eq!(ticks, 8);
    }
}
