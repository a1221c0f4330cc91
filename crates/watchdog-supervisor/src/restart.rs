//! Relaunch decisions for watched programs
//!
//! Without configuration a watched program is relaunched immediately and
//! without limit. A restart limit and an exponential delay schedule can be
//! layered on per `RestartPolicy`.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use watchdog_core::{BackoffConfig, RestartPolicy};

/// What to do about a watched program that just terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Immediate,
    Delayed(Duration),
    /// The restart limit is reached; leave the program stopped
    Exhausted,
}

/// Per-program restart bookkeeping, indexed like the registry
pub struct RestartStrategy {
    policy: RestartPolicy,
    schedules: Vec<Option<ExponentialBackoff>>,
}

impl RestartStrategy {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            schedules: Vec::new(),
        }
    }

    /// Forget all schedules and size for `programs` registry entries
    pub fn reset(&mut self, programs: usize) {
        self.schedules.clear();
        self.schedules
            .resize_with(programs, || self.policy.backoff.as_ref().map(build_backoff));
    }

    /// Decide for registry entry `index`, which has been relaunched
    /// `restarts` times so far
    pub fn decide(&mut self, index: usize, restarts: u32) -> RestartDecision {
        if self
            .policy
            .max_restarts
            .is_some_and(|limit| restarts >= limit)
        {
            return RestartDecision::Exhausted;
        }

        match self.schedules.get_mut(index).and_then(Option::as_mut) {
            Some(schedule) => match schedule.next_backoff() {
                Some(delay) => RestartDecision::Delayed(delay),
                None => RestartDecision::Exhausted,
            },
            None => RestartDecision::Immediate,
        }
    }
}

fn build_backoff(config: &BackoffConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.initial_ms))
        .with_max_interval(Duration::from_millis(config.max_ms))
        .with_multiplier(config.multiplier)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_immediate_and_unlimited() {
        let mut strategy = RestartStrategy::new(RestartPolicy::default());
        strategy.reset(1);
        for restarts in [0, 1, 100, u32::MAX - 1] {
            assert_eq!(strategy.decide(0, restarts), RestartDecision::Immediate);
        }
    }

    #[test]
    fn test_restart_limit() {
        let mut strategy = RestartStrategy::new(RestartPolicy {
            max_restarts: Some(2),
            backoff: None,
        });
        strategy.reset(1);
        assert_eq!(strategy.decide(0, 0), RestartDecision::Immediate);
        assert_eq!(strategy.decide(0, 1), RestartDecision::Immediate);
        assert_eq!(strategy.decide(0, 2), RestartDecision::Exhausted);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut strategy = RestartStrategy::new(RestartPolicy {
            max_restarts: None,
            backoff: Some(BackoffConfig {
                initial_ms: 100,
                max_ms: 300,
                multiplier: 2.0,
            }),
        });
        strategy.reset(2);

        let delays: Vec<_> = (0..4).map(|n| strategy.decide(0, n)).collect();
        assert_eq!(
            delays,
            vec![
                RestartDecision::Delayed(Duration::from_millis(100)),
                RestartDecision::Delayed(Duration::from_millis(200)),
                RestartDecision::Delayed(Duration::from_millis(300)),
                RestartDecision::Delayed(Duration::from_millis(300)),
            ]
        );

        // Schedules are per program
        assert_eq!(
            strategy.decide(1, 0),
            RestartDecision::Delayed(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut strategy = RestartStrategy::new(RestartPolicy {
            max_restarts: None,
            backoff: Some(BackoffConfig::default()),
        });
        strategy.reset(1);
        strategy.decide(0, 0);
        strategy.decide(0, 1);
        strategy.reset(1);
        assert_eq!(
            strategy.decide(0, 0),
            RestartDecision::Delayed(Duration::from_millis(500))
        );
    }
}
