//! Interval policies: the feedback laws that turn an urgency signal into a
//! reminder interval.
//!
//! Two laws are supported and each timer uses exactly one of them:
//!
//! - **Level**: linear interpolation between a calm `base` interval and an
//!   urgent `limit` interval, driven by a continuous level in `0..=level_max`.
//! - **Ignored count**: the interval shrinks by `step` minutes for every
//!   reminder that was ignored, never going below `limit`.
//!
//! Both are monotone: more urgency never lengthens the interval. Results are
//! never below one minute.

use serde::{Deserialize, Serialize};

/// Map a continuous level to an interval in minutes.
///
/// `interval = base - (base - limit) * clamp(level, 0, level_max) / level_max`,
/// truncated to whole minutes and clamped to `[limit, base]`.
///
/// A `limit` above `base` is treated as `base`, so the result is always
/// non-increasing in `level`. A non-finite level counts as zero.
pub fn compute_interval(level: f64, base: u32, limit: u32, level_max: f64) -> u32 {
    let limit = limit.min(base);
    let level = if level.is_finite() { level } else { 0.0 };

    if level <= 0.0 {
        return base.max(1);
    }
    if !(level_max > 0.0) || level >= level_max {
        return limit.max(1);
    }

    let range = (base - limit) as f64;
    let interval = base as f64 - range * (level / level_max);
    let minutes = interval.floor().clamp(limit as f64, base as f64) as u32;
    minutes.max(1)
}

/// Interval for conditions measured by how many reminders were ignored.
///
/// `interval = max(limit, base - step * ignored_count)`.
pub fn ignored_count_interval(ignored_count: u32, base: u32, limit: u32, step: u32) -> u32 {
    let limit = limit.min(base);
    base.saturating_sub(step.saturating_mul(ignored_count))
        .max(limit)
        .max(1)
}

/// Feedback input for a policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feedback {
    /// Continuous urgency level.
    Level(f64),
    /// Number of reminders fired since the condition was last resolved.
    Ignored(u32),
}

/// The single feedback law a timer follows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntervalPolicy {
    Level { base: u32, limit: u32, level_max: f64 },
    IgnoredCount { base: u32, limit: u32, step: u32 },
    Fixed { minutes: u32 },
}

impl IntervalPolicy {
    /// Interval used when there is no urgency at all.
    pub fn base(&self) -> u32 {
        match *self {
            IntervalPolicy::Level { base, .. } => base.max(1),
            IntervalPolicy::IgnoredCount { base, .. } => base.max(1),
            IntervalPolicy::Fixed { minutes } => minutes.max(1),
        }
    }

    /// Shortest interval the policy can produce.
    pub fn limit(&self) -> u32 {
        match *self {
            IntervalPolicy::Level { base, limit, .. }
            | IntervalPolicy::IgnoredCount { base, limit, .. } => limit.min(base).max(1),
            IntervalPolicy::Fixed { minutes } => minutes.max(1),
        }
    }

    /// Compute the interval for a feedback value.
    ///
    /// Feedback of the wrong kind for the policy yields the base interval.
    pub fn interval(&self, feedback: Feedback) -> u32 {
        match (*self, feedback) {
            (IntervalPolicy::Level { base, limit, level_max }, Feedback::Level(level)) => {
                compute_interval(level, base, limit, level_max)
            }
            (IntervalPolicy::IgnoredCount { base, limit, step }, Feedback::Ignored(count)) => {
                ignored_count_interval(count, base, limit, step)
            }
            (IntervalPolicy::Fixed { minutes }, _) => minutes.max(1),
            (policy, other) => {
                log::debug!("policy {:?} ignores feedback {:?}", policy, other);
                policy.base()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn midpoint_level_interpolates() {
        assert_eq!(compute_interval(1.5, 45, 10, 3.0), 27);
    }

    #[test]
    fn level_endpoints_hit_base_and_limit() {
        assert_eq!(compute_interval(0.0, 45, 10, 3.0), 45);
        assert_eq!(compute_interval(3.0, 45, 10, 3.0), 10);
        assert_eq!(compute_interval(-1.0, 45, 10, 3.0), 45);
        assert_eq!(compute_interval(7.5, 45, 10, 3.0), 10);
    }

    #[test]
    fn level_truncates_to_whole_minutes() {
        // 45 - 35 * (1.0 / 3.0) = 33.33
        assert_eq!(compute_interval(1.0, 45, 10, 3.0), 33);
        // 45 - 35 * (2.0 / 3.0) = 21.67
        assert_eq!(compute_interval(2.0, 45, 10, 3.0), 21);
    }

    #[test]
    fn nan_level_is_calm() {
        assert_eq!(compute_interval(f64::NAN, 45, 10, 3.0), 45);
    }

    #[test]
    fn degenerate_level_max() {
        assert_eq!(compute_interval(0.5, 45, 10, 0.0), 10);
        assert_eq!(compute_interval(0.0, 45, 10, 0.0), 45);
    }

    #[test]
    fn ignored_count_decays_to_limit() {
        assert_eq!(ignored_count_interval(0, 10, 2, 2), 10);
        assert_eq!(ignored_count_interval(1, 10, 2, 2), 8);
        assert_eq!(ignored_count_interval(3, 10, 2, 2), 4);
        assert_eq!(ignored_count_interval(4, 10, 2, 2), 2);
        assert_eq!(ignored_count_interval(50, 10, 2, 2), 2);
        assert_eq!(ignored_count_interval(u32::MAX, 10, 2, u32::MAX), 2);
    }

    #[test]
    fn intervals_never_drop_below_one_minute() {
        assert_eq!(compute_interval(3.0, 45, 0, 3.0), 1);
        assert_eq!(ignored_count_interval(100, 10, 0, 2), 1);
    }

    #[test]
    fn policy_dispatches_matching_feedback() {
        let level = IntervalPolicy::Level { base: 45, limit: 10, level_max: 3.0 };
        assert_eq!(level.interval(Feedback::Level(1.5)), 27);
        assert_eq!(level.interval(Feedback::Ignored(3)), 45);

        let ignored = IntervalPolicy::IgnoredCount { base: 10, limit: 2, step: 2 };
        assert_eq!(ignored.interval(Feedback::Ignored(2)), 6);
        assert_eq!(ignored.interval(Feedback::Level(3.0)), 10);
        assert_eq!(ignored.limit(), 2);

        let fixed = IntervalPolicy::Fixed { minutes: 2880 };
        assert_eq!(fixed.interval(Feedback::Level(3.0)), 2880);
    }

    proptest! {
        #[test]
        fn level_policy_is_monotone(
            a in 0.0f64..4.0,
            b in 0.0f64..4.0,
            base in 1u32..240,
            limit in 1u32..240,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let at_lo = compute_interval(lo, base, limit, 3.0);
            let at_hi = compute_interval(hi, base, limit, 3.0);
            prop_assert!(at_hi <= at_lo);
            prop_assert!(at_lo <= base);
            prop_assert!(at_hi >= limit.min(base));
        }

        #[test]
        fn ignored_policy_is_monotone(
            a in 0u32..100,
            b in 0u32..100,
            base in 1u32..120,
            limit in 1u32..120,
            step in 0u32..10,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                ignored_count_interval(hi, base, limit, step)
                    <= ignored_count_interval(lo, base, limit, step)
            );
        }
    }
}
