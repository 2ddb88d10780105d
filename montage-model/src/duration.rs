//! Sign-semantic durations.
//!
//! Stored durations are signed millisecond counts. A non-negative value is an
//! exact, author-asserted duration. A negative value is a step-count sentinel:
//! `-3` means "three discrete display steps with no intrinsic timing".

use serde::{Deserialize, Serialize};

/// A duration as it is stored on formats and sequence members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclaredDuration(pub i64);

/// How a [`DeclaredDuration`] should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationHint {
    /// A literal millisecond count.
    Exact(u64),
    /// A number of discrete steps; the caller decides how long a step is.
    Steps(u64),
}

impl DeclaredDuration {
    pub fn exact_ms(ms: u64) -> Self {
        DeclaredDuration(i64::try_from(ms).unwrap_or(i64::MAX))
    }

    pub fn steps(count: u64) -> Self {
        DeclaredDuration(-i64::try_from(count).unwrap_or(i64::MAX))
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn hint(self) -> DurationHint {
        if self.0 < 0 {
            DurationHint::Steps(self.0.unsigned_abs())
        } else {
            DurationHint::Exact(self.0 as u64)
        }
    }

    pub fn is_step_sentinel(self) -> bool {
        self.0 < 0
    }
}

impl From<i64> for DeclaredDuration {
    fn from(raw: i64) -> Self {
        DeclaredDuration(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_values_are_step_sentinels() {
        assert_eq!(DeclaredDuration(-1).hint(), DurationHint::Steps(1));
        assert_eq!(DeclaredDuration(-4).hint(), DurationHint::Steps(4));
        assert!(DeclaredDuration(-4).is_step_sentinel());
    }

    #[test]
    fn non_negative_values_are_literal() {
        assert_eq!(DeclaredDuration(5000).hint(), DurationHint::Exact(5000));
        assert_eq!(DeclaredDuration(0).hint(), DurationHint::Exact(0));
    }

    #[test]
    fn constructors_pick_the_right_sign() {
        assert_eq!(DeclaredDuration::steps(3).raw(), -3);
        assert_eq!(DeclaredDuration::exact_ms(1200).raw(), 1200);
        assert_eq!(DeclaredDuration(i64::MIN).hint(), DurationHint::Steps(1 << 63));
    }
}
