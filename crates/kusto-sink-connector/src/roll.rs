//! Roll decisions for the write path.
//!
//! Size is checked synchronously after every append. Age is handled by the
//! flush timer instead, because a partition that stops receiving records must
//! still flush its partially filled batch.
//!
//! When both triggers could apply, the write path wins: a zero flush interval
//! means "no time-based deferral" and rolls on every write, otherwise the size
//! check decides. The timer only ever rolls from its own task.

use std::fmt;
use std::time::Duration;

/// Why a batch was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollTrigger {
    /// Batch reached the file threshold.
    Size,
    /// Flush interval is zero, every write rolls.
    EveryWrite,
    /// Flush timer fired.
    Timer,
    /// Writer is closing.
    Close,
}

impl RollTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollTrigger::Size => "size",
            RollTrigger::EveryWrite => "every_write",
            RollTrigger::Timer => "timer",
            RollTrigger::Close => "close",
        }
    }
}

impl fmt::Display for RollTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size-threshold policy: roll once the batch holds at least `file_threshold` bytes.
pub fn should_roll(current_size: u64, file_threshold: u64) -> bool {
    current_size >= file_threshold
}

/// Decision taken after each append on the write path.
pub fn write_path_trigger(
    current_size: u64,
    file_threshold: u64,
    flush_interval: Duration,
) -> Option<RollTrigger> {
    if should_roll(current_size, file_threshold) {
        Some(RollTrigger::Size)
    } else if flush_interval.is_zero() {
        Some(RollTrigger::EveryWrite)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_roll_at_threshold() {
        assert!(!should_roll(0, 10));
        assert!(!should_roll(9, 10));
        assert!(should_roll(10, 10));
        assert!(should_roll(11, 10));
    }

    #[test]
    fn test_write_path_size_wins_over_every_write() {
        assert_eq!(
            write_path_trigger(18, 18, Duration::ZERO),
            Some(RollTrigger::Size)
        );
    }

    #[test]
    fn test_zero_interval_rolls_small_batches() {
        assert_eq!(
            write_path_trigger(1, 1024, Duration::ZERO),
            Some(RollTrigger::EveryWrite)
        );
    }

    #[test]
    fn test_positive_interval_defers_small_batches() {
        assert_eq!(write_path_trigger(1, 1024, Duration::from_millis(300)), None);
    }

    #[test]
    fn test_trigger_labels() {
        assert_eq!(RollTrigger::Timer.to_string(), "timer");
        assert_eq!(RollTrigger::EveryWrite.as_str(), "every_write");
    }
}
