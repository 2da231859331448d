use std::time::Duration;

/// Highest value the synthetic driver reaches on its own; 100 is reserved for real completion.
pub const PROGRESS_CEILING: u8 = 99;
pub const PROGRESS_DONE: u8 = 100;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(800);

/// Delay schedule for synthetic export progress. Ticks slow down as the bar
/// fills: 1x base below 50%, 2x up to 80%, 3x after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSchedule {
    base: Duration,
}

impl ProgressSchedule {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn delay_after(&self, progress: u8) -> Duration {
        match progress {
            0..=49 => self.base,
            50..=79 => self.base * 2,
            _ => self.base * 3,
        }
    }

    /// Time the driver needs to climb from 0 to the ceiling.
    pub fn time_to_ceiling(&self) -> Duration {
        (0..PROGRESS_CEILING).map(|p| self.delay_after(p)).sum()
    }
}

impl Default for ProgressSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_in_three_bands() {
        let schedule = ProgressSchedule::new(Duration::from_millis(10));
        assert_eq!(schedule.delay_after(0), Duration::from_millis(10));
        assert_eq!(schedule.delay_after(49), Duration::from_millis(10));
        assert_eq!(schedule.delay_after(50), Duration::from_millis(20));
        assert_eq!(schedule.delay_after(79), Duration::from_millis(20));
        assert_eq!(schedule.delay_after(80), Duration::from_millis(30));
        assert_eq!(schedule.delay_after(98), Duration::from_millis(30));
    }

    #[test]
    fn default_climb_takes_about_two_minutes() {
        // 50 * 0.8s + 30 * 1.6s + 19 * 2.4s
        assert_eq!(
            ProgressSchedule::default().time_to_ceiling(),
            Duration::from_millis(40_000 + 48_000 + 45_600)
        );
    }
}
