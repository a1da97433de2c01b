//! Coarse progress reporting for the long-running recursion.

use std::time::Instant;

use parking_lot::Mutex;

/// Mutex-guarded progress counter that reports whole-percent transitions
/// through the `log` facade.
pub struct Progress {
    name: String,
    goal: u64,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    count: u64,
    last_percent: u64,
    start: Instant,
}

impl Progress {
    pub fn new(name: impl Into<String>, goal: u64) -> Self {
        Self {
            name: name.into(),
            goal: goal.max(1),
            state: Mutex::new(ProgressState {
                count: 0,
                last_percent: 0,
                start: Instant::now(),
            }),
        }
    }

    /// Add `inc` units of completed work.
    pub fn update(&self, inc: u64) {
        let mut state = self.state.lock();
        state.count += inc;
        let percent = 100 * state.count.min(self.goal) / self.goal;
        if percent > state.last_percent {
            state.last_percent = percent;
            log::debug!(
                "{}: {}% [{} s]",
                self.name,
                percent,
                state.start.elapsed().as_secs(),
            );
        }
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_accumulates() {
        let progress = Progress::new("test", 100);
        progress.update(30);
        progress.update(30);
        assert_eq!(progress.count(), 60);
    }

    #[test]
    fn test_zero_goal_does_not_divide_by_zero() {
        let progress = Progress::new("test", 0);
        progress.update(5);
        assert_eq!(progress.count(), 5);
    }
}
