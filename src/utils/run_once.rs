use std::sync::atomic::{AtomicBool, Ordering};

/// Runs a closure at most once for the lifetime of the guard.
#[derive(Debug, Default)]
pub struct RunOnce {
    has_run: AtomicBool,
}

impl RunOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` if nothing has run through this guard yet. Returns `Some` with the
    /// closure's output on the first call and `None` afterwards.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if self.has_run.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(f())
    }

    pub fn has_run(&self) -> bool {
        self.has_run.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_only_first_time() {
        let once = RunOnce::new();
        let mut calls = 0;

        assert_eq!(once.run(|| { calls += 1; calls }), Some(1));
        assert_eq!(once.run(|| { calls += 1; calls }), None);
        assert_eq!(calls, 1);
        assert!(once.has_run());
    }

    #[test]
    fn test_fresh_guard_has_not_run() {
        assert!(!RunOnce::new().has_run());
    }
}
