use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-wide live/historical switch.
///
/// Live mode holds while no historical query is in flight. Overlapping
/// queries are counted, so the last one out resumes the feed. This is
/// best-effort: a broadcast tick that read `is_live` just before a query
/// suspended it still completes its scan.
#[derive(Debug, Default)]
pub struct ModeController {
    suspensions: AtomicUsize,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.suspensions.load(Ordering::Acquire) == 0
    }

    /// Suspends live broadcast until the returned guard is dropped.
    #[must_use = "live mode resumes as soon as the guard is dropped"]
    pub fn suspend_live(&self) -> LiveSuspension<'_> {
        self.suspensions.fetch_add(1, Ordering::AcqRel);
        LiveSuspension { mode: self }
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.suspensions.load(Ordering::Acquire)
    }

    fn resume_live(&self) {
        self.suspensions.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct LiveSuspension<'a> {
    mode: &'a ModeController,
}

impl Drop for LiveSuspension<'_> {
    fn drop(&mut self) {
        self.mode.resume_live();
    }
}
