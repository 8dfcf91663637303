/// Coalesces a burst of triggers into one deferred run.
///
/// Owners call [`schedule`](Self::schedule) for every trigger and run the job
/// once their queue of immediately-ready inputs is drained, after
/// [`take`](Self::take) reports a pending run.
#[derive(Debug, Default)]
pub struct SingleFlight {
    scheduled: bool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call scheduled the run, `false` if one was
    /// already pending.
    pub fn schedule(&mut self) -> bool {
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Consumes the pending run, if any.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.scheduled)
    }
}
