//! Detection of pagination that has stopped making progress.
//!
//! Two signals feed one counter: a page whose records were all seen before,
//! and a page number that failed to increase. A page number that does
//! increase resets the counter.

/// Outcome of feeding one signal to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckVerdict {
    Progressing,
    Stalled,
    Tripped,
}

impl StuckVerdict {
    pub fn is_tripped(&self) -> bool {
        matches!(self, StuckVerdict::Tripped)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StuckDetector {
    threshold: u32,
}

impl StuckDetector {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Record a page that produced nothing new.
    pub fn record_stall(&self, count: &mut u32) -> StuckVerdict {
        *count = count.saturating_add(1);
        self.verdict(*count)
    }

    /// Compare an incoming page number against the previous one.
    pub fn observe_page(
        &self,
        count: &mut u32,
        previous: Option<u32>,
        incoming: u32,
    ) -> StuckVerdict {
        match previous {
            Some(prev) if incoming <= prev => self.record_stall(count),
            _ => {
                *count = 0;
                StuckVerdict::Progressing
            }
        }
    }

    fn verdict(&self, count: u32) -> StuckVerdict {
        if count >= self.threshold {
            StuckVerdict::Tripped
        } else {
            StuckVerdict::Stalled
        }
    }
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self::new(3)
    }
}
