//! Progress accounting
//!
//! Percentages are always cumulative over the whole resource: bytes written
//! by earlier attempts (the resume offset) count in both the numerator and
//! the denominator, so a resumed transfer never reports less than it did
//! before the pause.

/// Receiver of percent-complete updates
///
/// Invoked on the worker task. Implementations must be cheap and must not
/// block; a UI should forward the value to its own thread.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn report(&self, percent: u8) {
        self(percent)
    }
}

/// A sink that discards updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: u8) {}
}

/// Percentage of `done` over `total`, rounded and clamped to 0..=100.
/// Returns `None` when the total is unknown (zero).
pub fn cumulative_percent(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let done = done as u128;
    let total = total as u128;
    let percent = (done * 100 + total / 2) / total;
    Some(percent.min(100) as u8)
}

/// Per-attempt tracker that only yields strictly increasing percentages
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    offset: u64,
    denominator: Option<u64>,
    last: Option<u8>,
}

impl ProgressTracker {
    /// `remaining` is the number of bytes this attempt expects to receive
    pub fn new(offset: u64, remaining: Option<u64>) -> Self {
        let denominator = remaining.map(|r| offset.saturating_add(r));
        // The resume notification already reported the starting point
        let last = match denominator {
            Some(total) if offset > 0 => cumulative_percent(offset, total),
            _ => None,
        };
        Self {
            offset,
            denominator,
            last,
        }
    }

    /// Record the bytes transferred so far in this attempt. Returns the
    /// percentage to report, or `None` when nothing new should be emitted.
    pub fn update(&mut self, transferred: u64) -> Option<u8> {
        let total = self.denominator?;
        let percent = cumulative_percent(self.offset.saturating_add(transferred), total)?;
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            Some(percent)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
