use std::fmt;

use tracing::info;

/// Counters for one cycle. Logged at the end of the cycle, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Cycle number.
    pub cycle: u64,
    /// Files listed upstream this cycle (after deduplication).
    pub fetched: usize,
    /// Files skipped because the registry still considers them fresh.
    pub skipped: usize,
    /// Files rejected by the media filter.
    pub filtered: usize,
    /// Files written by the output writer (new, refreshed or recovered).
    pub written: usize,
    /// Files queued for retry in a later cycle.
    pub retried: usize,
    /// Queued files that succeeded this cycle.
    pub recovered: usize,
    /// Files that failed permanently or exhausted their retry ceiling.
    pub permanent_failures: usize,
    /// Listed files left to the retry queue instead of being resolved twice.
    pub deferred: usize,
    /// Registry entries removed because upstream no longer lists the file.
    pub purged: usize,
    /// Whether the listing reached its end without error or shutdown.
    pub fetch_complete: bool,
}

impl CycleSummary {
    /// Files that did not make it to the output this cycle.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.retried + self.permanent_failures
    }

    pub(crate) fn log(&self) {
        info!(
            cycle = self.cycle,
            fetched = self.fetched,
            skipped = self.skipped,
            filtered = self.filtered,
            written = self.written,
            retried = self.retried,
            recovered = self.recovered,
            permanent_failures = self.permanent_failures,
            deferred = self.deferred,
            purged = self.purged,
            fetch_complete = self.fetch_complete,
            "cycle complete"
        );
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} fetched, {} written, {} skipped, {} filtered, {} failed ({} queued, {} permanent), {} recovered",
            self.cycle,
            self.fetched,
            self.written,
            self.skipped,
            self.filtered,
            self.failed(),
            self.retried,
            self.permanent_failures,
            self.recovered,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_sums_retried_and_permanent() {
        let summary = CycleSummary {
            retried: 2,
            permanent_failures: 1,
            ..CycleSummary::default()
        };
        assert_eq!(summary.failed(), 3);
    }

    #[test]
    fn test_display_mentions_counts() {
        let summary = CycleSummary {
            cycle: 4,
            fetched: 5,
            written: 2,
            ..CycleSummary::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("cycle 4:"), "{text}");
        assert!(text.contains("5 fetched"));
        assert!(text.contains("2 written"));
    }
}
