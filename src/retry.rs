//! Retry and backoff interval calculation. Pure functions, no I/O.

/// How retry delays escalate across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBackoff {
    /// No backoff; explicit intervals (or none) apply.
    Off,
    /// Exponential backoff seeded at one second.
    On,
    /// Exponential backoff seeded at an explicit value. Seeds of 0 or 1
    /// are treated as `Off`, matching the truthiness rules of the
    /// submission contract.
    Seed(u32),
}

impl RetryBackoff {
    fn seed(self) -> Option<u32> {
        match self {
            RetryBackoff::Off => None,
            RetryBackoff::On => Some(1),
            RetryBackoff::Seed(seed) if seed > 1 => Some(seed),
            RetryBackoff::Seed(_) => None,
        }
    }
}

/// Explicit retry intervals supplied at submission time, in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrySpec {
    /// One delay repeated for every retry.
    Every(u32),
    /// One delay per retry.
    PerRetry(Vec<u32>),
}

impl Default for RetrySpec {
    fn default() -> Self {
        RetrySpec::Every(0)
    }
}

impl RetrySpec {
    fn into_intervals(self) -> Vec<u32> {
        match self {
            RetrySpec::Every(seconds) => vec![seconds],
            RetrySpec::PerRetry(intervals) => intervals,
        }
    }
}

/// Compute backoff intervals, or `None` when backoff is disabled and the
/// caller should fall through to its explicit intervals.
pub fn retry_backoff_intervals(max_retries: u32, backoff: RetryBackoff) -> Option<Vec<u32>> {
    let seed = backoff.seed()?;
    if max_retries == 0 {
        return None;
    }
    Some(exponential_backoff_intervals(max_retries, seed))
}

/// Exponential backoff sequence: the seed itself, then the squares of the
/// integers following it, truncated to `max_retries` entries.
///
/// `max_retries = 3, start = 1` gives `[1, 4, 9]`. An explicit seed keeps
/// its face value for the first retry and squares from there, so
/// `max_retries = 3, start = 30` gives `[30, 961, 1024]` — the first retry
/// is fast relative to the steep delays that follow.
pub fn exponential_backoff_intervals(max_retries: u32, start: u32) -> Vec<u32> {
    let mut intervals = Vec::with_capacity(max_retries as usize);
    intervals.push(start);
    for i in (start + 1)..(start + max_retries) {
        intervals.push(i * i);
    }
    intervals.truncate(max_retries as usize);
    intervals
}

/// Resolve the intervals a submission ends up with: backoff wins when
/// enabled, otherwise the explicit spec is used verbatim.
pub fn resolve_retry_intervals(
    max_retries: u32,
    spec: RetrySpec,
    backoff: RetryBackoff,
) -> Vec<u32> {
    match retry_backoff_intervals(max_retries, backoff) {
        Some(intervals) => intervals,
        None => spec.into_intervals(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_off_yields_no_intervals() {
        assert_eq!(retry_backoff_intervals(2, RetryBackoff::Off), None);
    }

    #[test]
    fn backoff_seed_of_one_counts_as_off() {
        assert_eq!(retry_backoff_intervals(2, RetryBackoff::Seed(1)), None);
        assert_eq!(retry_backoff_intervals(2, RetryBackoff::Seed(0)), None);
    }

    #[test]
    fn backoff_with_zero_retries_yields_nothing() {
        assert_eq!(retry_backoff_intervals(0, RetryBackoff::On), None);
    }

    #[test]
    fn exponential_from_one() {
        assert_eq!(exponential_backoff_intervals(2, 1), vec![1, 4]);
        assert_eq!(exponential_backoff_intervals(3, 1), vec![1, 4, 9]);
        assert_eq!(exponential_backoff_intervals(5, 1), vec![1, 4, 9, 16, 25]);
    }

    #[test]
    fn exponential_from_explicit_seed() {
        // The seed keeps its face value; the following entries square.
        assert_eq!(exponential_backoff_intervals(3, 30), vec![30, 961, 1024]);
        assert_eq!(exponential_backoff_intervals(1, 30), vec![30]);
    }

    #[test]
    fn resolve_prefers_backoff() {
        let intervals =
            resolve_retry_intervals(2, RetrySpec::PerRetry(vec![7, 7]), RetryBackoff::On);
        assert_eq!(intervals, vec![1, 4]);
    }

    #[test]
    fn resolve_falls_back_to_explicit_spec() {
        let intervals =
            resolve_retry_intervals(3, RetrySpec::PerRetry(vec![30, 60, 90]), RetryBackoff::Off);
        assert_eq!(intervals, vec![30, 60, 90]);
    }

    #[test]
    fn resolve_scalar_spec_becomes_single_entry() {
        let intervals = resolve_retry_intervals(3, RetrySpec::Every(15), RetryBackoff::Off);
        assert_eq!(intervals, vec![15]);
    }

    #[test]
    fn resolve_default_spec_is_zero() {
        let intervals = resolve_retry_intervals(3, RetrySpec::default(), RetryBackoff::Off);
        assert_eq!(intervals, vec![0]);
    }
}
