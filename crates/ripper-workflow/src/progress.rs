//! Phase to percent mapping.
//!
//! | phase        | percent                              |
//! |--------------|--------------------------------------|
//! | pending      | 0                                    |
//! | fetching     | 0..=5, by sources and items resolved |
//! | extracting   | 5..=70, by items processed           |
//! | aggregating  | 70                                   |
//! | synthesizing | 90                                   |
//! | complete     | 100                                  |
//! | partial      | 100                                  |
//!
//! `error` and `aborted` keep the percent reached so far.

use ripper_core::Phase;

pub const FETCHING_START: u8 = 0;
pub const EXTRACTING_START: u8 = 5;
pub const AGGREGATING: u8 = 70;
pub const SYNTHESIZING: u8 = 90;
pub const DONE: u8 = 100;

fn span(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return end;
    }
    let done = done.min(total) as u64;
    let width = u64::from(end - start);
    start + (width * done / total as u64) as u8
}

/// Percent at the start of `phase`, or `None` for phases that keep the
/// previous value.
pub fn phase_start(phase: Phase) -> Option<u8> {
    match phase {
        Phase::Pending | Phase::Fetching => Some(FETCHING_START),
        Phase::Extracting => Some(EXTRACTING_START),
        Phase::Aggregating => Some(AGGREGATING),
        Phase::Synthesizing => Some(SYNTHESIZING),
        Phase::Complete | Phase::Partial => Some(DONE),
        Phase::Error | Phase::Aborted => None,
    }
}

/// Fetching percent after `done` of `total` units resolved.
pub fn fetching(done: usize, total: usize) -> u8 {
    span(FETCHING_START, EXTRACTING_START, done, total)
}

/// Extracting percent after `processed` of `total` items resolved.
pub fn extracting(processed: usize, total: usize) -> u8 {
    span(EXTRACTING_START, AGGREGATING, processed, total)
}

/// Never report less than what was already reported.
pub fn advance(previous: u8, next: u8) -> u8 {
    previous.max(next).min(DONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracting_span() {
        assert_eq!(extracting(0, 15), 5);
        assert_eq!(extracting(5, 15), 26);
        assert_eq!(extracting(15, 15), 70);
        assert_eq!(extracting(20, 15), 70);
        assert_eq!(extracting(0, 0), 70);
    }

    #[test]
    fn test_fetching_span() {
        assert_eq!(fetching(0, 4), 0);
        assert_eq!(fetching(2, 4), 2);
        assert_eq!(fetching(4, 4), 5);
    }

    #[test]
    fn test_phase_starts_are_ordered() {
        let running = [
            Phase::Pending,
            Phase::Fetching,
            Phase::Extracting,
            Phase::Aggregating,
            Phase::Synthesizing,
            Phase::Complete,
        ];
        let starts: Vec<u8> = running.iter().filter_map(|p| phase_start(*p)).collect();
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(phase_start(Phase::Aborted), None);
    }

    #[test]
    fn test_advance_never_regresses() {
        assert_eq!(advance(40, 12), 40);
        assert_eq!(advance(40, 70), 70);
        assert_eq!(advance(90, 250), 100);
    }
}
