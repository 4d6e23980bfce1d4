//! Score conventions and search-wide constants.

/// All evaluation and search scores are integer centipawns.
/// Inside the search, scores are from the side-to-move's point of view.
pub type Score = i32;

/// Large sentinel used for alpha/beta windows.
pub const INFINITY: Score = 1_000_000_000;

/// Mate scores are represented as +/-(MATE_SCORE - ply), so that shorter
/// mates compare as better than longer ones.
pub const MATE_SCORE: Score = 1_000_000;
pub const MATE_BOUND: Score = MATE_SCORE - 1000;

/// The deepest ply the search will ever visit. Per-ply state is
/// preallocated in arrays of this length.
pub const MAX_PLY: usize = 128;

pub const DRAW_SCORE: Score = 0;

#[must_use]
pub const fn is_mate_score(s: Score) -> bool {
    s >= MATE_BOUND || s <= -MATE_BOUND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mate_bound_classification() {
        assert!(is_mate_score(MATE_SCORE - 3));
        assert!(is_mate_score(-(MATE_SCORE - 3)));
        assert!(!is_mate_score(MATE_BOUND - 1));
        assert!(!is_mate_score(0));
    }
}
