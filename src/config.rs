//! Engine configuration: every knob the UCI front-end can set.
//!
//! The config is immutable for the duration of a search; the adapter only
//! rewrites it while the worker is stopped.

use crate::definitions::Score;

#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct EngineConfig {
    /// Default fixed depth when `go` carries no depth and no time.
    pub search_depth: i32,
    /// Depth cap when searching under a clock.
    pub max_depth_timed: i32,
    /// Safety margin subtracted from the available time.
    pub move_overhead_ms: i64,
    /// Transposition table size in megabytes.
    pub hash_mb: usize,
    /// Standard UCI ponder toggle.
    pub ponder: bool,

    // Search feature toggles, kept separate so they can be A/B tested from
    // the UCI option surface.
    pub use_quiescence: bool,
    pub use_history_heuristic: bool,
    pub use_capture_history: bool,
    pub use_continuation_history: bool,
    pub use_probcut: bool,
    pub use_iid: bool,
    pub use_null_move_pruning: bool,
    pub use_move_count_pruning: bool,
    pub use_razoring: bool,
    pub use_correction_history: bool,

    /// Razoring margins, centipawns, by remaining depth.
    pub razor_margin_d2: Score,
    pub razor_margin_d3: Score,

    /// SEE threshold for classifying a capture as "good". The picker adds
    /// +1cp at remaining depth <= 2 to preserve the historical behaviour of
    /// a threshold of 1 at shallow nodes.
    pub good_capture_see_threshold_cp: Score,
    /// Ordering penalty for captures below the SEE threshold.
    pub bad_capture_penalty_cp: Score,

    /// Move-ordering bonuses, in internal ordering units (not centipawns).
    pub killer_bonus_1: i32,
    pub killer_bonus_2: i32,
    pub counter_move_bonus: i32,

    /// Ordering multipliers in percent: 100 means 1.0x.
    pub history_mult: i32,
    pub continuation_mult: i32,
    pub capture_history_mult: i32,

    /// Correction-history scale in percent. 0 disables the correction even
    /// when the table itself is enabled.
    pub correction_scale: i32,

    // Evaluation feature scales, in percent of their base weight.
    pub king_crowding_scale: i32,
    pub mobility_scale: i32,
    pub xray_scale: i32,
    pub pst_scale: i32,
    pub threat_term: i32,
    pub use_stock_pst: bool,

    // Draw avoidance ("contempt"), applied only to repetition and
    // fifty-move draws. If the side to move is ahead, a draw scores
    // slightly negative; if behind, slightly positive.
    pub draw_contempt_scale_cp: Score,
    pub draw_contempt_max_cp: Score,
    pub draw_contempt_threshold_cp: Score,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_depth: 3,
            max_depth_timed: 64,
            move_overhead_ms: 20,
            hash_mb: 256,
            ponder: false,

            use_quiescence: true,
            use_history_heuristic: true,
            use_capture_history: true,
            use_continuation_history: true,
            use_probcut: true,
            use_iid: true,
            use_null_move_pruning: true,
            use_move_count_pruning: true,
            use_razoring: true,
            use_correction_history: true,

            razor_margin_d2: 250,
            razor_margin_d3: 500,

            good_capture_see_threshold_cp: 0,
            bad_capture_penalty_cp: 0,

            killer_bonus_1: 90_000,
            killer_bonus_2: 80_000,
            counter_move_bonus: 10_000,

            history_mult: 96,
            continuation_mult: 152,
            capture_history_mult: 100,

            correction_scale: 50,

            king_crowding_scale: 10,
            mobility_scale: 50,
            xray_scale: 0,
            pst_scale: 50,
            threat_term: 50,
            use_stock_pst: true,

            draw_contempt_scale_cp: 20,
            draw_contempt_max_cp: 80,
            draw_contempt_threshold_cp: 30,
        }
    }
}
