//! The engine façade: owns the transposition table, the heuristic state and
//! the configuration, and drives iterative deepening with aspiration
//! windows and cooperative time management on top of the root search.

use std::collections::HashSet;
use std::sync::{atomic::AtomicBool, Arc};

use chess::{ChessMove, Color};

use crate::{
    config::EngineConfig,
    definitions::{Score, INFINITY, MATE_BOUND, MAX_PLY},
    position::Position,
    search::{RootMove, SearchControl, SearchState, SearchStats, Searcher},
    transpositiontable::TranspositionTable,
};

/// UCI `go` limits. Time values are milliseconds; negative means absent.
/// `depth > 0` overrides time.
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub depth: i32,
    pub movetime_ms: i64,
    pub wtime_ms: i64,
    pub btime_ms: i64,
    pub winc_ms: i64,
    pub binc_ms: i64,
    pub movestogo: i32,
    pub infinite: bool,
    pub ponder: bool,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            depth: 0,
            movetime_ms: -1,
            wtime_ms: -1,
            btime_ms: -1,
            winc_ms: 0,
            binc_ms: 0,
            movestogo: -1,
            infinite: false,
            ponder: false,
        }
    }
}

/// Computed time budget for one move.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeBudget {
    pub enabled: bool,
    pub soft_ms: u64,
    pub hard_ms: u64,
    pub overhead_ms: u64,
}

/// Soft budget is a slice of the remaining clock plus most of the
/// increment; hard allows stretching, capped so a single move can never
/// burn a meaningful fraction of the game.
#[must_use]
pub fn compute_time_budget(
    limits: &SearchLimits,
    side_to_move: Color,
    cfg: &EngineConfig,
) -> TimeBudget {
    let overhead = cfg.move_overhead_ms.max(0);
    let mut tb = TimeBudget { overhead_ms: overhead as u64, ..TimeBudget::default() };

    // movetime overrides everything else
    if limits.movetime_ms >= 0 {
        let available = (limits.movetime_ms - overhead).max(0) as u64;
        tb.enabled = true;
        tb.hard_ms = available;
        tb.soft_ms = available * 95 / 100;
        return tb;
    }

    let my_time = match side_to_move {
        Color::White => limits.wtime_ms,
        Color::Black => limits.btime_ms,
    };
    if my_time < 0 {
        return tb;
    }
    tb.enabled = true;

    let my_time = my_time.max(0);
    let my_inc = match side_to_move {
        Color::White => limits.winc_ms,
        Color::Black => limits.binc_ms,
    }
    .max(0);

    let available = (my_time - overhead).max(0);
    // bias moves-to-go high when unknown, so the early game stays frugal
    let mtg = if limits.movestogo > 0 { i64::from(limits.movestogo) } else { 64 };

    let mut soft = available / (mtg + 1) + my_inc * 6 / 10;
    let mut hard = soft * 2;
    hard = hard.min(available).min(my_time / 4).min(soft * 4);
    hard = hard.max(0);
    soft = soft.clamp(0, hard);

    tb.soft_ms = soft as u64;
    tb.hard_ms = hard as u64;
    tb
}

/// Per-iteration report, handed to the adapter's callback for `info`
/// output. Nodes and time are cumulative across the whole search.
#[derive(Debug, Clone, Default)]
pub struct IterationInfo {
    pub depth: i32,
    pub score: Score,
    pub best_move: Option<ChessMove>,
    pub nodes: u64,
    pub time_seconds: f64,
    pub nps: f64,
    pub tt_hits: u64,
    pub tt_misses: u64,
    pub is_mate: bool,
    pub is_draw: bool,
    /// Principal variation in UCI move strings. May be empty.
    pub pv_uci: String,
}

pub type IterationCallback<'a> = &'a mut dyn FnMut(&IterationInfo);

/// Terminal search output: the deepest completed iteration's verdict plus
/// stats aggregated over every iteration and re-search.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub score: Score,
    pub best_move: Option<ChessMove>,

    pub nodes: u64,
    pub depth_requested: i32,
    pub depth_reached: i32,
    pub time_seconds: f64,
    pub nps: f64,

    pub tt_hits: u64,
    pub tt_misses: u64,
    pub tt_hit_rate: f64,

    pub is_mate: bool,
    pub is_draw: bool,

    pub quiet_searched_ge10: u64,
    pub quiet_researched_ge10: u64,
    pub pv_firstmove_changes_ge10: u64,
    pub pv_last_change_depth: i32,

    pub badcap_nodes: u64,
    pub badcap_picked: u64,
    pub badcap_searched: u64,
    pub badcap_gen_nodes: u64,
    pub badcap_generated: u64,

    pub razor_attempts: u64,
    pub razor_cutoffs: u64,
}

const ASPIRATION_WINDOW: Score = 50;
const ASPIRATION_RETRIES: usize = 5;
const PV_MAX_LEN: usize = 16;
const ABS_MAX_DEPTH: i32 = MAX_PLY as i32;

pub struct Engine {
    config: EngineConfig,
    tt: TranspositionTable,
    state: SearchState,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let tt = TranspositionTable::new(TranspositionTable::entries_for_mb(config.hash_mb));
        Self { config, tt, state: SearchState::new() }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn clear_tt(&mut self) {
        self.tt.clear();
    }

    pub fn resize_tt_mb(&mut self, mb: usize) {
        let mb = mb.max(1);
        self.config.hash_mb = mb;
        self.tt.resize(TranspositionTable::entries_for_mb(mb));
    }

    /// Full heuristic reset, for `ucinewgame`.
    pub fn reset_heuristics(&mut self) {
        self.state.reset();
    }

    /// Fixed-depth search. Still honours an external stop request.
    pub fn search_depth(
        &mut self,
        pos: &mut Position,
        depth: i32,
        stop: Option<Arc<AtomicBool>>,
        on_iter: Option<IterationCallback>,
    ) -> SearchResult {
        let max_depth = if depth > 0 { depth } else { self.config.search_depth };
        let control = SearchControl::new(stop);
        self.search_with_control(pos, max_depth, &control, false, on_iter)
    }

    /// Time-managed (UCI limits) search. Depth overrides time; infinite and
    /// ponder run until the stop flag, falling back to a deep fixed-depth
    /// search when no stop flag was supplied.
    pub fn search_limits(
        &mut self,
        pos: &mut Position,
        limits: &SearchLimits,
        stop: Option<Arc<AtomicBool>>,
        on_iter: Option<IterationCallback>,
    ) -> SearchResult {
        if limits.depth > 0 {
            return self.search_depth(pos, limits.depth, stop, on_iter);
        }

        if limits.infinite || limits.ponder {
            let keep = stop.is_some();
            let control = SearchControl::new(stop);
            return self.search_with_control(pos, ABS_MAX_DEPTH, &control, keep, on_iter);
        }

        let budget = compute_time_budget(limits, pos.turn(), &self.config);
        if !budget.enabled {
            return self.search_depth(pos, self.config.search_depth, stop, on_iter);
        }

        let control = SearchControl::with_budget(stop, budget.soft_ms, budget.hard_ms);
        let max_depth = if self.config.max_depth_timed > 0 {
            self.config.max_depth_timed
        } else {
            self.config.search_depth
        };
        self.search_with_control(pos, max_depth, &control, false, on_iter)
    }

    /// The iterative-deepening driver. `keep_searching_at_max_depth` makes
    /// the engine idle at its depth ceiling until stopped (infinite and
    /// ponder modes) instead of returning early.
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub fn search_with_control(
        &mut self,
        pos: &mut Position,
        max_depth: i32,
        control: &SearchControl,
        keep_searching_at_max_depth: bool,
        mut on_iter: Option<IterationCallback>,
    ) -> SearchResult {
        let use_quiescence = self.config.use_quiescence;

        // best data from the deepest completed iteration
        let mut best_move: Option<ChessMove> = None;
        let mut best_score: Score = 0;

        let mut total = SearchStats::default();
        let mut root_moves: Vec<RootMove> = Vec::new();

        // soft-deadline management state
        let base_soft_ms = if control.time_enabled() { control.soft_deadline_ms() } else { 0 };
        let base_hard_ms = if control.time_enabled() { control.hard_deadline_ms() } else { 0 };
        let mut prev_best_overall: Option<ChessMove> = None;
        let mut last_pv0_change_depth = 0i32;
        let mut previous_time_reduction = 1.0f64;

        let mut have_prev = false;
        let mut prev_score: Score = 0;

        // late PV-flip diagnostics
        let mut prev_best_ge10: Option<ChessMove> = None;
        let mut prev_best_depth_ge10 = 0i32;

        let mut cur_depth = 1i32;
        loop {
            if !keep_searching_at_max_depth && cur_depth > max_depth {
                break;
            }
            if control.hard_expired() {
                break;
            }
            if best_move.is_some() && control.soft_expired() && cur_depth > 2 {
                break;
            }
            if control.stop_requested() {
                break;
            }

            let depth_to_search = cur_depth.min(max_depth);

            let mut alpha = -INFINITY;
            let mut beta = INFINITY;
            let mut window = ASPIRATION_WINDOW;
            if have_prev && prev_score.abs() < MATE_BOUND {
                alpha = prev_score - window;
                beta = prev_score + window;
            }

            let mut iter_result: Option<(ChessMove, Score)> = None;
            let mut last_stats = SearchStats::default();
            let mut in_window = false;

            // widen on fail-low / fail-high
            for _tries in 0..ASPIRATION_RETRIES {
                let (result, stats) =
                    self.run_root(pos, depth_to_search, alpha, beta, use_quiescence, control, &mut root_moves);
                accumulate(&mut total, &stats, depth_to_search);
                let interrupted = stats.stopped;
                last_stats = stats;
                iter_result = result;

                if interrupted || iter_result.is_none() {
                    iter_result = if interrupted { None } else { iter_result };
                    break;
                }
                let (_, score) = iter_result.expect("checked above");

                if score <= alpha || score >= beta {
                    window *= 2;
                    alpha = if have_prev { prev_score - window } else { -INFINITY };
                    beta = if have_prev { prev_score + window } else { INFINITY };
                    continue;
                }

                in_window = true;
                break;
            }

            // never accept a bound as an exact score: if the retries ran
            // out, one full-window search is authoritative
            if iter_result.is_some() && !in_window {
                let (result, stats) = self.run_root(
                    pos,
                    depth_to_search,
                    -INFINITY,
                    INFINITY,
                    use_quiescence,
                    control,
                    &mut root_moves,
                );
                accumulate(&mut total, &stats, depth_to_search);
                let interrupted = stats.stopped;
                last_stats = stats;
                iter_result = if interrupted { None } else { result };
            }

            let Some((iter_best, iter_score)) = iter_result else {
                // keep the best move from the last completed iteration
                if last_stats.is_mate {
                    total.is_mate = true;
                }
                if last_stats.is_draw {
                    total.is_draw = true;
                }
                break;
            };

            // diagnostics: late first-move flips between completed iterations
            if depth_to_search >= 10 && prev_best_depth_ge10 >= 10 {
                if let Some(prev) = prev_best_ge10 {
                    if prev != iter_best {
                        total.pv_firstmove_changes_ge10 += 1;
                        total.pv_last_change_depth = depth_to_search;
                    }
                }
            }
            if depth_to_search >= 10 {
                prev_best_ge10 = Some(iter_best);
                prev_best_depth_ge10 = depth_to_search;
            }

            best_move = Some(iter_best);
            best_score = iter_score;

            if control.time_enabled() && base_soft_ms > 0 && base_hard_ms > 0 {
                adjust_soft_deadline(
                    control,
                    base_soft_ms,
                    base_hard_ms,
                    depth_to_search,
                    &last_stats,
                    iter_best,
                    &mut prev_best_overall,
                    &mut last_pv0_change_depth,
                    &mut previous_time_reduction,
                );
            }

            if let Some(cb) = on_iter.as_mut() {
                let elapsed = control.elapsed().as_secs_f64();
                let nps = if elapsed > 0.0 { total.nodes as f64 / elapsed } else { 0.0 };
                let info = IterationInfo {
                    depth: depth_to_search,
                    score: iter_score,
                    best_move: Some(iter_best),
                    nodes: total.nodes,
                    time_seconds: elapsed,
                    nps,
                    tt_hits: total.tt_hits,
                    tt_misses: total.tt_misses,
                    is_mate: total.is_mate,
                    is_draw: total.is_draw,
                    pv_uci: build_pv_uci(pos, &self.tt, iter_best, PV_MAX_LEN),
                };
                cb(&info);
            }

            have_prev = true;
            prev_score = iter_score;

            if best_move.is_some() && control.soft_expired() {
                break;
            }

            // in infinite/ponder mode, re-searching the final depth forever
            // spams the GUI; idle until stopped instead
            if keep_searching_at_max_depth && cur_depth >= max_depth {
                while !control.stop_requested() && !control.hard_expired() {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                break;
            }

            if cur_depth < max_depth {
                cur_depth += 1;
            } else {
                break;
            }
        }

        let elapsed = control.elapsed().as_secs_f64();
        let nps = if elapsed > 0.0 { total.nodes as f64 / elapsed } else { 0.0 };
        let tt_total = total.tt_hits + total.tt_misses;

        SearchResult {
            score: best_score,
            best_move,
            nodes: total.nodes,
            depth_requested: total.depth_requested,
            depth_reached: total.depth_reached,
            time_seconds: elapsed,
            nps,
            tt_hits: total.tt_hits,
            tt_misses: total.tt_misses,
            tt_hit_rate: if tt_total > 0 {
                100.0 * total.tt_hits as f64 / tt_total as f64
            } else {
                0.0
            },
            is_mate: total.is_mate,
            is_draw: total.is_draw,
            quiet_searched_ge10: total.quiet_searched_ge10,
            quiet_researched_ge10: total.quiet_researched_ge10,
            pv_firstmove_changes_ge10: total.pv_firstmove_changes_ge10,
            pv_last_change_depth: total.pv_last_change_depth,
            badcap_nodes: total.badcap_nodes,
            badcap_picked: total.badcap_picked,
            badcap_searched: total.badcap_searched,
            badcap_gen_nodes: total.badcap_gen_nodes,
            badcap_generated: total.badcap_generated,
            razor_attempts: total.razor_attempts,
            razor_cutoffs: total.razor_cutoffs,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_root(
        &mut self,
        pos: &mut Position,
        depth: i32,
        alpha: Score,
        beta: Score,
        use_quiescence: bool,
        control: &SearchControl,
        root_moves: &mut Vec<RootMove>,
    ) -> (Option<(ChessMove, Score)>, SearchStats) {
        let mut searcher = Searcher::new(
            &mut self.tt,
            &mut self.state,
            &self.config,
            control,
            use_quiescence,
            true,
        );
        let result = searcher.find_best_move(pos, depth, alpha, beta, root_moves);
        (result, searcher.stats)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn accumulate(total: &mut SearchStats, iter: &SearchStats, depth_requested: i32) {
    total.nodes += iter.nodes;
    total.tt_hits += iter.tt_hits;
    total.tt_misses += iter.tt_misses;
    total.quiet_searched_ge10 += iter.quiet_searched_ge10;
    total.quiet_researched_ge10 += iter.quiet_researched_ge10;
    total.badcap_nodes += iter.badcap_nodes;
    total.badcap_picked += iter.badcap_picked;
    total.badcap_searched += iter.badcap_searched;
    total.badcap_gen_nodes += iter.badcap_gen_nodes;
    total.badcap_generated += iter.badcap_generated;
    total.razor_attempts += iter.razor_attempts;
    total.razor_cutoffs += iter.razor_cutoffs;
    total.is_mate = iter.is_mate;
    total.is_draw = iter.is_draw;
    total.depth_reached = total.depth_reached.max(iter.depth_reached);
    total.depth_requested = depth_requested;
    if total.root_branching_factor == 0 {
        total.root_branching_factor = iter.root_branching_factor;
    }
}

/// Shrink the soft deadline while the root best move stays stable over many
/// depths, stretch it while the best move wobbles within an iteration.
#[allow(clippy::too_many_arguments)]
fn adjust_soft_deadline(
    control: &SearchControl,
    base_soft_ms: u64,
    base_hard_ms: u64,
    completed_depth: i32,
    iter_stats: &SearchStats,
    iter_best: ChessMove,
    prev_best_overall: &mut Option<ChessMove>,
    last_pv0_change_depth: &mut i32,
    previous_time_reduction: &mut f64,
) {
    if prev_best_overall.is_some_and(|prev| prev != iter_best) {
        *last_pv0_change_depth = completed_depth;
    }
    *prev_best_overall = Some(iter_best);

    let time_reduction = if *last_pv0_change_depth + 4 < completed_depth { 1.6857 } else { 0.9 };
    let reduction = (1.4540 + *previous_time_reduction) / (2.1593 * time_reduction);

    let instability =
        (0.9929 + 1.8519 * iter_stats.best_move_changes as f64).clamp(0.50, 3.00);

    let mut target_ms = base_soft_ms as f64 * reduction * instability;

    // a single legal move does not deserve a long think
    if iter_stats.root_branching_factor == 1 {
        target_ms = target_ms.min(500.0);
    }

    let min_ms = (base_soft_ms as f64 * 0.60).max(1.0);
    let max_ms = (base_hard_ms as f64).min(base_soft_ms as f64 * 1.15);
    target_ms = target_ms.clamp(min_ms, max_ms);

    control.set_soft_deadline_ms(target_ms as u64);
    *previous_time_reduction = time_reduction;
}

/// Rebuild the principal variation by walking the TT from the root move,
/// with legality checks against each successive position and a seen-set to
/// stop on repetitions. Best-effort: collisions simply truncate the line.
fn build_pv_uci(
    pos: &Position,
    tt: &TranspositionTable,
    root_best: ChessMove,
    max_len: usize,
) -> String {
    let mut walk = pos.clone();
    if !walk.is_legal(root_best) {
        return String::new();
    }

    let mut pv = root_best.to_string();
    let mut written = 1;
    walk.make_move(root_best);

    let mut seen: HashSet<u64> = HashSet::with_capacity(max_len + 2);
    seen.insert(walk.key());

    while written < max_len {
        let Some(entry) = tt.probe(walk.key()) else {
            break;
        };
        let Some(m) = entry.best_move else {
            break;
        };
        if !walk.is_legal(m) {
            break;
        }
        walk.make_move(m);
        if !seen.insert(walk.key()) {
            break;
        }
        pv.push(' ');
        pv.push_str(&m.to_string());
        written += 1;
    }

    pv
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::definitions::MATE_SCORE;

    /// A small hash keeps the test suite's memory footprint down.
    fn test_engine() -> Engine {
        Engine::new(EngineConfig { hash_mb: 16, ..EngineConfig::default() })
    }

    #[test]
    fn depth_one_returns_a_legal_move() {
        let mut engine = test_engine();
        let mut pos = Position::startpos();
        let result = engine.search_depth(&mut pos, 1, None, None);
        let best = result.best_move.expect("twenty moves to choose from");
        assert!(pos.is_legal(best));
        assert_eq!(result.depth_reached, 1);
    }

    #[test]
    fn rook_up_endgame_wins_with_a_rook_lift() {
        let mut engine = test_engine();
        let mut pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let result = engine.search_depth(&mut pos, 10, None, None);
        assert!(result.score >= 450, "score was {}", result.score);
        let best = result.best_move.unwrap().to_string();
        assert!(
            best == "a1a8" || best == "a1d8",
            "expected a back-rank invasion, got {best}"
        );
    }

    #[test]
    fn mate_in_one_reported_as_mate() {
        let mut engine = test_engine();
        let mut pos = Position::from_fen("6k1/5ppp/8/8/8/8/8/R6K w - - 0 1").unwrap();
        let result = engine.search_depth(&mut pos, 3, None, None);
        assert_eq!(result.best_move.unwrap().to_string(), "a1a8");
        assert_eq!(result.score, MATE_SCORE - 1);
        assert!(result.score > MATE_BOUND);
    }

    #[test]
    fn stalemate_yields_no_move_and_draw_flag() {
        let mut engine = test_engine();
        let mut pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let result = engine.search_depth(&mut pos, 1, None, None);
        assert!(result.best_move.is_none());
        assert!(result.is_draw);
    }

    #[test]
    fn repeated_position_scores_near_zero() {
        let mut engine = test_engine();
        let mut pos = Position::startpos();
        for uci in [
            "g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8",
        ] {
            pos.apply_uci_move(uci).unwrap();
        }
        let result = engine.search_depth(&mut pos, 6, None, None);
        // the start position evaluates inside the contempt dead zone, so
        // the draw score is exactly zero
        assert_eq!(result.score, 0);
        assert!(result.is_draw);
        assert!(result.best_move.is_some());
    }

    #[test]
    fn iteration_callbacks_reach_requested_depth() {
        let mut engine = test_engine();
        let mut pos = Position::startpos();
        let mut depths = Vec::new();
        {
            let mut cb = |info: &IterationInfo| depths.push(info.depth);
            engine.search_depth(&mut pos, 5, None, Some(&mut cb));
        }
        assert_eq!(depths, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn pv_starts_with_best_move_and_stays_legal() {
        let mut engine = test_engine();
        let mut pos = Position::startpos();
        let mut pv_line = String::new();
        {
            let mut cb = |info: &IterationInfo| pv_line = info.pv_uci.clone();
            engine.search_depth(&mut pos, 6, None, Some(&mut cb));
        }
        let mut replay = Position::startpos();
        let moves: Vec<&str> = pv_line.split_whitespace().collect();
        assert!(!moves.is_empty());
        for m in &moves {
            replay
                .apply_uci_move(m)
                .unwrap_or_else(|e| panic!("illegal pv move {m}: {e}"));
        }
        assert!(moves.len() <= 16);
    }

    #[test]
    fn pre_set_stop_flag_falls_back_gracefully() {
        let stop = Arc::new(AtomicBool::new(false));
        stop.store(true, Ordering::Relaxed);
        let mut engine = test_engine();
        let mut pos = Position::startpos();
        let result = engine.search_depth(&mut pos, 8, Some(stop), None);
        // no completed iteration: the caller is expected to fall back to
        // the first legal move
        assert!(result.best_move.is_none());
        assert_eq!(result.nodes, 0);
    }

    #[test]
    fn movetime_budget_arithmetic() {
        let cfg = EngineConfig::default();
        let limits = SearchLimits { movetime_ms: 1020, ..SearchLimits::default() };
        let tb = compute_time_budget(&limits, Color::White, &cfg);
        assert!(tb.enabled);
        assert_eq!(tb.hard_ms, 1000);
        assert_eq!(tb.soft_ms, 950);
    }

    #[test]
    fn clock_budget_respects_caps() {
        let cfg = EngineConfig::default();
        let limits = SearchLimits {
            wtime_ms: 60_000,
            winc_ms: 1000,
            ..SearchLimits::default()
        };
        let tb = compute_time_budget(&limits, Color::White, &cfg);
        assert!(tb.enabled);
        assert!(tb.soft_ms <= tb.hard_ms);
        assert!(tb.hard_ms <= 15_000, "hard cap exceeded: {}", tb.hard_ms);
        // black has no clock: time management is off
        let tb2 = compute_time_budget(&limits, Color::Black, &cfg);
        assert!(!tb2.enabled);
    }

    #[test]
    fn timed_search_returns_within_the_budget() {
        let mut engine = test_engine();
        let mut pos = Position::startpos();
        let limits = SearchLimits {
            wtime_ms: 1000,
            btime_ms: 1000,
            ..SearchLimits::default()
        };
        let start = std::time::Instant::now();
        let result = engine.search_limits(&mut pos, &limits, None, None);
        let elapsed = start.elapsed().as_millis();
        assert!(result.best_move.is_some());
        assert!(elapsed <= 980, "search overstayed its budget: {elapsed}ms");
    }

    #[test]
    fn deeper_mate_searches_never_report_worse_distance() {
        // forced mate for white: scores must not degrade as depth grows
        let fen = "7k/8/6K1/8/8/8/8/R7 w - - 0 1";
        let mut engine = test_engine();
        let mut shallow = Position::from_fen(fen).unwrap();
        let d4 = engine.search_depth(&mut shallow, 4, None, None);
        let mut deep = Position::from_fen(fen).unwrap();
        let d6 = engine.search_depth(&mut deep, 6, None, None);
        assert!(d4.score > MATE_BOUND);
        assert!(d6.score >= d4.score);
    }

    #[test]
    fn fixed_depth_is_reproducible_across_fresh_engines() {
        let fen = "r2qkb1r/pp2nppp/3p4/2pNN1B1/2BnP3/3P4/PPP2PPP/R2bK2R w KQkq - 1 10";
        let mut a = test_engine();
        let mut b = test_engine();
        let ra = a.search_depth(&mut Position::from_fen(fen).unwrap(), 5, None, None);
        let rb = b.search_depth(&mut Position::from_fen(fen).unwrap(), 5, None, None);
        assert_eq!(ra.best_move, rb.best_move);
        assert_eq!(ra.score, rb.score);
        assert_eq!(ra.nodes, rb.nodes);
    }

    #[test]
    fn single_legal_move_is_found_immediately() {
        // checked king whose only move is to capture the checker
        let mut engine = test_engine();
        let mut pos = Position::from_fen("7k/8/8/8/8/1r6/r7/K7 w - - 0 1").unwrap();
        assert_eq!(pos.legal_moves().len(), 1);
        let result = engine.search_depth(&mut pos, 4, None, None);
        let best = result.best_move.unwrap();
        assert_eq!(best, ChessMove::from_str("a1a2").unwrap());
    }
}
