//! The search subsystem: quiescence, negamax with forward pruning, and the
//! root driver for a single iteration. One `Searcher` lives for the
//! duration of an aspiration attempt; the long-lived heuristic tables sit
//! in `SearchState`, owned by the engine and borrowed by every frame.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use chess::{
    get_bishop_moves, get_king_moves, get_knight_moves, get_pawn_attacks, get_rook_moves,
    BitBoard, Board, ChessMove, Color, MoveGen, Piece, Square, EMPTY,
};

use crate::{
    config::EngineConfig,
    definitions::{is_mate_score, Score, DRAW_SCORE, INFINITY, MATE_BOUND, MATE_SCORE, MAX_PLY},
    evaluation::{evaluate_stm, piece_value, EvalCache},
    historytable::{
        CaptureHistoryTable, ContinuationHistoryTable, CorrectionHistoryTable, CounterMoveTable,
        HistoryTable,
    },
    movepicker::MovePicker,
    position::{capture_mask, Position},
    transpositiontable::{value_from_tt, value_to_tt, Bound, TranspositionTable},
};

const NODE_POLL_MASK: u64 = 2047;
const PROBCUT_MARGIN: Score = 100;

/// Per-iteration counters. The driver aggregates these over all aspiration
/// attempts of a search.
#[derive(Debug, Default, Clone)]
pub struct SearchStats {
    pub nodes: u64,
    pub depth_requested: i32,
    pub depth_reached: i32,

    pub tt_hits: u64,
    pub tt_misses: u64,

    pub root_branching_factor: usize,

    pub score: Score,
    pub best_move: Option<ChessMove>,

    pub is_mate: bool,
    pub is_draw: bool,

    /// Set when time or an external stop interrupted the search. The
    /// caller must discard this iteration's best move.
    pub stopped: bool,

    // Ordering diagnostics, tracked at remaining depth >= 10 where they say
    // something about deep-search pathology rather than leaf noise.
    pub quiet_searched_ge10: u64,
    pub quiet_researched_ge10: u64,
    pub pv_firstmove_changes_ge10: u64,
    pub pv_last_change_depth: i32,

    /// How often the root best move changed within a single iteration.
    pub best_move_changes: u64,

    pub badcap_nodes: u64,
    pub badcap_picked: u64,
    pub badcap_searched: u64,
    pub badcap_gen_nodes: u64,
    pub badcap_generated: u64,

    pub razor_attempts: u64,
    pub razor_cutoffs: u64,
}

/// Shared stop / time control. One per top-level search; borrowed by every
/// recursion frame, and shared with the protocol adapter so that deadlines
/// can be installed into an in-flight search (ponderhit).
///
/// All atomics are relaxed: the only edge that matters is that a store is
/// eventually seen, not its ordering against unrelated data.
pub struct SearchControl {
    start: Instant,
    time_enabled: AtomicBool,
    /// Deadlines as millisecond offsets from `start`.
    soft_ms: AtomicU64,
    hard_ms: AtomicU64,
    stop: Option<Arc<AtomicBool>>,
}

impl SearchControl {
    #[must_use]
    pub fn new(stop: Option<Arc<AtomicBool>>) -> Self {
        Self {
            start: Instant::now(),
            time_enabled: AtomicBool::new(false),
            soft_ms: AtomicU64::new(0),
            hard_ms: AtomicU64::new(0),
            stop,
        }
    }

    #[must_use]
    pub fn with_budget(stop: Option<Arc<AtomicBool>>, soft_ms: u64, hard_ms: u64) -> Self {
        let ctrl = Self::new(stop);
        ctrl.time_enabled.store(true, Ordering::Relaxed);
        ctrl.soft_ms.store(soft_ms, Ordering::Relaxed);
        ctrl.hard_ms.store(hard_ms, Ordering::Relaxed);
        ctrl
    }

    /// Converts a running (ponder/infinite) search into a timed one: the
    /// new deadlines count from now, not from when the search started.
    pub fn install_budget(&self, soft_ms: u64, hard_ms: u64) {
        let elapsed = self.elapsed_ms();
        self.soft_ms.store(elapsed + soft_ms, Ordering::Relaxed);
        self.hard_ms.store(elapsed + hard_ms, Ordering::Relaxed);
        self.time_enabled.store(true, Ordering::Relaxed);
    }

    pub fn set_soft_deadline_ms(&self, ms_from_start: u64) {
        self.soft_ms.store(ms_from_start, Ordering::Relaxed);
    }

    #[must_use]
    pub fn soft_deadline_ms(&self) -> u64 {
        self.soft_ms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn hard_deadline_ms(&self) -> u64 {
        self.hard_ms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn start(&self) -> Instant {
        self.start
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn time_enabled(&self) -> bool {
        self.time_enabled.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|s| s.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn hard_expired(&self) -> bool {
        self.time_enabled() && self.elapsed_ms() >= self.hard_ms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn soft_expired(&self) -> bool {
        self.time_enabled() && self.elapsed_ms() >= self.soft_ms.load(Ordering::Relaxed)
    }
}

/// Root moves persist across iterations and are reordered by the previous
/// iteration's scores, so the best line is searched first at each depth.
#[derive(Debug, Clone, Copy)]
pub struct RootMove {
    pub mov: ChessMove,
    pub last_score: Score,
}

#[derive(Debug, Clone, Copy, Default)]
struct PlyFrame {
    /// The coloured piece index and destination of the move made at this
    /// ply; None after a null move.
    cont: Option<(usize, Square)>,
}

/// Process-lifetime search state: every ordering heuristic, the per-ply
/// stack and the eval cache. Owned by the engine (never a process global)
/// and reset on `ucinewgame`.
pub struct SearchState {
    pub history: HistoryTable,
    pub capture_history: CaptureHistoryTable,
    pub cont_history: ContinuationHistoryTable,
    pub counters: CounterMoveTable,
    pub corrections: CorrectionHistoryTable,
    pub eval_cache: EvalCache,
    killers: [[Option<ChessMove>; 2]; MAX_PLY],
    frames: [PlyFrame; MAX_PLY],
    lmr: Box<[[i8; 64]; 64]>,
}

impl SearchState {
    #[must_use]
    pub fn new() -> Self {
        let mut lmr = Box::new([[0i8; 64]; 64]);
        for (d, row) in lmr.iter_mut().enumerate().skip(1) {
            for (m, r) in row.iter_mut().enumerate().skip(1) {
                *r = (0.75 + (d as f64).ln() * (m as f64).ln() / 2.25) as i8;
            }
        }
        Self {
            history: HistoryTable::new(),
            capture_history: CaptureHistoryTable::new(),
            cont_history: ContinuationHistoryTable::new(),
            counters: CounterMoveTable::new(),
            corrections: CorrectionHistoryTable::new(),
            eval_cache: EvalCache::new(),
            killers: [[None; 2]; MAX_PLY],
            frames: [PlyFrame::default(); MAX_PLY],
            lmr,
        }
    }

    /// Full reset, for `ucinewgame` only: heuristics persist within a game.
    pub fn reset(&mut self) {
        self.history.clear();
        self.capture_history.clear();
        self.cont_history.clear();
        self.counters.clear();
        self.corrections.clear();
        self.eval_cache.clear();
        self.killers = [[None; 2]; MAX_PLY];
        self.frames = [PlyFrame::default(); MAX_PLY];
    }

    #[must_use]
    pub fn killers_at(&self, ply: usize) -> [Option<ChessMove>; 2] {
        self.killers[ply]
    }

    pub fn insert_killer(&mut self, ply: usize, m: ChessMove) {
        if self.killers[ply][0] != Some(m) {
            self.killers[ply][1] = self.killers[ply][0];
            self.killers[ply][0] = Some(m);
        }
    }

    /// The (piece, to) of the move made `back` plies above `ply`, for
    /// continuation history and counter-move lookups.
    #[must_use]
    pub fn conthist_frame(&self, ply: usize, back: usize) -> Option<(usize, Square)> {
        if ply < back {
            return None;
        }
        self.frames[ply - back].cont
    }

    fn lmr_reduction(&self, depth: i32, move_index: usize) -> i32 {
        let d = (depth.max(0) as usize).min(63);
        i32::from(self.lmr[d][move_index.min(63)])
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

/// SEE piece values. The king is priced so that it never profitably stands
/// into a recapture.
const SEE_VALUES: [Score; 6] = [100, 320, 330, 500, 900, 20_000];

fn see_value(piece: Piece) -> Score {
    SEE_VALUES[piece.to_index()]
}

fn attackers_to(board: &Board, sq: Square, occupied: BitBoard) -> BitBoard {
    let knights = *board.pieces(Piece::Knight);
    let kings = *board.pieces(Piece::King);
    let bishops_queens = *board.pieces(Piece::Bishop) | *board.pieces(Piece::Queen);
    let rooks_queens = *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
    let white_pawns = *board.pieces(Piece::Pawn) & *board.color_combined(Color::White);
    let black_pawns = *board.pieces(Piece::Pawn) & *board.color_combined(Color::Black);

    (get_pawn_attacks(sq, Color::Black, white_pawns & occupied))
        | (get_pawn_attacks(sq, Color::White, black_pawns & occupied))
        | (get_knight_moves(sq) & knights & occupied)
        | (get_king_moves(sq) & kings & occupied)
        | (get_bishop_moves(sq, occupied) & bishops_queens & occupied)
        | (get_rook_moves(sq, occupied) & rooks_queens & occupied)
}

/// Static exchange evaluation: the net material outcome of the optimal
/// capture sequence on the destination square, in centipawns from the
/// mover's point of view. Ties go to the defender.
#[must_use]
pub fn static_exchange_eval(board: &Board, m: ChessMove) -> Score {
    let to = m.get_dest();
    let from = m.get_source();
    let Some(attacker) = board.piece_on(from) else {
        return 0;
    };

    let mut gain = [0 as Score; 32];
    let mut occupied = *board.combined() ^ BitBoard::from_square(from);
    // en passant: the captured pawn is not on the destination square
    gain[0] = match board.piece_on(to) {
        Some(victim) => see_value(victim),
        None if attacker == Piece::Pawn && from.get_file() != to.get_file() => {
            let captured_sq = Square::make_square(from.get_rank(), to.get_file());
            occupied ^= BitBoard::from_square(captured_sq);
            see_value(Piece::Pawn)
        }
        None => 0,
    };

    let mut side = !board.side_to_move();
    let mut on_square = see_value(attacker);
    let mut d = 0usize;

    loop {
        let attackers = attackers_to(board, to, occupied) & occupied;
        let ours = attackers & *board.color_combined(side);
        if ours == EMPTY || d + 1 >= gain.len() {
            break;
        }
        // least valuable attacker first
        let mut lva: Option<(Square, Piece)> = None;
        for sq in ours {
            let piece = board.piece_on(sq).expect("attacker exists");
            if lva.is_none_or(|(_, best)| see_value(piece) < see_value(best)) {
                lva = Some((sq, piece));
            }
        }
        let (sq, piece) = lva.expect("nonempty attacker set");

        d += 1;
        gain[d] = on_square - gain[d - 1];
        if gain[d].max(-gain[d - 1]) < 0 {
            break;
        }
        occupied ^= BitBoard::from_square(sq);
        on_square = see_value(piece);
        side = !side;
    }

    while d > 0 {
        gain[d - 1] = -((-gain[d - 1]).max(gain[d]));
        d -= 1;
    }
    gain[0]
}

/// One aspiration attempt's worth of search. Borrows the engine-owned
/// table state; owns its per-attempt stats.
pub struct Searcher<'a> {
    pub tt: &'a mut TranspositionTable,
    pub state: &'a mut SearchState,
    pub cfg: &'a EngineConfig,
    pub ctrl: &'a SearchControl,
    pub stats: SearchStats,
    use_quiescence: bool,
    allow_iid: bool,
    nmp_barred_ply: i32,
}

impl<'a> Searcher<'a> {
    pub fn new(
        tt: &'a mut TranspositionTable,
        state: &'a mut SearchState,
        cfg: &'a EngineConfig,
        ctrl: &'a SearchControl,
        use_quiescence: bool,
        allow_iid: bool,
    ) -> Self {
        Self {
            tt,
            state,
            cfg,
            ctrl,
            stats: SearchStats::default(),
            use_quiescence,
            allow_iid,
            nmp_barred_ply: -1,
        }
    }

    fn must_stop(&mut self) -> bool {
        if self.stats.stopped {
            return true;
        }
        if self.ctrl.stop_requested()
            || ((self.stats.nodes & NODE_POLL_MASK) == 0 && self.ctrl.hard_expired())
        {
            self.stats.stopped = true;
            return true;
        }
        false
    }

    fn evaluate(&mut self, pos: &Position) -> Score {
        let key = pos.key();
        if let Some(v) = self.state.eval_cache.probe(key) {
            return v;
        }
        let v = evaluate_stm(pos, self.cfg);
        self.state.eval_cache.store(key, v);
        v
    }

    /// Static eval plus the learned correction, used by the pruning gates
    /// only: the correction never reaches a returned score.
    fn corrected_eval(&mut self, pos: &Position) -> (Score, Score) {
        let raw = self.evaluate(pos);
        if !self.cfg.use_correction_history || self.cfg.correction_scale == 0 {
            return (raw, raw);
        }
        let corr = self.state.corrections.get(pos.turn().to_index(), pos.pawn_key());
        (raw, raw + corr * self.cfg.correction_scale / 100)
    }

    /// Draw score with contempt: repetition and fifty-move draws lean
    /// against the side that stands better. Stalemates and dead material
    /// stay at exactly zero.
    fn contempt_draw_score(&mut self, pos: &Position) -> Score {
        let scale = self.cfg.draw_contempt_scale_cp;
        if scale == 0 {
            return DRAW_SCORE;
        }
        let eval = self.evaluate(pos);
        if eval.abs() < self.cfg.draw_contempt_threshold_cp {
            return DRAW_SCORE;
        }
        let magnitude = (eval.abs() * scale / 100).min(self.cfg.draw_contempt_max_cp);
        -eval.signum() * magnitude
    }

    /// Quiescence: resolve captures (and queen promotions) so the leaf
    /// evaluation is not taken in the middle of an exchange. In check,
    /// search every evasion instead and detect mates.
    pub fn qsearch(&mut self, pos: &mut Position, ply: usize, mut alpha: Score, beta: Score) -> Score {
        if self.must_stop() {
            return alpha;
        }
        self.stats.nodes += 1;

        if ply >= MAX_PLY - 1 {
            return self.evaluate(pos);
        }

        // evasion lines recurse through quiet moves, so draws by rule can
        // arise inside quiescence too
        if pos.is_repetition() || pos.is_fifty_move_draw() {
            return self.contempt_draw_score(pos);
        }

        let in_check = pos.in_check();
        let board = *pos.board();

        let mut moves: ArrayVec<(ChessMove, i32), 64> = ArrayVec::new();

        if in_check {
            let gen = MoveGen::new_legal(&board);
            for m in gen {
                let score = if pos.is_capture(m) {
                    board.piece_on(m.get_dest()).map_or(100, piece_value) * 16
                } else {
                    0
                };
                let _ = moves.try_push((m, score));
            }
            if moves.is_empty() {
                return -MATE_SCORE + ply as Score;
            }
        } else {
            let stand_pat = self.evaluate(pos);
            if stand_pat >= beta {
                return beta;
            }
            if stand_pat > alpha {
                alpha = stand_pat;
            }

            let mut gen = MoveGen::new_legal(&board);
            gen.set_iterator_mask(capture_mask(&board));
            for m in &mut gen {
                // losing captures cannot beat stand-pat often enough to pay
                if static_exchange_eval(&board, m) < 0 {
                    continue;
                }
                let victim = board.piece_on(m.get_dest()).map_or(100, piece_value);
                let attacker = board.piece_on(m.get_source()).map_or(0, piece_value);
                let _ = moves.try_push((m, victim * 16 - attacker));
            }
            gen.set_iterator_mask(!EMPTY);
            for m in &mut gen {
                if m.get_promotion() == Some(Piece::Queen) {
                    let _ = moves.try_push((m, piece_value(Piece::Queen) * 16));
                }
            }
        }

        moves.sort_unstable_by_key(|&(_, s)| -s);

        for &(m, _) in &moves {
            pos.make_move(m);
            let score = -self.qsearch(pos, ply + 1, -beta, -alpha);
            pos.unmake_move();
            if self.stats.stopped {
                return alpha;
            }
            if score >= beta {
                return beta;
            }
            if score > alpha {
                alpha = score;
            }
        }

        alpha
    }

    /// Negamax alpha-beta over the move picker, fail-soft.
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub fn negamax(
        &mut self,
        pos: &mut Position,
        depth: i32,
        ply: usize,
        mut alpha: Score,
        mut beta: Score,
        is_pv: bool,
    ) -> Score {
        if self.must_stop() {
            return alpha;
        }

        if ply >= MAX_PLY - 1 {
            return self.evaluate(pos);
        }

        // draw conditions are settled before the quiescence hand-off, so a
        // drawn node is never scored by stand-pat
        if pos.is_repetition() || pos.is_fifty_move_draw() {
            return self.contempt_draw_score(pos);
        }
        if pos.has_insufficient_material() {
            return DRAW_SCORE;
        }

        // mate-distance pruning: the window cannot escape mate-in-ply
        alpha = alpha.max(-MATE_SCORE + ply as Score);
        beta = beta.min(MATE_SCORE - ply as Score - 1);
        if alpha >= beta {
            return alpha;
        }

        if depth <= 0 {
            if self.use_quiescence {
                return self.qsearch(pos, ply, alpha, beta);
            }
            self.stats.nodes += 1;
            return self.evaluate(pos);
        }

        self.stats.nodes += 1;

        let key = pos.key();
        let tt_entry = self.tt.probe(key);
        if tt_entry.is_some() {
            self.stats.tt_hits += 1;
        } else {
            self.stats.tt_misses += 1;
        }
        let mut tt_move = tt_entry.and_then(|e| e.best_move);

        if let Some(e) = tt_entry {
            if !is_pv && e.depth >= depth {
                let adjusted = value_from_tt(e.value, ply);
                match e.flag {
                    Bound::Exact => return adjusted,
                    Bound::Lower if adjusted >= beta => return adjusted,
                    Bound::Upper if adjusted <= alpha => return adjusted,
                    _ => {}
                }
            }
        }

        let in_check = pos.in_check();
        let (static_eval, corrected) = if in_check {
            (-INFINITY, -INFINITY)
        } else {
            self.corrected_eval(pos)
        };

        if !is_pv && !in_check {
            // razoring: a hopeless shallow node must prove itself with a
            // null-window quiescence before being abandoned
            if self.cfg.use_razoring && (2..=3).contains(&depth) && alpha.abs() < MATE_BOUND {
                let margin = if depth == 2 {
                    self.cfg.razor_margin_d2
                } else {
                    self.cfg.razor_margin_d3
                };
                if corrected + margin <= alpha {
                    self.stats.razor_attempts += 1;
                    let v = self.qsearch(pos, ply, alpha - 1, alpha);
                    if v <= alpha && !self.stats.stopped {
                        self.stats.razor_cutoffs += 1;
                        return v;
                    }
                }
            }

            // reverse futility: a pawn per ply of margin
            if corrected - depth * 100 >= beta && corrected.abs() < MATE_BOUND {
                return corrected;
            }

            // null move: hand over the move and see if the position still
            // fails high at reduced depth
            if self.cfg.use_null_move_pruning
                && depth >= 3
                && corrected >= beta
                && beta.abs() < MATE_BOUND
                && pos.has_non_pawn_material()
                && self.nmp_barred_ply != ply as i32
            {
                let r = 3 + depth / 4 + ((corrected - beta) / 256).min(2);
                let reduced = (depth - 1 - r).max(0);
                if pos.make_null_move() {
                    self.state.frames[ply] = PlyFrame::default();
                    let v = -self.negamax(pos, reduced, ply + 1, -beta, -beta + 1, false);
                    pos.unmake_null_move();
                    if self.stats.stopped {
                        return alpha;
                    }
                    if v >= beta {
                        // a very shallow verification guards zugzwang
                        if reduced <= 2 {
                            let saved = self.nmp_barred_ply;
                            self.nmp_barred_ply = ply as i32;
                            let vv = self.negamax(pos, reduced, ply, beta - 1, beta, false);
                            self.nmp_barred_ply = saved;
                            if vv >= beta {
                                return beta;
                            }
                        } else {
                            return beta;
                        }
                    }
                }
            }

            // ProbCut: a good capture that beats beta by a margin at
            // reduced depth is taken as proof of a cutoff
            if self.cfg.use_probcut && depth >= 5 && beta.abs() < MATE_BOUND {
                let rbeta = beta + PROBCUT_MARGIN;
                let board = *pos.board();
                let mut gen = MoveGen::new_legal(&board);
                gen.set_iterator_mask(capture_mask(&board));
                for m in &mut gen {
                    if static_exchange_eval(&board, m) < PROBCUT_MARGIN {
                        continue;
                    }
                    self.state.frames[ply] = PlyFrame {
                        cont: pos.piece_index_on(m.get_source()).map(|p| (p, m.get_dest())),
                    };
                    pos.make_move(m);
                    let v = -self.negamax(pos, depth - 4, ply + 1, -rbeta, -rbeta + 1, false);
                    pos.unmake_move();
                    if self.stats.stopped {
                        return alpha;
                    }
                    if v >= rbeta {
                        return v;
                    }
                }
            }
        }

        // internal iterative deepening: a PV node with no hash move gets a
        // reduced self-search to populate the TT first
        if is_pv && tt_move.is_none() && depth >= 4 && self.allow_iid && self.cfg.use_iid {
            self.allow_iid = false;
            self.negamax(pos, depth - 2, ply, alpha, beta, true);
            self.allow_iid = true;
            if self.stats.stopped {
                return alpha;
            }
            tt_move = self.tt.probe(key).and_then(|e| e.best_move);
        }

        let prev_frame = self.state.conthist_frame(ply, 1);
        let counter = prev_frame.and_then(|(p, to)| self.state.counters.get(p, to));
        let prev_to = prev_frame.map(|(_, to)| to);
        let side = pos.turn().to_index();

        let mut picker = MovePicker::new(
            tt_move,
            self.state.killers_at(ply),
            counter,
            prev_to,
            depth,
            ply,
        );

        let orig_alpha = alpha;
        let mut best = -INFINITY;
        let mut best_move: Option<ChessMove> = None;
        let mut moves_made = 0usize;
        let mut searched_quiets: ArrayVec<ChessMove, 128> = ArrayVec::new();
        let mut searched_captures: ArrayVec<ChessMove, 64> = ArrayVec::new();

        while let Some(m) = picker.next(pos, self.state, self.cfg, &mut self.stats) {
            let is_capture = pos.is_capture(m);
            let is_quiet = pos.is_quiet(m);

            // move-count pruning: late quiets at non-PV nodes are skipped
            // wholesale once a reasonable score exists
            if self.cfg.use_move_count_pruning
                && !is_pv
                && !in_check
                && is_quiet
                && best > -MATE_BOUND
                && moves_made >= move_count_limit(depth)
            {
                picker.skip_quiets = true;
                continue;
            }

            if picker.stage > crate::movepicker::Stage::Quiets && is_capture {
                self.stats.badcap_searched += 1;
            }

            let board_before = *pos.board();
            self.state.frames[ply] = PlyFrame {
                cont: pos.piece_index_on(m.get_source()).map(|p| (p, m.get_dest())),
            };
            pos.make_move(m);
            moves_made += 1;

            let gives_check = pos.in_check();
            let extension =
                i32::from(gives_check && static_exchange_eval(&board_before, m) >= 0);
            let new_depth = depth - 1 + extension;

            if depth >= 10 && is_quiet {
                self.stats.quiet_searched_ge10 += 1;
            }

            let score = if moves_made == 1 {
                -self.negamax(pos, new_depth, ply + 1, -beta, -alpha, is_pv)
            } else {
                let mut r = 0;
                if depth >= 3 && !in_check && !gives_check {
                    r = self.state.lmr_reduction(depth, moves_made);
                    if is_pv {
                        r -= 1;
                    }
                    if is_quiet && self.state.history.get(side, m) < 0 {
                        r += 1;
                    }
                    if self.state.killers_at(ply).contains(&Some(m)) || counter == Some(m) {
                        r -= 1;
                    }
                    r = r.clamp(0, depth - 1);
                }

                let mut s = -self.negamax(pos, new_depth - r, ply + 1, -alpha - 1, -alpha, false);
                if s > alpha && r > 0 {
                    if depth >= 10 && is_quiet {
                        self.stats.quiet_researched_ge10 += 1;
                    }
                    s = -self.negamax(pos, new_depth, ply + 1, -alpha - 1, -alpha, false);
                }
                if is_pv && s > alpha && s < beta {
                    if depth >= 10 && is_quiet {
                        self.stats.quiet_researched_ge10 += 1;
                    }
                    s = -self.negamax(pos, new_depth, ply + 1, -beta, -alpha, true);
                }
                s
            };

            pos.unmake_move();

            if self.stats.stopped {
                return alpha;
            }

            if score > best {
                best = score;
                best_move = Some(m);
            }
            if score > alpha {
                alpha = score;
                if alpha >= beta {
                    self.update_cutoff_heuristics(
                        pos,
                        m,
                        is_quiet,
                        is_capture,
                        depth,
                        ply,
                        &searched_quiets,
                        &searched_captures,
                    );
                    break;
                }
            }

            if is_quiet {
                let _ = searched_quiets.try_push(m);
            } else if is_capture {
                let _ = searched_captures.try_push(m);
            }
        }

        if moves_made == 0 {
            if in_check {
                return -MATE_SCORE + ply as Score;
            }
            return DRAW_SCORE;
        }

        let flag = if best >= beta {
            Bound::Lower
        } else if best > orig_alpha {
            Bound::Exact
        } else {
            Bound::Upper
        };
        self.tt.store(key, depth, flag, value_to_tt(best, ply), best_move);

        // teach the correction table when the static eval missed what the
        // search proved, but only on unpruned, non-tactical outcomes
        if self.cfg.use_correction_history
            && !in_check
            && !is_mate_score(best)
            && best_move.is_none_or(|m| !pos.is_capture(m))
        {
            let consistent = match flag {
                Bound::Exact => true,
                Bound::Lower => best > static_eval,
                Bound::Upper => best < static_eval,
            };
            if consistent {
                self.state.corrections.update(
                    side,
                    pos.pawn_key(),
                    static_eval,
                    best,
                    depth,
                );
            }
        }

        best
    }

    #[allow(clippy::too_many_arguments)]
    fn update_cutoff_heuristics(
        &mut self,
        pos: &Position,
        m: ChessMove,
        is_quiet: bool,
        is_capture: bool,
        depth: i32,
        ply: usize,
        searched_quiets: &[ChessMove],
        searched_captures: &[ChessMove],
    ) {
        let side = pos.turn().to_index();
        if is_quiet {
            self.state.insert_killer(ply, m);
            if let Some((prev_piece, prev_to)) = self.state.conthist_frame(ply, 1) {
                self.state.counters.add(prev_piece, prev_to, m);
            }
            if self.cfg.use_history_heuristic {
                self.state.history.update(side, m, depth, true);
                for &q in searched_quiets {
                    self.state.history.update(side, q, depth, false);
                }
            }
            if self.cfg.use_continuation_history {
                for (slot, back) in [(0usize, 1usize), (1, 2)] {
                    let Some(prev) = self.state.conthist_frame(ply, back) else {
                        continue;
                    };
                    if let Some(piece) = pos.piece_index_on(m.get_source()) {
                        self.state
                            .cont_history
                            .update(slot, prev, piece, m.get_dest(), depth, true);
                    }
                    for &q in searched_quiets {
                        if let Some(piece) = pos.piece_index_on(q.get_source()) {
                            self.state
                                .cont_history
                                .update(slot, prev, piece, q.get_dest(), depth, false);
                        }
                    }
                }
            }
        } else if is_capture && self.cfg.use_capture_history {
            let update = |state: &mut SearchState, mv: ChessMove, good: bool| {
                let Some(piece) = pos.board().piece_on(mv.get_source()) else {
                    return;
                };
                let victim = pos
                    .board()
                    .piece_on(mv.get_dest())
                    .map_or(Piece::Pawn.to_index(), |p| p.to_index());
                state
                    .capture_history
                    .update(piece.to_index(), mv.get_dest(), victim, depth, good);
            };
            update(self.state, m, true);
            for &c in searched_captures {
                update(self.state, c, false);
            }
        }
    }

    /// One iteration of root search at the given depth. Returns None if
    /// there are no legal moves, or if the search was interrupted before
    /// the iteration could complete.
    pub fn find_best_move(
        &mut self,
        pos: &mut Position,
        depth: i32,
        alpha0: Score,
        beta: Score,
        root_moves: &mut Vec<RootMove>,
    ) -> Option<(ChessMove, Score)> {
        self.stats.depth_requested = depth;
        pos.set_search_root();

        if root_moves.is_empty() {
            root_moves.extend(
                pos.legal_moves()
                    .map(|mov| RootMove { mov, last_score: 0 }),
            );
        }
        if root_moves.is_empty() {
            self.stats.is_mate = pos.in_check();
            self.stats.is_draw = !pos.in_check();
            return None;
        }
        self.stats.root_branching_factor = root_moves.len();

        // the root position may already be drawn by rule; report the draw
        // score (with contempt where it applies) behind a legal move
        if pos.is_repetition() || pos.is_fifty_move_draw() {
            self.stats.is_draw = true;
            let score = self.contempt_draw_score(pos);
            let best = root_moves[0].mov;
            self.stats.depth_reached = depth;
            self.stats.score = score;
            self.stats.best_move = Some(best);
            return Some((best, score));
        }
        if pos.has_insufficient_material() {
            self.stats.is_draw = true;
            let best = root_moves[0].mov;
            self.stats.depth_reached = depth;
            self.stats.score = DRAW_SCORE;
            self.stats.best_move = Some(best);
            return Some((best, DRAW_SCORE));
        }

        let mut alpha = alpha0;
        let mut best = -INFINITY;
        let mut best_move: Option<ChessMove> = None;

        for i in 0..root_moves.len() {
            let m = root_moves[i].mov;

            self.state.frames[0] = PlyFrame {
                cont: pos.piece_index_on(m.get_source()).map(|p| (p, m.get_dest())),
            };
            let is_quiet = pos.is_quiet(m);
            pos.make_move(m);
            let gives_check = pos.in_check();

            let score = if i == 0 {
                -self.negamax(pos, depth - 1, 1, -beta, -alpha, true)
            } else {
                let mut r = 0;
                if depth >= 3 && is_quiet && !gives_check {
                    r = self.state.lmr_reduction(depth, i + 1).clamp(0, depth - 1);
                }
                let mut s = -self.negamax(pos, depth - 1 - r, 1, -alpha - 1, -alpha, false);
                if s > alpha {
                    s = -self.negamax(pos, depth - 1, 1, -beta, -alpha, true);
                }
                s
            };

            pos.unmake_move();

            if self.stats.stopped {
                return None;
            }

            root_moves[i].last_score = score;

            if score > best {
                best = score;
                if best_move.is_some() && best_move != Some(m) {
                    self.stats.best_move_changes += 1;
                }
                best_move = Some(m);
            }
            if score > alpha {
                alpha = score;
                if alpha >= beta {
                    break;
                }
            }
        }

        // next iteration searches the strongest line first
        root_moves.sort_by_key(|rm| -rm.last_score);

        let best_move = best_move.expect("at least one root move was searched");
        let flag = if best >= beta {
            Bound::Lower
        } else if best > alpha0 {
            Bound::Exact
        } else {
            Bound::Upper
        };
        self.tt
            .store(pos.key(), depth, flag, value_to_tt(best, 0), Some(best_move));

        self.stats.depth_reached = depth;
        self.stats.score = best;
        self.stats.best_move = Some(best_move);
        Some((best_move, best))
    }
}

const fn move_count_limit(depth: i32) -> usize {
    (3 + depth * depth) as usize
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn run_fixed_depth(fen: &str, depth: i32) -> (Option<(ChessMove, Score)>, SearchStats) {
        let mut pos = Position::from_fen(fen).unwrap();
        let mut tt = TranspositionTable::new(1 << 16);
        let mut state = SearchState::new();
        let cfg = EngineConfig::default();
        let ctrl = SearchControl::new(None);
        let mut searcher = Searcher::new(&mut tt, &mut state, &cfg, &ctrl, true, true);
        let mut root_moves = Vec::new();
        let result =
            searcher.find_best_move(&mut pos, depth, -INFINITY, INFINITY, &mut root_moves);
        (result, searcher.stats.clone())
    }

    #[test]
    fn see_simple_hanging_piece() {
        let pos = Position::from_fen("6k1/8/8/3r4/8/3Q4/8/6K1 w - - 0 1").unwrap();
        let m = ChessMove::from_str("d3d5").unwrap();
        assert_eq!(static_exchange_eval(pos.board(), m), 500);
    }

    #[test]
    fn see_defended_piece_costs_the_queen() {
        // queen takes a rook defended by a pawn: +500 - 900 = -400
        let pos = Position::from_fen("6k1/4p3/3r4/8/8/3Q4/8/6K1 w - - 0 1").unwrap();
        let m = ChessMove::from_str("d3d6").unwrap();
        assert_eq!(static_exchange_eval(pos.board(), m), 500 - 900);
    }

    #[test]
    fn see_equal_exchange_is_zero() {
        // rook takes rook, recaptured by rook
        let pos = Position::from_fen("3r2k1/8/8/3r4/8/8/3R4/6K1 w - - 0 1").unwrap();
        let m = ChessMove::from_str("d2d5").unwrap();
        assert_eq!(static_exchange_eval(pos.board(), m), 0);
    }

    #[test]
    fn see_two_attackers_beat_one_defender() {
        // doubled rooks against a defended rook win a full exchange
        let pos = Position::from_fen("3r2k1/8/8/3r4/8/8/3R4/3R2K1 w - - 0 1").unwrap();
        let m = ChessMove::from_str("d2d5").unwrap();
        assert_eq!(static_exchange_eval(pos.board(), m), 500);
    }

    #[test]
    fn see_pawn_takes_defended_pawn() {
        let pos =
            Position::from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2")
                .unwrap();
        let m = ChessMove::from_str("e4d5").unwrap();
        assert_eq!(static_exchange_eval(pos.board(), m), 0);
    }

    #[test]
    fn mate_in_one_is_found() {
        let (result, _) = run_fixed_depth("6k1/5ppp/8/8/8/8/8/R6K w - - 0 1", 3);
        let (best, score) = result.unwrap();
        assert_eq!(best, ChessMove::from_str("a1a8").unwrap());
        assert_eq!(score, MATE_SCORE - 1);
    }

    #[test]
    fn mated_side_reports_distance() {
        // black's only move is Kg8, after which Ra8 is mate: mated in 2 plies
        let (result, _) = run_fixed_depth("7k/8/6K1/8/8/8/8/R7 b - - 0 1", 4);
        let (_, score) = result.unwrap();
        assert_eq!(score, -(MATE_SCORE - 2));
    }

    #[test]
    fn stalemate_has_no_best_move() {
        let (result, stats) = run_fixed_depth("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 1);
        assert!(result.is_none());
        assert!(stats.is_draw);
        assert!(!stats.is_mate);
    }

    #[test]
    fn checkmated_root_is_flagged() {
        let (result, stats) = run_fixed_depth("R6k/6pp/8/8/8/8/8/4K3 b - - 0 1", 1);
        assert!(result.is_none());
        assert!(stats.is_mate);
    }

    #[test]
    fn fixed_depth_search_is_deterministic() {
        let fen = "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3";
        let (a, _) = run_fixed_depth(fen, 5);
        let (b, _) = run_fixed_depth(fen, 5);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn rook_up_endgame_scores_winning() {
        let fen = "6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1";
        let (result, _) = run_fixed_depth(fen, 6);
        let (best, score) = result.unwrap();
        assert!(score > 300, "rook-up score was only {score}");
        assert!(Position::from_fen(fen).unwrap().is_legal(best));
    }

    #[test]
    fn stop_flag_interrupts_the_search() {
        let stop = Arc::new(AtomicBool::new(true));
        let mut pos = Position::startpos();
        let mut tt = TranspositionTable::new(1 << 14);
        let mut state = SearchState::new();
        let cfg = EngineConfig::default();
        let ctrl = SearchControl::new(Some(stop));
        let mut searcher = Searcher::new(&mut tt, &mut state, &cfg, &ctrl, true, true);
        let mut root_moves = Vec::new();
        let result = searcher.find_best_move(&mut pos, 10, -INFINITY, INFINITY, &mut root_moves);
        assert!(result.is_none());
        assert!(searcher.stats.stopped);
    }

    #[test]
    fn search_returns_a_legal_root_move() {
        let (result, _) = run_fixed_depth(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            4,
        );
        let (best, _) = result.unwrap();
        let pos = Position::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert!(pos.is_legal(best));
    }
}
