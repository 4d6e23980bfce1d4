//! Staged lazy move ordering. Stages advance on demand, so a node that
//! cuts off on the hash move never pays for move generation, and quiets are
//! only generated and scored once the captures have run out.

use arrayvec::ArrayVec;
use chess::{ChessMove, Square, EMPTY};

use crate::{
    config::EngineConfig,
    position::{capture_mask, Position},
    search::{static_exchange_eval, SearchState, SearchStats},
    evaluation::piece_value,
};

const RECAPTURE_BIAS: i32 = 8_000;
const PROMOTION_BONUS: i32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    TtMove,
    GenCaptures,
    GoodCaptures,
    Killer1,
    Killer2,
    Counter,
    GenQuiets,
    Quiets,
    BadCaptures,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct ScoredMove {
    mov: ChessMove,
    score: i32,
}

pub struct MovePicker {
    pub stage: Stage,
    tt_move: Option<ChessMove>,
    killers: [Option<ChessMove>; 2],
    counter: Option<ChessMove>,
    prev_to: Option<Square>,
    depth: i32,
    ply: usize,
    /// Set by the pruning gates: stop yielding quiets and bad captures.
    pub skip_quiets: bool,
    gen: Option<chess::MoveGen>,
    good_captures: ArrayVec<ScoredMove, 64>,
    bad_captures: ArrayVec<ScoredMove, 64>,
    quiets: ArrayVec<ScoredMove, 128>,
    good_idx: usize,
    bad_idx: usize,
    quiet_idx: usize,
}

impl MovePicker {
    #[must_use]
    pub fn new(
        tt_move: Option<ChessMove>,
        killers: [Option<ChessMove>; 2],
        counter: Option<ChessMove>,
        prev_to: Option<Square>,
        depth: i32,
        ply: usize,
    ) -> Self {
        Self {
            stage: Stage::TtMove,
            tt_move,
            killers,
            counter,
            prev_to,
            depth,
            ply,
            skip_quiets: false,
            gen: None,
            good_captures: ArrayVec::new(),
            bad_captures: ArrayVec::new(),
            quiets: ArrayVec::new(),
            good_idx: 0,
            bad_idx: 0,
            quiet_idx: 0,
        }
    }

    /// Select the next move to try. Returns None when the node is out of
    /// moves. Amortised O(1): each stage does its work once.
    #[allow(clippy::too_many_lines)]
    pub fn next(
        &mut self,
        pos: &Position,
        state: &SearchState,
        cfg: &EngineConfig,
        stats: &mut SearchStats,
    ) -> Option<ChessMove> {
        if self.stage == Stage::TtMove {
            self.stage = Stage::GenCaptures;
            if let Some(tt_move) = self.tt_move {
                if pos.is_legal(tt_move) {
                    return Some(tt_move);
                }
                self.tt_move = None;
            }
        }
        if self.stage == Stage::GenCaptures {
            self.stage = Stage::GoodCaptures;
            self.generate_captures(pos, state, cfg);
            if !self.bad_captures.is_empty() {
                stats.badcap_gen_nodes += 1;
                stats.badcap_generated += self.bad_captures.len() as u64;
            }
        }
        if self.stage == Stage::GoodCaptures {
            while let Some(e) = self.good_captures.get(self.good_idx) {
                self.good_idx += 1;
                if Some(e.mov) != self.tt_move {
                    return Some(e.mov);
                }
            }
            self.stage = Stage::Killer1;
        }
        if self.stage == Stage::Killer1 {
            self.stage = Stage::Killer2;
            if !self.skip_quiets && cfg.killer_bonus_1 > 0 {
                if let Some(k) = self.killers[0] {
                    if Some(k) != self.tt_move && pos.is_quiet(k) && pos.is_legal(k) {
                        return Some(k);
                    }
                }
            }
        }
        if self.stage == Stage::Killer2 {
            self.stage = Stage::Counter;
            if !self.skip_quiets && cfg.killer_bonus_2 > 0 {
                if let Some(k) = self.killers[1] {
                    if Some(k) != self.tt_move
                        && self.killers[0] != Some(k)
                        && pos.is_quiet(k)
                        && pos.is_legal(k)
                    {
                        return Some(k);
                    }
                }
            }
        }
        if self.stage == Stage::Counter {
            self.stage = Stage::GenQuiets;
            if !self.skip_quiets && cfg.counter_move_bonus > 0 {
                if let Some(c) = self.counter {
                    if Some(c) != self.tt_move
                        && !self.killers.contains(&Some(c))
                        && pos.is_quiet(c)
                        && pos.is_legal(c)
                    {
                        return Some(c);
                    }
                }
            }
        }
        if self.stage == Stage::GenQuiets {
            self.stage = Stage::Quiets;
            if !self.skip_quiets {
                self.generate_quiets(pos, state, cfg);
            }
        }
        if self.stage == Stage::Quiets {
            if self.skip_quiets {
                self.stage = Stage::BadCaptures;
            } else {
                while let Some(e) = self.quiets.get(self.quiet_idx) {
                    self.quiet_idx += 1;
                    let m = Some(e.mov);
                    if m != self.tt_move
                        && !self.killers.contains(&m)
                        && m != self.counter
                    {
                        return Some(e.mov);
                    }
                }
                self.stage = Stage::BadCaptures;
            }
        }
        if self.stage == Stage::BadCaptures {
            if self.skip_quiets {
                self.stage = Stage::Done;
                return None;
            }
            if self.bad_idx == 0 && !self.bad_captures.is_empty() {
                stats.badcap_nodes += 1;
            }
            while let Some(e) = self.bad_captures.get(self.bad_idx) {
                self.bad_idx += 1;
                if Some(e.mov) != self.tt_move {
                    stats.badcap_picked += 1;
                    return Some(e.mov);
                }
            }
            self.stage = Stage::Done;
        }
        None
    }

    /// Captures are generated once, scored MVV-LVA plus capture history plus
    /// SEE, and partitioned into good and bad by the SEE threshold. The
    /// threshold gains +1cp at shallow depth to preserve legacy behaviour.
    fn generate_captures(&mut self, pos: &Position, state: &SearchState, cfg: &EngineConfig) {
        let board = pos.board();
        let mut gen = chess::MoveGen::new_legal(board);
        gen.set_iterator_mask(capture_mask(board));

        let threshold = cfg.good_capture_see_threshold_cp + i32::from(self.depth <= 2);

        for m in &mut gen {
            let attacker = board.piece_on(m.get_source()).expect("mover exists");
            let victim = board.piece_on(m.get_dest()).expect("capture target exists");
            let see = static_exchange_eval(board, m);

            let mut score = piece_value(victim) * 16 - piece_value(attacker) + see * 16;
            if cfg.use_capture_history {
                let piece = attacker.to_index();
                score += state.capture_history.get(piece, m.get_dest(), victim.to_index())
                    * cfg.capture_history_mult
                    / 100;
            }

            if see >= threshold {
                let _ = self.good_captures.try_push(ScoredMove { mov: m, score });
            } else {
                score -= cfg.bad_capture_penalty_cp * 16;
                let _ = self.bad_captures.try_push(ScoredMove { mov: m, score });
            }
        }

        self.good_captures.sort_unstable_by_key(|e| -e.score);
        self.bad_captures.sort_unstable_by_key(|e| -e.score);
        self.gen = Some(gen);
    }

    /// Quiets come out of the same generator with the mask widened, so no
    /// capture is yielded twice. Scored by history, continuation history
    /// and a small recapture bias, then sorted once.
    fn generate_quiets(&mut self, pos: &Position, state: &SearchState, cfg: &EngineConfig) {
        let Some(mut gen) = self.gen.take() else {
            return;
        };
        gen.set_iterator_mask(!EMPTY);

        let side = pos.turn().to_index();
        let prev1 = state.conthist_frame(self.ply, 1);
        let prev2 = state.conthist_frame(self.ply, 2);

        for m in &mut gen {
            let mut score = 0i32;

            if m.get_promotion().is_some() {
                // non-capturing promotions surface here; order them with the
                // tactical moves rather than by history
                score += PROMOTION_BONUS + piece_value(m.get_promotion().unwrap_or(chess::Piece::Queen));
            }

            if cfg.use_history_heuristic {
                score += state.history.get(side, m) * cfg.history_mult / 100;
            }
            if cfg.use_continuation_history {
                let piece = pos.piece_index_on(m.get_source()).expect("mover exists");
                let to = m.get_dest();
                let mut cont = 0;
                if let Some(prev) = prev1 {
                    cont += state.cont_history.get(0, prev, piece, to);
                }
                if let Some(prev) = prev2 {
                    cont += state.cont_history.get(1, prev, piece, to);
                }
                score += cont * cfg.continuation_mult / 100;
            }
            if self.prev_to == Some(m.get_dest()) {
                score += RECAPTURE_BIAS;
            }

            let _ = self.quiets.try_push(ScoredMove { mov: m, score });
        }

        self.quiets.sort_unstable_by_key(|e| -e.score);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::str::FromStr;

    use super::*;

    fn drain(pos: &Position, picker: &mut MovePicker) -> Vec<ChessMove> {
        let state = SearchState::new();
        let cfg = EngineConfig::default();
        let mut stats = SearchStats::default();
        let mut out = Vec::new();
        while let Some(m) = picker.next(pos, &state, &cfg, &mut stats) {
            out.push(m);
        }
        out
    }

    #[test]
    fn yields_every_legal_move_exactly_once() {
        let pos = Position::from_fen(
            "r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4",
        )
        .unwrap();
        let mut picker = MovePicker::new(None, [None; 2], None, None, 5, 0);
        let yielded = drain(&pos, &mut picker);
        let legal: HashSet<ChessMove> = pos.legal_moves().collect();
        let unique: HashSet<ChessMove> = yielded.iter().copied().collect();
        assert_eq!(yielded.len(), unique.len(), "a move was yielded twice");
        assert_eq!(unique, legal);
    }

    #[test]
    fn tt_move_comes_first_and_is_not_repeated() {
        let pos = Position::startpos();
        let tt = ChessMove::from_str("e2e4").unwrap();
        let mut picker = MovePicker::new(Some(tt), [None; 2], None, None, 5, 0);
        let yielded = drain(&pos, &mut picker);
        assert_eq!(yielded[0], tt);
        assert_eq!(yielded.iter().filter(|&&m| m == tt).count(), 1);
        assert_eq!(yielded.len(), 20);
    }

    #[test]
    fn illegal_tt_move_is_filtered() {
        let pos = Position::startpos();
        let bogus = ChessMove::from_str("a1h8").unwrap();
        let mut picker = MovePicker::new(Some(bogus), [None; 2], None, None, 5, 0);
        let yielded = drain(&pos, &mut picker);
        assert_eq!(yielded.len(), 20);
        assert!(!yielded.contains(&bogus));
    }

    #[test]
    fn winning_capture_before_quiets() {
        // white queen can take a hanging rook
        let pos = Position::from_fen("6k1/8/8/3r4/8/3Q4/8/6K1 w - - 0 1").unwrap();
        let mut picker = MovePicker::new(None, [None; 2], None, None, 5, 0);
        let yielded = drain(&pos, &mut picker);
        assert_eq!(yielded[0], ChessMove::from_str("d3d5").unwrap());
    }

    #[test]
    fn killer_emitted_between_captures_and_quiets() {
        let pos = Position::startpos();
        let killer = ChessMove::from_str("b1c3").unwrap();
        let mut picker = MovePicker::new(None, [Some(killer), None], None, None, 5, 0);
        let yielded = drain(&pos, &mut picker);
        // no captures in the start position, so the killer leads
        assert_eq!(yielded[0], killer);
        assert_eq!(yielded.len(), 20);
    }

    #[test]
    fn in_check_yields_only_evasions() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1").unwrap();
        assert!(pos.in_check());
        let mut picker = MovePicker::new(None, [None; 2], None, None, 5, 0);
        let yielded = drain(&pos, &mut picker);
        let legal: HashSet<ChessMove> = pos.legal_moves().collect();
        assert_eq!(yielded.len(), legal.len());
        for m in yielded {
            assert!(legal.contains(&m));
        }
    }
}
