//! Move-ordering heuristic tables. These live for the whole game: they are
//! owned by the search state and reset only on `ucinewgame`.

use chess::{ChessMove, Square};

use crate::definitions::Score;

pub const MAX_HISTORY: i32 = i16::MAX as i32 / 2;

const N_SQUARES: usize = 64;
/// Coloured pieces: piece type * 2 + colour.
const N_PIECES: usize = 12;
const N_PIECE_TYPES: usize = 6;

/// How many plies back continuation history looks.
pub const CONT_SLOTS: usize = 2;

const CORRECTION_SIZE: usize = 16384;
const CORRECTION_MAX: i32 = 512;

fn history_bonus(depth: i32) -> i32 {
    (if depth > 13 { 32 } else { 16 }) * depth * depth + 128 * (depth - 1).max(0)
}

/// Gravity update: the bonus decays proportionally to how saturated the
/// entry already is, which bounds every entry to +/-MAX_HISTORY.
fn update_entry(val: &mut i16, delta: i32) {
    let v = i32::from(*val);
    *val = (v + delta - v * delta.abs() / MAX_HISTORY) as i16;
}

/// Quiet-move history, butterfly indexed: [side][from][to].
#[derive(Clone)]
pub struct HistoryTable {
    table: Box<[[[i16; N_SQUARES]; N_SQUARES]; 2]>,
}

impl HistoryTable {
    #[must_use]
    pub fn new() -> Self {
        Self { table: Box::new([[[0; N_SQUARES]; N_SQUARES]; 2]) }
    }

    pub fn clear(&mut self) {
        self.table.iter_mut().flatten().flatten().for_each(|x| *x = 0);
    }

    #[must_use]
    pub fn get(&self, side: usize, m: ChessMove) -> i32 {
        i32::from(self.table[side][m.get_source().to_index()][m.get_dest().to_index()])
    }

    pub fn update(&mut self, side: usize, m: ChessMove, depth: i32, good: bool) {
        let delta = if good { history_bonus(depth) } else { -history_bonus(depth) };
        let val = &mut self.table[side][m.get_source().to_index()][m.get_dest().to_index()];
        update_entry(val, delta);
    }
}

/// Capture history: [moving piece type][to][captured piece type].
#[derive(Clone)]
pub struct CaptureHistoryTable {
    table: Box<[[[i16; N_PIECE_TYPES]; N_SQUARES]; N_PIECE_TYPES]>,
}

impl CaptureHistoryTable {
    #[must_use]
    pub fn new() -> Self {
        Self { table: Box::new([[[0; N_PIECE_TYPES]; N_SQUARES]; N_PIECE_TYPES]) }
    }

    pub fn clear(&mut self) {
        self.table.iter_mut().flatten().flatten().for_each(|x| *x = 0);
    }

    #[must_use]
    pub fn get(&self, piece: usize, to: Square, captured: usize) -> i32 {
        i32::from(self.table[piece][to.to_index()][captured])
    }

    pub fn update(&mut self, piece: usize, to: Square, captured: usize, depth: i32, good: bool) {
        let delta = if good { history_bonus(depth) } else { -history_bonus(depth) };
        update_entry(&mut self.table[piece][to.to_index()][captured], delta);
    }
}

/// Continuation history: [prev piece][prev to][piece][to], one table per
/// ply-back slot. Flat storage; the nested-array form would be over two
/// megabytes of stack temporaries.
#[derive(Clone)]
pub struct ContinuationHistoryTable {
    table: Vec<i16>,
}

impl ContinuationHistoryTable {
    const SLOT_LEN: usize = N_PIECES * N_SQUARES * N_PIECES * N_SQUARES;

    #[must_use]
    pub fn new() -> Self {
        Self { table: vec![0; CONT_SLOTS * Self::SLOT_LEN] }
    }

    pub fn clear(&mut self) {
        self.table.fill(0);
    }

    fn index(slot: usize, prev_piece: usize, prev_to: usize, piece: usize, to: usize) -> usize {
        slot * Self::SLOT_LEN
            + ((prev_piece * N_SQUARES + prev_to) * N_PIECES + piece) * N_SQUARES
            + to
    }

    #[must_use]
    pub fn get(&self, slot: usize, prev: (usize, Square), piece: usize, to: Square) -> i32 {
        i32::from(
            self.table
                [Self::index(slot, prev.0, prev.1.to_index(), piece, to.to_index())],
        )
    }

    pub fn update(
        &mut self,
        slot: usize,
        prev: (usize, Square),
        piece: usize,
        to: Square,
        depth: i32,
        good: bool,
    ) {
        let delta = if good { history_bonus(depth) } else { -history_bonus(depth) };
        let idx = Self::index(slot, prev.0, prev.1.to_index(), piece, to.to_index());
        update_entry(&mut self.table[idx], delta);
    }
}

/// Counter moves: [prev piece][prev to] -> the quiet refutation last seen.
#[derive(Clone)]
pub struct CounterMoveTable {
    table: Vec<Option<ChessMove>>,
}

impl CounterMoveTable {
    #[must_use]
    pub fn new() -> Self {
        Self { table: vec![None; N_PIECES * N_SQUARES] }
    }

    pub fn clear(&mut self) {
        self.table.fill(None);
    }

    #[must_use]
    pub fn get(&self, prev_piece: usize, prev_to: Square) -> Option<ChessMove> {
        self.table[prev_piece * N_SQUARES + prev_to.to_index()]
    }

    pub fn add(&mut self, prev_piece: usize, prev_to: Square, m: ChessMove) {
        self.table[prev_piece * N_SQUARES + prev_to.to_index()] = Some(m);
    }
}

/// A learned static-eval correction, indexed by side and pawn structure.
/// The correction feeds the pruning gates only, never a returned score.
#[derive(Clone)]
pub struct CorrectionHistoryTable {
    table: Box<[[i16; CORRECTION_SIZE]; 2]>,
}

impl CorrectionHistoryTable {
    #[must_use]
    pub fn new() -> Self {
        Self { table: vec![[0; CORRECTION_SIZE]; 2].try_into().expect("two rows") }
    }

    pub fn clear(&mut self) {
        self.table.iter_mut().flatten().for_each(|x| *x = 0);
    }

    const fn idx(pawn_key: u64) -> usize {
        pawn_key as usize % CORRECTION_SIZE
    }

    #[must_use]
    pub fn get(&self, side: usize, pawn_key: u64) -> Score {
        i32::from(self.table[side][Self::idx(pawn_key)])
    }

    /// Interpolate toward the observed error `best - static_eval`, weighted
    /// by depth. Clamped to keep the table stable.
    pub fn update(
        &mut self,
        side: usize,
        pawn_key: u64,
        static_eval: Score,
        best: Score,
        depth: i32,
    ) {
        let error = (best - static_eval).clamp(-CORRECTION_MAX, CORRECTION_MAX);
        let cur = i32::from(self.table[side][Self::idx(pawn_key)]);
        let weight = depth.clamp(1, 16);
        let new = cur + (error - cur) * weight / 16;
        self.table[side][Self::idx(pawn_key)] =
            new.clamp(-CORRECTION_MAX, CORRECTION_MAX) as i16;
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn history_updates_stay_bounded() {
        let mut hist = HistoryTable::new();
        let m = ChessMove::from_str("e2e4").unwrap();
        for _ in 0..10_000 {
            hist.update(0, m, 12, true);
        }
        assert!(hist.get(0, m) <= MAX_HISTORY);
        for _ in 0..10_000 {
            hist.update(0, m, 12, false);
        }
        assert!(hist.get(0, m) >= -MAX_HISTORY);
    }

    #[test]
    fn correction_tracks_error_sign() {
        let mut corr = CorrectionHistoryTable::new();
        for _ in 0..32 {
            corr.update(0, 0xABCD, 100, 180, 8);
        }
        let c = corr.get(0, 0xABCD);
        assert!(c > 0 && c <= 80, "correction {c} should approach +80");
        // other side and other keys untouched
        assert_eq!(corr.get(1, 0xABCD), 0);
        assert_eq!(corr.get(0, 0xABCE), 0);
    }

    #[test]
    fn counter_move_slots_are_per_piece_square() {
        let mut counters = CounterMoveTable::new();
        let m = ChessMove::from_str("g8f6").unwrap();
        counters.add(3, Square::E4, m);
        assert_eq!(counters.get(3, Square::E4), Some(m));
        assert_eq!(counters.get(3, Square::E5), None);
        assert_eq!(counters.get(4, Square::E4), None);
    }
}
