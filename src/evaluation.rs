//! Static evaluation: a pure function from position to a White-point-of-view
//! centipawn score. The search consumes it through `evaluate_stm`, which
//! flips the sign for Black.
//!
//! Term weights are configuration, so that the feature scales can be tuned
//! (or switched off) from the UCI option surface.

use chess::{
    get_bishop_moves, get_king_moves, get_knight_moves, get_pawn_attacks, get_rook_moves,
    BitBoard, Board, Color, Piece, EMPTY,
};

use crate::{config::EngineConfig, definitions::Score, position::Position};

/// Base piece values in centipawns: P, N, B, R, Q.
pub const PIECE_VALUES: [Score; 6] = [100, 320, 330, 500, 900, 0];

#[must_use]
pub fn piece_value(piece: Piece) -> Score {
    PIECE_VALUES[piece.to_index()]
}

// Piece-square tables from White's point of view, written with rank 8 as
// the first row. White squares index with `sq ^ 56`, Black with `sq`.
#[rustfmt::skip]
const PAWN_PST: [Score; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
    50, 50, 50, 50, 50, 50, 50, 50,
    10, 10, 20, 30, 30, 20, 10, 10,
     5,  5, 10, 25, 25, 10,  5,  5,
     0,  0,  0, 20, 20,  0,  0,  0,
     5, -5,-10,  0,  0,-10, -5,  5,
     5, 10, 10,-20,-20, 10, 10,  5,
     0,  0,  0,  0,  0,  0,  0,  0,
];

#[rustfmt::skip]
const KNIGHT_PST: [Score; 64] = [
   -50,-40,-30,-30,-30,-30,-40,-50,
   -40,-20,  0,  0,  0,  0,-20,-40,
   -30,  0, 10, 15, 15, 10,  0,-30,
   -30,  5, 15, 20, 20, 15,  5,-30,
   -30,  0, 15, 20, 20, 15,  0,-30,
   -30,  5, 10, 15, 15, 10,  5,-30,
   -40,-20,  0,  5,  5,  0,-20,-40,
   -50,-40,-30,-30,-30,-30,-40,-50,
];

#[rustfmt::skip]
const BISHOP_PST: [Score; 64] = [
   -20,-10,-10,-10,-10,-10,-10,-20,
   -10,  0,  0,  0,  0,  0,  0,-10,
   -10,  0,  5, 10, 10,  5,  0,-10,
   -10,  5,  5, 10, 10,  5,  5,-10,
   -10,  0, 10, 10, 10, 10,  0,-10,
   -10, 10, 10, 10, 10, 10, 10,-10,
   -10,  5,  0,  0,  0,  0,  5,-10,
   -20,-10,-10,-10,-10,-10,-10,-20,
];

#[rustfmt::skip]
const ROOK_PST: [Score; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
     5, 10, 10, 10, 10, 10, 10,  5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
     0,  0,  0,  5,  5,  0,  0,  0,
];

#[rustfmt::skip]
const QUEEN_PST: [Score; 64] = [
   -20,-10,-10, -5, -5,-10,-10,-20,
   -10,  0,  0,  0,  0,  0,  0,-10,
   -10,  0,  5,  5,  5,  5,  0,-10,
    -5,  0,  5,  5,  5,  5,  0, -5,
     0,  0,  5,  5,  5,  5,  0, -5,
   -10,  5,  5,  5,  5,  5,  0,-10,
   -10,  0,  5,  0,  0,  0,  0,-10,
   -20,-10,-10, -5, -5,-10,-10,-20,
];

#[rustfmt::skip]
const KING_PST: [Score; 64] = [
   -30,-40,-40,-50,-50,-40,-40,-30,
   -30,-40,-40,-50,-50,-40,-40,-30,
   -30,-40,-40,-50,-50,-40,-40,-30,
   -30,-40,-40,-50,-50,-40,-40,-30,
   -20,-30,-30,-40,-40,-30,-30,-20,
   -10,-20,-20,-20,-20,-20,-20,-10,
    20, 20,  0,  0,  0,  0, 20, 20,
    20, 30, 10,  0,  0, 10, 30, 20,
];

const PSTS: [&[Score; 64]; 6] =
    [&PAWN_PST, &KNIGHT_PST, &BISHOP_PST, &ROOK_PST, &QUEEN_PST, &KING_PST];

/// Manhattan distance from the board centre, for the plain-centralisation
/// fallback when the stock tables are switched off.
#[rustfmt::skip]
const CENTRE_DIST: [Score; 64] = [
    6, 5, 4, 3, 3, 4, 5, 6,
    5, 4, 3, 2, 2, 3, 4, 5,
    4, 3, 2, 1, 1, 2, 3, 4,
    3, 2, 1, 0, 0, 1, 2, 3,
    3, 2, 1, 0, 0, 1, 2, 3,
    4, 3, 2, 1, 1, 2, 3, 4,
    5, 4, 3, 2, 2, 3, 4, 5,
    6, 5, 4, 3, 3, 4, 5, 6,
];

/// Full evaluation from White's point of view.
#[must_use]
pub fn evaluate_white_pov(board: &Board, cfg: &EngineConfig) -> Score {
    let mut score = material(board, Color::White) - material(board, Color::Black);

    if cfg.pst_scale != 0 {
        let pst = pst_term(board, Color::White, cfg) - pst_term(board, Color::Black, cfg);
        score += pst * cfg.pst_scale / 100;
    }
    if cfg.mobility_scale != 0 {
        let mob = mobility(board, Color::White) - mobility(board, Color::Black);
        score += mob * 4 * cfg.mobility_scale / 100;
    }
    if cfg.king_crowding_scale != 0 {
        let crowd = king_crowding(board, Color::White) - king_crowding(board, Color::Black);
        score += crowd * 12 * cfg.king_crowding_scale / 100;
    }
    if cfg.threat_term != 0 {
        let threats = threats(board, Color::White) - threats(board, Color::Black);
        score += threats * 15 * cfg.threat_term / 100;
    }
    if cfg.xray_scale != 0 {
        let xray = xray_pressure(board, Color::White) - xray_pressure(board, Color::Black);
        score += xray * 8 * cfg.xray_scale / 100;
    }

    score
}

/// Evaluation from the point of view of the side to move.
#[must_use]
pub fn evaluate_stm(pos: &Position, cfg: &EngineConfig) -> Score {
    let white = evaluate_white_pov(pos.board(), cfg);
    match pos.turn() {
        Color::White => white,
        Color::Black => -white,
    }
}

fn material(board: &Board, side: Color) -> Score {
    let us = *board.color_combined(side);
    let mut total = 0;
    for piece in [Piece::Pawn, Piece::Knight, Piece::Bishop, Piece::Rook, Piece::Queen] {
        total += (*board.pieces(piece) & us).popcnt() as Score * piece_value(piece);
    }
    total
}

fn pst_term(board: &Board, side: Color, cfg: &EngineConfig) -> Score {
    let us = *board.color_combined(side);
    let mut total = 0;
    for sq in us {
        let piece = board.piece_on(sq).expect("occupied square");
        let idx = match side {
            Color::White => sq.to_index() ^ 56,
            Color::Black => sq.to_index(),
        };
        if cfg.use_stock_pst {
            total += PSTS[piece.to_index()][idx];
        } else if matches!(piece, Piece::Knight | Piece::Bishop) {
            total += (3 - CENTRE_DIST[idx]) * 4;
        }
    }
    total
}

fn mobility(board: &Board, side: Color) -> Score {
    let us = *board.color_combined(side);
    let occ = *board.combined();
    let mut squares = 0u32;
    for sq in us {
        let attacks = match board.piece_on(sq) {
            Some(Piece::Knight) => get_knight_moves(sq),
            Some(Piece::Bishop) => get_bishop_moves(sq, occ),
            Some(Piece::Rook) => get_rook_moves(sq, occ),
            Some(Piece::Queen) => get_bishop_moves(sq, occ) | get_rook_moves(sq, occ),
            _ => continue,
        };
        squares += (attacks & !us).popcnt();
    }
    squares as Score
}

/// How many of our non-pawn pieces bear on the zone around the enemy king.
fn king_crowding(board: &Board, side: Color) -> Score {
    let enemy_king = board.king_square(!side);
    let zone = get_king_moves(enemy_king) | BitBoard::from_square(enemy_king);
    let us = *board.color_combined(side);
    let occ = *board.combined();
    let mut attackers = 0;
    for sq in us {
        let attacks = match board.piece_on(sq) {
            Some(Piece::Knight) => get_knight_moves(sq),
            Some(Piece::Bishop) => get_bishop_moves(sq, occ),
            Some(Piece::Rook) => get_rook_moves(sq, occ),
            Some(Piece::Queen) => get_bishop_moves(sq, occ) | get_rook_moves(sq, occ),
            _ => continue,
        };
        if (attacks & zone) != EMPTY {
            attackers += 1;
        }
    }
    attackers
}

/// Attacks by a cheaper piece on a more valuable one.
fn threats(board: &Board, side: Color) -> Score {
    let them = *board.color_combined(!side);
    let us = *board.color_combined(side);
    let occ = *board.combined();
    let mut count = 0;
    for sq in us {
        let (attacks, own_value) = match board.piece_on(sq) {
            Some(Piece::Pawn) => (get_pawn_attacks(sq, side, them), piece_value(Piece::Pawn)),
            Some(Piece::Knight) => (get_knight_moves(sq) & them, piece_value(Piece::Knight)),
            Some(Piece::Bishop) => {
                (get_bishop_moves(sq, occ) & them, piece_value(Piece::Bishop))
            }
            Some(Piece::Rook) => (get_rook_moves(sq, occ) & them, piece_value(Piece::Rook)),
            _ => continue,
        };
        for target in attacks {
            if let Some(victim) = board.piece_on(target) {
                if victim != Piece::King && piece_value(victim) > own_value {
                    count += 1;
                }
            }
        }
    }
    count
}

/// Sliders aimed at the enemy king or queen through one or two blockers.
fn xray_pressure(board: &Board, side: Color) -> Score {
    let us = *board.color_combined(side);
    let occ = *board.combined();
    let them = !side;
    let royalty = (*board.pieces(Piece::Queen) & *board.color_combined(them))
        | BitBoard::from_square(board.king_square(them));
    let mut count = 0;
    for sq in us {
        let rays = match board.piece_on(sq) {
            Some(Piece::Bishop) => get_bishop_moves(sq, EMPTY),
            Some(Piece::Rook) => get_rook_moves(sq, EMPTY),
            Some(Piece::Queen) => get_bishop_moves(sq, EMPTY) | get_rook_moves(sq, EMPTY),
            _ => continue,
        };
        for target in rays & royalty {
            let blockers = (chess::between(sq, target) & occ).popcnt();
            if (1..=2).contains(&blockers) {
                count += 1;
            }
        }
    }
    count
}

/// A small always-replace cache over the full evaluation, keyed by the low
/// bits of the Zobrist hash. Cleared on `ucinewgame` to keep games
/// reproducible.
pub struct EvalCache {
    table: Vec<(u64, Score)>,
}

const EVAL_CACHE_SIZE: usize = 1 << 15;

impl EvalCache {
    #[must_use]
    pub fn new() -> Self {
        Self { table: vec![(0, 0); EVAL_CACHE_SIZE] }
    }

    pub fn clear(&mut self) {
        self.table.fill((0, 0));
    }

    #[must_use]
    pub fn probe(&self, key: u64) -> Option<Score> {
        let (k, v) = self.table[key as usize % EVAL_CACHE_SIZE];
        (k == key && key != 0).then_some(v)
    }

    pub fn store(&mut self, key: u64, value: Score) {
        self.table[key as usize % EVAL_CACHE_SIZE] = (key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_is_balanced() {
        let pos = Position::startpos();
        let cfg = EngineConfig::default();
        assert_eq!(evaluate_white_pov(pos.board(), &cfg), 0);
    }

    #[test]
    fn extra_rook_dominates() {
        let cfg = EngineConfig::default();
        let pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let score = evaluate_white_pov(pos.board(), &cfg);
        assert!(score >= 450, "rook-up position scored only {score}");
    }

    #[test]
    fn stm_view_flips_sign() {
        let cfg = EngineConfig::default();
        let white_up = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let black_view = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 b - - 0 1").unwrap();
        assert_eq!(
            evaluate_stm(&white_up, &cfg),
            -evaluate_stm(&black_view, &cfg)
        );
    }

    #[test]
    fn mirrored_position_negates() {
        let cfg = EngineConfig::default();
        let pos = Position::from_fen("r5k1/5ppp/8/8/8/8/5PPP/6K1 w - - 0 1").unwrap();
        let mirror = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        assert_eq!(
            evaluate_white_pov(pos.board(), &cfg),
            -evaluate_white_pov(mirror.board(), &cfg)
        );
    }

    #[test]
    fn eval_cache_roundtrip() {
        let mut cache = EvalCache::new();
        cache.store(0x1234_5678, 77);
        assert_eq!(cache.probe(0x1234_5678), Some(77));
        assert_eq!(cache.probe(0x1234_5679), None);
        cache.clear();
        assert_eq!(cache.probe(0x1234_5678), None);
    }
}
