//! A position with history: the external board crate supplies legal move
//! generation, make-move, Zobrist hashing and check detection, but it is
//! copy-make and stateless across moves. This wrapper adds the undo stack,
//! repetition and fifty-move tracking, null moves, and the pawn key used by
//! correction history.

use std::str::FromStr;

use chess::{BitBoard, Board, ChessMove, Color, MoveGen, Piece, Square, EMPTY};

use crate::errors::FenError;

const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Clone)]
pub struct Position {
    board: Board,
    /// Boards and keys of all prior positions, game history included.
    /// `keys[i]` is the Zobrist key of the position `boards[i]`.
    boards: Vec<Board>,
    keys: Vec<u64>,
    clocks: Vec<u32>,
    halfmove_clock: u32,
    /// Length of `keys` when the current search started. Positions at or
    /// beyond this index are on the search path, where a single recurrence
    /// already counts as a draw.
    root_len: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self::startpos()
    }
}

impl Position {
    #[must_use]
    pub fn startpos() -> Self {
        Self::from_fen(STARTPOS).expect("start position FEN is valid")
    }

    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(FenError::MissingFields(fields.len()));
        }
        let board = Board::from_str(&fields[..4].join(" ")).map_err(FenError::Rejected)?;
        let halfmove_clock = match fields.get(4) {
            None => 0,
            Some(s) => s
                .parse::<u32>()
                .map_err(|_| FenError::InvalidHalfmoveClock((*s).to_string()))?,
        };
        Ok(Self {
            board,
            boards: Vec::with_capacity(256),
            keys: Vec::with_capacity(256),
            clocks: Vec::with_capacity(256),
            halfmove_clock,
            root_len: 0,
        })
    }

    #[must_use]
    pub const fn board(&self) -> &Board {
        &self.board
    }

    #[must_use]
    pub fn key(&self) -> u64 {
        self.board.get_hash()
    }

    #[must_use]
    pub fn turn(&self) -> Color {
        self.board.side_to_move()
    }

    #[must_use]
    pub fn in_check(&self) -> bool {
        *self.board.checkers() != EMPTY
    }

    /// Ply distance from the search root.
    #[must_use]
    pub fn height(&self) -> usize {
        self.keys.len() - self.root_len
    }

    /// Marks the current position as the root of a search, so that
    /// repetition detection can distinguish the search path from the game
    /// history.
    pub fn set_search_root(&mut self) {
        self.root_len = self.keys.len();
    }

    pub fn make_move(&mut self, m: ChessMove) {
        self.boards.push(self.board);
        self.keys.push(self.key());
        self.clocks.push(self.halfmove_clock);
        let irreversible =
            self.board.piece_on(m.get_source()) == Some(Piece::Pawn) || self.is_capture(m);
        self.halfmove_clock = if irreversible { 0 } else { self.halfmove_clock + 1 };
        self.board = self.board.make_move_new(m);
    }

    pub fn unmake_move(&mut self) {
        self.board = self.boards.pop().expect("unmake without a prior make");
        self.keys.pop();
        self.halfmove_clock = self.clocks.pop().expect("unmake without a prior make");
    }

    /// Passes the turn. Fails (returning false) when the side to move is in
    /// check, in which case the position is unchanged.
    pub fn make_null_move(&mut self) -> bool {
        let Some(next) = self.board.null_move() else {
            return false;
        };
        self.boards.push(self.board);
        self.keys.push(self.key());
        self.clocks.push(self.halfmove_clock);
        self.halfmove_clock += 1;
        self.board = next;
        true
    }

    pub fn unmake_null_move(&mut self) {
        self.unmake_move();
    }

    /// A capture for history and pruning purposes: the destination is
    /// occupied, or a pawn moves diagonally onto an empty square
    /// (en passant).
    #[must_use]
    pub fn is_capture(&self, m: ChessMove) -> bool {
        if self.board.piece_on(m.get_dest()).is_some() {
            return true;
        }
        self.board.piece_on(m.get_source()) == Some(Piece::Pawn)
            && m.get_source().get_file() != m.get_dest().get_file()
    }

    #[must_use]
    pub fn is_quiet(&self, m: ChessMove) -> bool {
        !self.is_capture(m) && m.get_promotion().is_none()
    }

    /// Draw by repetition: the current key occurred on the search path
    /// (twofold since the root), or at least twice anywhere in the game
    /// (threefold overall). Only positions since the last irreversible move
    /// can repeat.
    #[must_use]
    pub fn is_repetition(&self) -> bool {
        let key = self.key();
        let window = self.halfmove_clock as usize;
        let mut seen = 0usize;
        for (i, &k) in self.keys.iter().enumerate().rev().take(window) {
            if k != key {
                continue;
            }
            if i >= self.root_len {
                return true;
            }
            seen += 1;
            if seen >= 2 {
                return true;
            }
        }
        false
    }

    #[must_use]
    pub const fn is_fifty_move_draw(&self) -> bool {
        self.halfmove_clock >= 100
    }

    /// Bare kings, or a lone minor piece in total.
    #[must_use]
    pub fn has_insufficient_material(&self) -> bool {
        let occ = *self.board.combined();
        if occ.popcnt() > 3 {
            return false;
        }
        let majors_or_pawns = *self.board.pieces(Piece::Pawn)
            | *self.board.pieces(Piece::Rook)
            | *self.board.pieces(Piece::Queen);
        majors_or_pawns == EMPTY
    }

    /// The side to move still has something other than king and pawns.
    /// Null-move pruning is unsound without this.
    #[must_use]
    pub fn has_non_pawn_material(&self) -> bool {
        let us = *self.board.color_combined(self.turn());
        let kings_and_pawns =
            *self.board.pieces(Piece::King) | *self.board.pieces(Piece::Pawn);
        (us & !kings_and_pawns) != EMPTY
    }

    /// A key over the pawn structure only, for correction history. Mixed so
    /// that white and black pawn sets contribute asymmetrically.
    #[must_use]
    pub fn pawn_key(&self) -> u64 {
        let pawns = *self.board.pieces(Piece::Pawn);
        let white = (pawns & *self.board.color_combined(Color::White)).0;
        let black = (pawns & *self.board.color_combined(Color::Black)).0;
        splitmix64(white ^ splitmix64(black))
    }

    #[must_use]
    pub fn legal_moves(&self) -> MoveGen {
        MoveGen::new_legal(&self.board)
    }

    #[must_use]
    pub fn first_legal_move(&self) -> Option<ChessMove> {
        MoveGen::new_legal(&self.board).next()
    }

    /// Full legality check for moves of untrusted provenance (the
    /// transposition table, the GUI). Slower than `Board::legal`, but safe
    /// for arbitrary bit patterns.
    #[must_use]
    pub fn is_legal(&self, m: ChessMove) -> bool {
        MoveGen::new_legal(&self.board).any(|x| x == m)
    }

    /// Applies a move given in UCI notation, rejecting illegal ones.
    pub fn apply_uci_move(&mut self, s: &str) -> Result<(), String> {
        let m = ChessMove::from_str(s).map_err(|e| e.to_string())?;
        if !self.is_legal(m) {
            return Err(format!("illegal move {s}"));
        }
        self.make_move(m);
        Ok(())
    }

    /// A piece index in 0..12 for history tables: piece type * 2 + colour.
    #[must_use]
    pub fn piece_index_on(&self, sq: Square) -> Option<usize> {
        let piece = self.board.piece_on(sq)?;
        let colour = self.board.color_on(sq)?;
        Some(piece.to_index() * 2 + colour.to_index())
    }
}

const fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// The straight-line targets of the side not to move, used by the picker to
/// split capture generation from quiet generation.
#[must_use]
pub fn capture_mask(board: &Board) -> BitBoard {
    *board.color_combined(!board.side_to_move())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_has_twenty_moves() {
        let pos = Position::startpos();
        assert_eq!(pos.legal_moves().len(), 20);
        assert!(!pos.in_check());
    }

    #[test]
    fn invalid_fen_is_rejected() {
        assert!(Position::from_fen("not a fen").is_err());
        assert!(Position::from_fen("8/8/8/8/8/8/8/8 w - - 0 1").is_err());
    }

    #[test]
    fn halfmove_clock_parsed_and_tracked() {
        let mut pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 12 30").unwrap();
        assert!(!pos.is_fifty_move_draw());
        // a rook move keeps counting, a pawn move resets
        pos.apply_uci_move("a1a2").unwrap();
        pos.apply_uci_move("g7g6").unwrap();
        assert_eq!(pos.halfmove_clock, 0);
    }

    #[test]
    fn make_unmake_roundtrip() {
        let mut pos = Position::startpos();
        let key = pos.key();
        let m = ChessMove::from_str("e2e4").unwrap();
        pos.make_move(m);
        assert_ne!(pos.key(), key);
        pos.unmake_move();
        assert_eq!(pos.key(), key);
        assert_eq!(pos.height(), 0);
    }

    #[test]
    fn repetition_detected_on_search_path() {
        let mut pos = Position::startpos();
        pos.set_search_root();
        for uci in ["g1f3", "g8f6", "f3g1", "f6g8"] {
            pos.apply_uci_move(uci).unwrap();
        }
        // back at the start position, which the search root already saw
        assert!(pos.is_repetition());
    }

    #[test]
    fn threefold_needed_in_game_history() {
        let mut pos = Position::startpos();
        for uci in ["g1f3", "g8f6", "f3g1", "f6g8"] {
            pos.apply_uci_move(uci).unwrap();
        }
        pos.set_search_root();
        // one prior occurrence before the root is not yet a draw...
        assert!(!pos.is_repetition());
        for uci in ["g1f3", "g8f6", "f3g1", "f6g8"] {
            pos.apply_uci_move(uci).unwrap();
        }
        // ...two are
        assert!(pos.is_repetition());
    }

    #[test]
    fn en_passant_classified_as_capture() {
        let mut pos = Position::from_fen(
            "rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 3",
        )
        .unwrap();
        let ep = ChessMove::from_str("d4e3").unwrap();
        assert!(pos.is_legal(ep));
        assert!(pos.is_capture(ep));
        pos.make_move(ep);
        assert_eq!(pos.halfmove_clock, 0);
    }

    #[test]
    fn insufficient_material() {
        assert!(Position::from_fen("8/8/4k3/8/8/3NK3/8/8 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
        assert!(!Position::from_fen("8/8/4k3/8/8/3RK3/8/8 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
    }
}
