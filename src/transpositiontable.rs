//! The transposition table: buckets of four packed 12-byte entries,
//! power-of-two bucket count indexed by the low bits of the Zobrist key and
//! tagged with the high 16 bits, with a generation counter for O(1) clears.

use chess::{ChessMove, Piece, ALL_SQUARES};

use crate::definitions::{Score, MATE_BOUND};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    Exact = 0,
    Lower = 1,
    Upper = 2,
}

/// An unpacked probe result.
#[derive(Debug, Clone, Copy)]
pub struct TTEntry {
    pub depth: i32,
    pub flag: Bound,
    pub value: Score,
    pub best_move: Option<ChessMove>,
}

/// What lives in the big array. Exactly 12 bytes; anything wider would
/// regress memory density, anything narrower loses the move or the score.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
struct PackedEntry {
    value_cp: i32,
    key16: u16,
    move16: u16,
    depth: i8, // -1 == empty
    flag: u8,
    gen: u8,
    has_move: u8,
}

const _PACKED_SIZE: () = assert!(std::mem::size_of::<PackedEntry>() == 12);

const CLUSTER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    e: [PackedEntry; CLUSTER_SIZE],
}

pub struct TranspositionTable {
    table: Vec<Bucket>,
    mask: usize,
    capacity_entries: usize,
    gen: u8,
}

impl TranspositionTable {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let mut tt = Self { table: Vec::new(), mask: 0, capacity_entries: 0, gen: 1 };
        tt.resize(max_entries);
        tt
    }

    pub fn resize(&mut self, max_entries: usize) {
        let buckets = (max_entries / CLUSTER_SIZE).max(1).next_power_of_two();
        self.table.clear();
        self.table.resize(buckets, Bucket::default());
        self.mask = buckets - 1;
        self.capacity_entries = buckets * CLUSTER_SIZE;
        self.gen = 1;
    }

    /// Rounds down to a power of two, so the table never exceeds the
    /// requested megabytes.
    #[must_use]
    pub fn entries_for_mb(mb: usize) -> usize {
        let bytes = mb.max(1) * 1024 * 1024;
        let buckets = (bytes / std::mem::size_of::<Bucket>()).max(1);
        let buckets = 1usize << buckets.ilog2();
        buckets * CLUSTER_SIZE
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity_entries
    }

    /// O(1) clear: advance the generation so every stored entry becomes
    /// invisible to `probe`. Every 255th clear wraps the counter, and only
    /// then is the array actually wiped.
    pub fn clear(&mut self) {
        self.gen = self.gen.wrapping_add(1);
        if self.gen == 0 {
            self.gen = 1;
            self.table.fill(Bucket::default());
        }
    }

    #[must_use]
    pub fn probe(&self, key: u64) -> Option<TTEntry> {
        let bucket = &self.table[(key as usize) & self.mask];
        let sig = key_signature(key);
        for pe in &bucket.e {
            if pe.gen != self.gen || pe.depth < 0 || pe.key16 != sig {
                continue;
            }
            return Some(TTEntry {
                depth: i32::from(pe.depth),
                flag: unpack_flag(pe.flag),
                value: pe.value_cp,
                best_move: if pe.has_move != 0 { decode_move(pe.move16) } else { None },
            });
        }
        None
    }

    pub fn store(
        &mut self,
        key: u64,
        depth: i32,
        flag: Bound,
        value: Score,
        best_move: Option<ChessMove>,
    ) {
        let gen = self.gen;
        let sig = key_signature(key);
        let bucket = &mut self.table[(key as usize) & self.mask];

        let write = |pe: &mut PackedEntry| {
            pe.gen = gen;
            pe.key16 = sig;
            pe.depth = depth.clamp(0, 127) as i8;
            pe.flag = flag as u8;
            pe.value_cp = value;
            pe.has_move = u8::from(best_move.is_some());
            pe.move16 = best_move.map_or(0, encode_move);
        };

        // Same key in the current generation: replace on deeper, or on
        // equal depth when the new bound is exact and the old is not.
        // Otherwise keep the old score but fill in a missing best move.
        for pe in &mut bucket.e {
            if pe.gen != gen || pe.depth < 0 || pe.key16 != sig {
                continue;
            }
            let replace = depth > i32::from(pe.depth)
                || (depth == i32::from(pe.depth)
                    && flag == Bound::Exact
                    && unpack_flag(pe.flag) != Bound::Exact);
            if replace {
                write(pe);
            } else if pe.has_move == 0 {
                if let Some(m) = best_move {
                    pe.has_move = 1;
                    pe.move16 = encode_move(m);
                }
            }
            return;
        }

        // Prefer an empty or stale slot.
        for pe in &mut bucket.e {
            if pe.gen != gen || pe.depth < 0 {
                write(pe);
                return;
            }
        }

        // Bucket full of live entries: evict the lowest quality one. Stale
        // generations would otherwise poison a cluster with high-depth
        // entries that are never probed again.
        let quality = |pe: &PackedEntry| -> i32 {
            if pe.depth < 0 {
                return -1_000_000;
            }
            let mut q = i32::from(pe.depth) * 4;
            if unpack_flag(pe.flag) == Bound::Exact {
                q += 2;
            }
            if pe.has_move != 0 {
                q += 1;
            }
            if pe.gen != gen {
                q -= 1000;
            }
            q
        };
        let victim = bucket
            .e
            .iter_mut()
            .min_by_key(|pe| quality(pe))
            .expect("bucket is never empty");
        write(victim);
    }
}

const fn key_signature(key: u64) -> u16 {
    (key >> 48) as u16
}

fn unpack_flag(flag: u8) -> Bound {
    match flag {
        0 => Bound::Exact,
        1 => Bound::Lower,
        _ => Bound::Upper,
    }
}

/// Mate scores are stored relative to the storing node: push them further
/// out by the current ply so a probing node recovers "mate in N from here".
#[must_use]
pub const fn value_to_tt(value: Score, ply: usize) -> Score {
    if value >= MATE_BOUND {
        value + ply as Score
    } else if value <= -MATE_BOUND {
        value - ply as Score
    } else {
        value
    }
}

#[must_use]
pub const fn value_from_tt(value: Score, ply: usize) -> Score {
    if value >= MATE_BOUND {
        value - ply as Score
    } else if value <= -MATE_BOUND {
        value + ply as Score
    } else {
        value
    }
}

/// 16-bit move encoding for the packed entry: from | to << 6 | promo << 12.
/// Zero is reserved for "no move" (a1a1 cannot occur).
fn encode_move(m: ChessMove) -> u16 {
    let from = m.get_source().to_index() as u16;
    let to = m.get_dest().to_index() as u16;
    let promo = match m.get_promotion() {
        None => 0u16,
        Some(Piece::Knight) => 1,
        Some(Piece::Bishop) => 2,
        Some(Piece::Rook) => 3,
        _ => 4,
    };
    from | (to << 6) | (promo << 12)
}

fn decode_move(bits: u16) -> Option<ChessMove> {
    if bits == 0 {
        return None;
    }
    let from = ALL_SQUARES[(bits & 0x3F) as usize];
    let to = ALL_SQUARES[((bits >> 6) & 0x3F) as usize];
    let promo = match (bits >> 12) & 0xF {
        1 => Some(Piece::Knight),
        2 => Some(Piece::Bishop),
        3 => Some(Piece::Rook),
        4 => Some(Piece::Queen),
        _ => None,
    };
    Some(ChessMove::new(from, to, promo))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::definitions::MATE_SCORE;

    #[test]
    fn store_probe_roundtrip() {
        let mut tt = TranspositionTable::new(1024);
        let m = ChessMove::from_str("e2e4").unwrap();
        tt.store(0xDEAD_BEEF_CAFE_F00D, 7, Bound::Exact, 42, Some(m));
        let e = tt.probe(0xDEAD_BEEF_CAFE_F00D).expect("entry present");
        assert_eq!(e.depth, 7);
        assert_eq!(e.flag, Bound::Exact);
        assert_eq!(e.value, 42);
        assert_eq!(e.best_move, Some(m));
        assert!(tt.probe(0xDEAD_BEEF_CAFE_F00E).is_none());
    }

    #[test]
    fn clear_invalidates_entries() {
        let mut tt = TranspositionTable::new(1024);
        tt.store(1, 5, Bound::Lower, 10, None);
        assert!(tt.probe(1).is_some());
        tt.clear();
        assert!(tt.probe(1).is_none());
    }

    #[test]
    fn shallower_store_keeps_score_but_fills_move() {
        let mut tt = TranspositionTable::new(1024);
        let m = ChessMove::from_str("g1f3").unwrap();
        tt.store(99, 9, Bound::Exact, 123, None);
        tt.store(99, 2, Bound::Upper, -50, Some(m));
        let e = tt.probe(99).unwrap();
        assert_eq!(e.depth, 9);
        assert_eq!(e.value, 123);
        assert_eq!(e.best_move, Some(m));
    }

    #[test]
    fn equal_depth_exact_replaces_bound() {
        let mut tt = TranspositionTable::new(1024);
        tt.store(7, 4, Bound::Lower, 90, None);
        tt.store(7, 4, Bound::Exact, 60, None);
        let e = tt.probe(7).unwrap();
        assert_eq!(e.flag, Bound::Exact);
        assert_eq!(e.value, 60);
    }

    #[test]
    fn mate_scores_roundtrip_through_ply_adjustment() {
        let ply = 3;
        let score = MATE_SCORE - 8; // mate in 8 plies from this node
        assert_eq!(value_from_tt(value_to_tt(score, ply), ply), score);
        let neg = -(MATE_SCORE - 8);
        assert_eq!(value_from_tt(value_to_tt(neg, ply), ply), neg);
    }

    #[test]
    fn move_encoding_roundtrip() {
        for uci in ["e2e4", "a7a8q", "h2h1n", "e1g1"] {
            let m = ChessMove::from_str(uci).unwrap();
            assert_eq!(decode_move(encode_move(m)), Some(m));
        }
    }

    #[test]
    fn sizing_is_power_of_two_buckets() {
        let entries = TranspositionTable::entries_for_mb(16);
        assert_eq!(entries % CLUSTER_SIZE, 0);
        let buckets = entries / CLUSTER_SIZE;
        assert!(buckets.is_power_of_two());
        let tt = TranspositionTable::new(entries);
        assert_eq!(tt.capacity(), entries);
    }
}
