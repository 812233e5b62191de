//! Cuckoo table of reversible moves for upcoming-repetition detection.
//!
//! Every non-pawn move between two squares is stored under the key
//! `psq(piece, a) ^ psq(piece, b) ^ side`. XORing the current position key
//! with an earlier one and finding the result here means a single reversible
//! move links the two positions.

use crate::engine::attacks;
use crate::engine::types::{ChessError, Color, Key, Move, Piece, PieceType, Square};
use crate::engine::zobrist::ZobristKeys;

/// Number of slots; indices are 13-bit hashes.
pub const SIZE: usize = 8192;

/// Reversible moves on an 8x8 board (knight, bishop, rook, queen, king for
/// both colours, each square pair stored once).
pub const EXPECTED_ENTRIES: usize = 3668;

/// Upper bound on evictions for a single insert before giving up.
const MAX_DISPLACEMENTS: usize = SIZE;

#[inline]
pub fn h1(key: Key) -> usize {
    (key & 0x1fff) as usize
}

#[inline]
pub fn h2(key: Key) -> usize {
    ((key >> 16) & 0x1fff) as usize
}

/// Two parallel arrays: move keys and the moves they belong to.
pub struct CuckooTable {
    keys: Vec<Key>,
    moves: Vec<Move>,
    len: usize,
}

impl CuckooTable {
    /// Build the table from the Zobrist keys, checking that exactly
    /// [`EXPECTED_ENTRIES`] moves were placed.
    pub fn build(zobrist: &ZobristKeys) -> Result<Self, ChessError> {
        let attacks = attacks::tables();
        let mut table = CuckooTable {
            keys: vec![0; SIZE],
            moves: vec![Move::NONE; SIZE],
            len: 0,
        };

        for color in Color::ALL {
            for kind in &PieceType::ALL[PieceType::Knight.index()..] {
                let piece = Piece::new(color, *kind);
                for a in 0..64u8 {
                    for b in a + 1..64 {
                        let (sa, sb) = (Square(a), Square(b));
                        if !attacks.pseudo_attacks(*kind, sa).is_set(sb) {
                            continue;
                        }
                        let key = zobrist.psq(piece, sa) ^ zobrist.psq(piece, sb) ^ zobrist.side();
                        table.insert(key, Move::new(sa, sb))?;
                    }
                }
            }
        }

        if table.len != EXPECTED_ENTRIES {
            return Err(ChessError::CuckooCount {
                expected: EXPECTED_ENTRIES,
                found: table.len,
            });
        }
        Ok(table)
    }

    /// Insert with eviction: the displaced entry moves to its alternate slot
    /// until an empty slot absorbs it.
    fn insert(&mut self, key: Key, mv: Move) -> Result<(), ChessError> {
        let (mut key, mut mv) = (key, mv);
        let mut slot = h1(key);
        for _ in 0..MAX_DISPLACEMENTS {
            std::mem::swap(&mut self.keys[slot], &mut key);
            std::mem::swap(&mut self.moves[slot], &mut mv);
            if mv == Move::NONE {
                self.len += 1;
                return Ok(());
            }
            slot = if slot == h1(key) { h2(key) } else { h1(key) };
        }
        Err(ChessError::CuckooOverflow { key })
    }

    /// The reversible move stored under `key`, if any.
    #[inline]
    pub fn probe(&self, key: Key) -> Option<Move> {
        [h1(key), h2(key)]
            .into_iter()
            .find(|&slot| self.keys[slot] == key)
            .map(|slot| self.moves[slot])
    }

    /// Number of stored moves.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
