//! Zobrist hashing for incremental position identification.
//!
//! Every feature of a position (piece on square, side to move, castling
//! rights, en-passant file) owns a pseudo-random 64-bit key and the position
//! hash is the XOR of the keys that apply. Keys come from a fixed-seed PRNG so
//! hashes are stable across runs and persisted hash data stays valid.

use crate::engine::types::{CastlingRights, Key, Piece, Square};

/// 8 en-passant files (a..h). Only the file is hashed.
const EP_FILES: usize = 8;

/// Seed for the key generator (digits of pi).
const SEED: u64 = 0x3243_F6A8_885A_308D;

/// Pre-computed Zobrist keys. Immutable once built.
pub struct ZobristKeys {
    /// `psq[color][piece_type][square]`. Also indexed by piece count when
    /// building material keys.
    psq: [[[Key; 64]; 6]; 2],
    en_passant: [Key; EP_FILES],
    castling: [Key; CastlingRights::COUNT],
    side: Key,
    no_pawns: Key,
}

impl ZobristKeys {
    /// Generate all keys from the fixed seed.
    pub fn new() -> Self {
        let mut rng = Xorshift64::new(SEED);

        let mut psq = [[[0; 64]; 6]; 2];
        for key in psq.iter_mut().flatten().flatten() {
            *key = rng.next_u64();
        }

        let en_passant = std::array::from_fn(|_| rng.next_u64());

        // Castling keys are built so that the key of a combined right set is
        // the XOR of its single-right keys.
        let singles: [Key; 4] = std::array::from_fn(|_| rng.next_u64());
        let castling = std::array::from_fn(|cr| {
            (0..4)
                .filter(|bit| cr & (1 << bit) != 0)
                .fold(0, |acc, bit| acc ^ singles[bit])
        });

        let side = rng.next_u64();
        let no_pawns = rng.next_u64();

        ZobristKeys {
            psq,
            en_passant,
            castling,
            side,
            no_pawns,
        }
    }

    /// Key for `piece` standing on `sq`.
    #[inline]
    pub fn psq(&self, piece: Piece, sq: Square) -> Key {
        self.psq[piece.color.index()][piece.kind.index()][sq.index()]
    }

    /// Key for the `count`-th instance of `piece` (material key term).
    #[inline]
    pub fn material(&self, piece: Piece, count: u8) -> Key {
        self.psq[piece.color.index()][piece.kind.index()][count as usize]
    }

    #[inline]
    pub fn en_passant(&self, file: u8) -> Key {
        self.en_passant[file as usize]
    }

    #[inline]
    pub fn castling(&self, rights: CastlingRights) -> Key {
        self.castling[rights.index()]
    }

    /// XORed in when Black is to move.
    #[inline]
    pub fn side(&self) -> Key {
        self.side
    }

    /// Seed of every pawn key, so pawnless positions hash non-zero.
    #[inline]
    pub fn no_pawns(&self) -> Key {
        self.no_pawns
    }
}

impl Default for ZobristKeys {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Deterministic PRNG (xorshift64)
// ---------------------------------------------------------------------------

struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        // xorshift maps zero to zero forever.
        Xorshift64 {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
