//! Bit-geometry leaf: attack tables and ray masks.
//!
//! Everything here is computed once (via `OnceLock`) and read-only afterwards.
//! Sliders use plain magic bitboards with magics searched at start-up from a
//! fixed seed, so the tables are identical on every run.

use crate::engine::types::{Bitboard, Color, PieceType, Square};
use std::sync::OnceLock;

// =========================================================================
// Public API
// =========================================================================

/// Get a reference to the global attack tables.
pub fn tables() -> &'static AttackTables {
    static TABLES: OnceLock<AttackTables> = OnceLock::new();
    TABLES.get_or_init(AttackTables::init)
}

/// Pre-computed attack and ray tables.
pub struct AttackTables {
    knight: [Bitboard; 64],
    king: [Bitboard; 64],
    /// `pawn[color][square]`: squares a pawn of `color` on `square` attacks.
    pawn: [[Bitboard; 64]; 2],
    rook: SliderTable,
    bishop: SliderTable,
    /// `between[a][b]`: squares strictly between `a` and `b` plus `b`
    /// itself when the two share a line; just `b` otherwise.
    between: Vec<[Bitboard; 64]>,
    /// `line[a][b]`: the full edge-to-edge line through `a` and `b`, or empty
    /// when they are not aligned.
    line: Vec<[Bitboard; 64]>,
}

/// Magic lookup for one slider kind.
struct SliderTable {
    magics: [Magic; 64],
    attacks: Vec<Bitboard>,
}

/// A single magic-bitboard entry for one square.
#[derive(Clone, Copy, Default)]
struct Magic {
    mask: u64,
    factor: u64,
    shift: u8,
    /// Offset into the shared attack table.
    offset: usize,
}

impl Magic {
    #[inline]
    fn index(&self, occupied: Bitboard) -> usize {
        let hash = (occupied.0 & self.mask).wrapping_mul(self.factor);
        self.offset + (hash >> self.shift) as usize
    }
}

impl SliderTable {
    #[inline]
    fn attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.attacks[self.magics[sq.index()].index(occupied)]
    }
}

impl AttackTables {
    // -------------------------------------------------------------------
    // Leapers
    // -------------------------------------------------------------------

    #[inline]
    pub fn knight_attacks(&self, sq: Square) -> Bitboard {
        self.knight[sq.index()]
    }

    #[inline]
    pub fn king_attacks(&self, sq: Square) -> Bitboard {
        self.king[sq.index()]
    }

    /// Pawn capture squares for a given colour.
    #[inline]
    pub fn pawn_attacks(&self, color: Color, sq: Square) -> Bitboard {
        self.pawn[color.index()][sq.index()]
    }

    // -------------------------------------------------------------------
    // Sliders
    // -------------------------------------------------------------------

    #[inline]
    pub fn rook_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.rook.attacks(sq, occupied)
    }

    #[inline]
    pub fn bishop_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.bishop.attacks(sq, occupied)
    }

    #[inline]
    pub fn queen_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.rook_attacks(sq, occupied) | self.bishop_attacks(sq, occupied)
    }

    /// Attacks of a non-pawn piece type from `sq` with the given occupancy.
    pub fn attacks(&self, pt: PieceType, sq: Square, occupied: Bitboard) -> Bitboard {
        match pt {
            PieceType::Knight => self.knight_attacks(sq),
            PieceType::Bishop => self.bishop_attacks(sq, occupied),
            PieceType::Rook => self.rook_attacks(sq, occupied),
            PieceType::Queen => self.queen_attacks(sq, occupied),
            PieceType::King => self.king_attacks(sq),
            PieceType::Pawn => {
                debug_assert!(false, "pawn attacks depend on colour");
                Bitboard::EMPTY
            }
        }
    }

    /// Attacks of a non-pawn piece type on an empty board.
    #[inline]
    pub fn pseudo_attacks(&self, pt: PieceType, sq: Square) -> Bitboard {
        self.attacks(pt, sq, Bitboard::EMPTY)
    }

    // -------------------------------------------------------------------
    // Rays
    // -------------------------------------------------------------------

    #[inline]
    pub fn between(&self, a: Square, b: Square) -> Bitboard {
        self.between[a.index()][b.index()]
    }

    #[inline]
    pub fn line(&self, a: Square, b: Square) -> Bitboard {
        self.line[a.index()][b.index()]
    }

    /// True when `c` lies on the line through `a` and `b`.
    #[inline]
    pub fn aligned(&self, a: Square, b: Square, c: Square) -> bool {
        self.line(a, b).is_set(c)
    }
}

// =========================================================================
// Initialisation
// =========================================================================

const KNIGHT_STEPS: [(i8, i8); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
];

const KING_STEPS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

const ROOK_DIRS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

impl AttackTables {
    fn init() -> Self {
        let pawn = [
            leaper_table(&[(1, -1), (1, 1)]),
            leaper_table(&[(-1, -1), (-1, 1)]),
        ];
        let rook = find_magics(&ROOK_DIRS, 0x9E37_79B9_7F4A_7C15);
        let bishop = find_magics(&BISHOP_DIRS, 0xD1B5_4A32_D192_ED03);
        let (between, line) = init_rays(&rook, &bishop);

        AttackTables {
            knight: leaper_table(&KNIGHT_STEPS),
            king: leaper_table(&KING_STEPS),
            pawn,
            rook,
            bishop,
            between,
            line,
        }
    }
}

/// One-step attacks for every square given (rank, file) deltas.
fn leaper_table(steps: &[(i8, i8)]) -> [Bitboard; 64] {
    std::array::from_fn(|sq| {
        let rank = (sq / 8) as i8;
        let file = (sq % 8) as i8;
        let mut bb = Bitboard::EMPTY;
        for &(dr, df) in steps {
            let (r, f) = (rank + dr, file + df);
            if (0..8).contains(&r) && (0..8).contains(&f) {
                bb.set(Square::from_file_rank(f as u8, r as u8));
            }
        }
        bb
    })
}

fn init_rays(rook: &SliderTable, bishop: &SliderTable) -> (Vec<[Bitboard; 64]>, Vec<[Bitboard; 64]>) {
    let mut between = vec![[Bitboard::EMPTY; 64]; 64];
    let mut line = vec![[Bitboard::EMPTY; 64]; 64];

    for a in 0..64u8 {
        let sa = Square(a);
        for b in 0..64u8 {
            let sb = Square(b);
            between[a as usize][b as usize] = Bitboard::from_square(sb);
            if a == b {
                continue;
            }
            for slider in [rook, bishop] {
                if slider.attacks(sa, Bitboard::EMPTY).is_set(sb) {
                    let ends = Bitboard::from_square(sa) | Bitboard::from_square(sb);
                    line[a as usize][b as usize] = (slider.attacks(sa, Bitboard::EMPTY)
                        & slider.attacks(sb, Bitboard::EMPTY))
                        | ends;
                    between[a as usize][b as usize] |=
                        slider.attacks(sa, Bitboard::from_square(sb))
                            & slider.attacks(sb, Bitboard::from_square(sa));
                }
            }
        }
    }
    (between, line)
}

// =========================================================================
// Magic search
// =========================================================================

/// Enumerate all subsets of `mask` using the Carry-Rippler trick.
fn subsets_of(mask: u64) -> Vec<u64> {
    let mut out = Vec::with_capacity(1 << mask.count_ones());
    let mut subset = 0u64;
    loop {
        out.push(subset);
        subset = subset.wrapping_sub(mask) & mask;
        if subset == 0 {
            break;
        }
    }
    out
}

/// Ray attacks from `sq` along `dirs`, stopping at (and including) the first
/// blocker on each ray.
fn ray_attacks(sq: u8, blockers: u64, dirs: &[(i8, i8)]) -> u64 {
    let rank = (sq >> 3) as i8;
    let file = (sq & 7) as i8;
    let mut attacks = 0u64;
    for &(dr, df) in dirs {
        let (mut r, mut f) = (rank + dr, file + df);
        while (0..8).contains(&r) && (0..8).contains(&f) {
            let bit = 1u64 << (r * 8 + f);
            attacks |= bit;
            if blockers & bit != 0 {
                break;
            }
            r += dr;
            f += df;
        }
    }
    attacks
}

/// Relevant-occupancy mask: the rays from `sq` minus the final square of
/// each ray, since a piece on the board edge never changes the result.
fn relevant_mask(sq: u8, dirs: &[(i8, i8)]) -> u64 {
    let rank = (sq >> 3) as i8;
    let file = (sq & 7) as i8;
    let mut mask = 0u64;
    for &(dr, df) in dirs {
        let (mut r, mut f) = (rank + dr, file + df);
        while (0..8).contains(&(r + dr)) && (0..8).contains(&(f + df)) {
            mask |= 1u64 << (r * 8 + f);
            r += dr;
            f += df;
        }
    }
    mask
}

fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

/// Sparse candidates (few bits set) are far more likely to be valid magics.
fn sparse_random(state: &mut u64) -> u64 {
    xorshift64(state) & xorshift64(state) & xorshift64(state)
}

/// Search a collision-free magic for every square and build the shared
/// attack table.
fn find_magics(dirs: &[(i8, i8)], seed: u64) -> SliderTable {
    let mut rng = seed;
    let mut attacks: Vec<Bitboard> = Vec::new();
    let mut magics = [Magic::default(); 64];

    for sq in 0..64u8 {
        let mask = relevant_mask(sq, dirs);
        let bits = mask.count_ones() as u8;
        let shift = 64 - bits;
        let size = 1usize << bits;

        let occupancies = subsets_of(mask);
        let reference: Vec<u64> = occupancies
            .iter()
            .map(|&occ| ray_attacks(sq, occ, dirs))
            .collect();

        let mut slots = vec![u64::MAX; size];
        let factor = loop {
            let candidate = sparse_random(&mut rng);
            if (candidate.wrapping_mul(mask) >> 56).count_ones() < 6 {
                continue;
            }

            slots.fill(u64::MAX);
            let fits = occupancies.iter().zip(&reference).all(|(&occ, &atk)| {
                let idx = (occ.wrapping_mul(candidate) >> shift) as usize;
                if slots[idx] == u64::MAX {
                    slots[idx] = atk;
                    true
                } else {
                    slots[idx] == atk
                }
            });
            if fits {
                break candidate;
            }
        };

        magics[sq as usize] = Magic {
            mask,
            factor,
            shift,
            offset: attacks.len(),
        };
        // Unused slots stay empty; constructive collisions share a value.
        attacks.extend(slots.iter().map(|&atk| {
            if atk == u64::MAX {
                Bitboard::EMPTY
            } else {
                Bitboard(atk)
            }
        }));
    }

    SliderTable { magics, attacks }
}

// =========================================================================
// Tests
// =========================================================================
