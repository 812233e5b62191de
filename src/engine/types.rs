use std::fmt;

/// Material and exchange scores in internal units.
pub type Value = i32;

/// Zobrist-style 64-bit hash key.
pub type Key = u64;

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// The two sides in a chess game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub const ALL: [Color; 2] = [Color::White, Color::Black];

    /// Index for array lookups: White=0, Black=1.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Square offset of a single pawn push for this side.
    #[inline]
    pub const fn pawn_push(self) -> i8 {
        match self {
            Color::White => 8,
            Color::Black => -8,
        }
    }
}

impl std::ops::Not for Color {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

// ---------------------------------------------------------------------------
// PieceType
// ---------------------------------------------------------------------------

/// The six piece kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PieceType {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceType {
    /// All piece types in order.
    pub const ALL: [PieceType; 6] = [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
        PieceType::King,
    ];

    /// Number of piece types.
    pub const COUNT: usize = 6;

    /// Index for array lookups: Pawn=0 .. King=5.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Middlegame material value used by exchange evaluation and
    /// non-pawn material bookkeeping.
    #[inline]
    pub const fn value(self) -> Value {
        match self {
            PieceType::Pawn => PAWN_VALUE,
            PieceType::Knight => KNIGHT_VALUE,
            PieceType::Bishop => BISHOP_VALUE,
            PieceType::Rook => ROOK_VALUE,
            PieceType::Queen => QUEEN_VALUE,
            PieceType::King => 0,
        }
    }

    /// Lowercase letter for this piece type.
    pub const fn letter(self) -> char {
        match self {
            PieceType::Pawn => 'p',
            PieceType::Knight => 'n',
            PieceType::Bishop => 'b',
            PieceType::Rook => 'r',
            PieceType::Queen => 'q',
            PieceType::King => 'k',
        }
    }

    /// Parse a lowercase or uppercase piece letter, ignoring colour.
    pub fn from_letter(c: char) -> Option<PieceType> {
        match c.to_ascii_lowercase() {
            'p' => Some(PieceType::Pawn),
            'n' => Some(PieceType::Knight),
            'b' => Some(PieceType::Bishop),
            'r' => Some(PieceType::Rook),
            'q' => Some(PieceType::Queen),
            'k' => Some(PieceType::King),
            _ => None,
        }
    }
}

impl fmt::Display for PieceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PieceType::Pawn => write!(f, "pawn"),
            PieceType::Knight => write!(f, "knight"),
            PieceType::Bishop => write!(f, "bishop"),
            PieceType::Rook => write!(f, "rook"),
            PieceType::Queen => write!(f, "queen"),
            PieceType::King => write!(f, "king"),
        }
    }
}

pub const PAWN_VALUE: Value = 126;
pub const KNIGHT_VALUE: Value = 781;
pub const BISHOP_VALUE: Value = 825;
pub const ROOK_VALUE: Value = 1276;
pub const QUEEN_VALUE: Value = 2538;

// ---------------------------------------------------------------------------
// Piece
// ---------------------------------------------------------------------------

/// A coloured piece as it stands on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Piece {
    pub color: Color,
    pub kind: PieceType,
}

impl Piece {
    #[inline]
    pub const fn new(color: Color, kind: PieceType) -> Self {
        Piece { color, kind }
    }

    /// Single uppercase letter for white, lowercase for black.
    pub fn to_char(self) -> char {
        let c = self.kind.letter();
        match self.color {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }

    /// Parse a FEN piece letter; case selects the colour.
    pub fn from_char(c: char) -> Option<Piece> {
        let kind = PieceType::from_letter(c)?;
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some(Piece { color, kind })
    }
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// A square on the chess board (0..63, LERF: a1=0, h8=63).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square(pub u8);

impl Square {
    pub const A1: Square = Square(0);
    pub const C1: Square = Square(2);
    pub const D1: Square = Square(3);
    pub const E1: Square = Square(4);
    pub const F1: Square = Square(5);
    pub const G1: Square = Square(6);

    #[inline]
    pub fn new(index: u8) -> Self {
        debug_assert!(index < 64, "Square index out of range: {index}");
        Square(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn file(self) -> u8 {
        self.0 & 7
    }

    #[inline]
    pub fn rank(self) -> u8 {
        self.0 >> 3
    }

    #[inline]
    pub fn from_file_rank(file: u8, rank: u8) -> Self {
        debug_assert!(file < 8 && rank < 8);
        Square(rank * 8 + file)
    }

    /// The same square seen from `color`'s side of the board (rank mirrored
    /// for Black).
    #[inline]
    pub fn relative(self, color: Color) -> Self {
        match color {
            Color::White => self,
            Color::Black => Square(self.0 ^ 56),
        }
    }

    /// Rank counted from `color`'s first rank (0..7).
    #[inline]
    pub fn relative_rank(self, color: Color) -> u8 {
        match color {
            Color::White => self.rank(),
            Color::Black => 7 - self.rank(),
        }
    }

    /// Shift by a raw index delta. The caller guarantees the result is on
    /// the board.
    #[inline]
    pub fn offset(self, delta: i8) -> Self {
        let idx = self.0 as i8 + delta;
        debug_assert!((0..64).contains(&idx), "offset left the board");
        Square(idx as u8)
    }

    /// Parse algebraic notation like "e4".
    pub fn from_algebraic(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        if file < 8 && rank < 8 {
            Some(Square::from_file_rank(file, rank))
        } else {
            None
        }
    }

    /// Convert to algebraic notation like "e4".
    pub fn to_algebraic(self) -> String {
        let file = (b'a' + self.file()) as char;
        let rank = (b'1' + self.rank()) as char;
        format!("{file}{rank}")
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}

// ---------------------------------------------------------------------------
// Bitboard
// ---------------------------------------------------------------------------

/// A 64-bit bitboard, one bit per square.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bitboard(pub u64);

impl Bitboard {
    pub const EMPTY: Bitboard = Bitboard(0);
    pub const ALL: Bitboard = Bitboard(!0u64);
    pub const RANK_1: Bitboard = Bitboard(0x0000_0000_0000_00FF);
    pub const RANK_8: Bitboard = Bitboard(0xFF00_0000_0000_0000);

    #[inline]
    pub const fn from_square(sq: Square) -> Self {
        Bitboard(1u64 << sq.0)
    }

    #[inline]
    pub fn is_set(self, sq: Square) -> bool {
        self.0 & (1u64 << sq.0) != 0
    }

    #[inline]
    pub fn set(&mut self, sq: Square) {
        self.0 |= 1u64 << sq.0;
    }

    #[inline]
    pub fn clear(&mut self, sq: Square) {
        self.0 &= !(1u64 << sq.0);
    }

    #[inline]
    pub fn pop_count(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_not_empty(self) -> bool {
        self.0 != 0
    }

    /// True when two or more bits are set.
    #[inline]
    pub fn more_than_one(self) -> bool {
        self.0 & self.0.wrapping_sub(1) != 0
    }

    /// Least significant bit index (first set square).
    #[inline]
    pub fn lsb(self) -> Option<Square> {
        if self.0 == 0 {
            None
        } else {
            Some(Square(self.0.trailing_zeros() as u8))
        }
    }

    /// Least significant square of a bitboard known to be non-empty.
    #[inline]
    pub fn lsb_square(self) -> Square {
        debug_assert!(self.0 != 0, "lsb of an empty bitboard");
        Square(self.0.trailing_zeros() as u8)
    }

    /// The least significant bit isolated as a bitboard.
    #[inline]
    pub fn lsb_bb(self) -> Bitboard {
        Bitboard(self.0 & self.0.wrapping_neg())
    }

    /// Pop the least significant bit, returning the square.
    #[inline]
    pub fn pop_lsb(&mut self) -> Option<Square> {
        if self.0 == 0 {
            None
        } else {
            let sq = Square(self.0.trailing_zeros() as u8);
            self.0 &= self.0 - 1; // clear LSB
            Some(sq)
        }
    }

    /// Iterate over all set bit positions as `Square`s.
    #[inline]
    pub fn iter(self) -> BitboardIter {
        BitboardIter(self)
    }
}

impl From<Square> for Bitboard {
    #[inline]
    fn from(sq: Square) -> Self {
        Bitboard::from_square(sq)
    }
}

/// Iterator over set bits in a `Bitboard`.
pub struct BitboardIter(Bitboard);

impl Iterator for BitboardIter {
    type Item = Square;

    #[inline]
    fn next(&mut self) -> Option<Square> {
        self.0.pop_lsb()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.0.pop_count() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for BitboardIter {}

impl std::ops::BitAnd for Bitboard {
    type Output = Self;
    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Bitboard(self.0 & rhs.0)
    }
}

impl std::ops::BitOr for Bitboard {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Bitboard(self.0 | rhs.0)
    }
}

impl std::ops::BitXor for Bitboard {
    type Output = Self;
    #[inline]
    fn bitxor(self, rhs: Self) -> Self {
        Bitboard(self.0 ^ rhs.0)
    }
}

impl std::ops::Not for Bitboard {
    type Output = Self;
    #[inline]
    fn not(self) -> Self {
        Bitboard(!self.0)
    }
}

impl std::ops::BitAndAssign for Bitboard {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl std::ops::BitOrAssign for Bitboard {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitXorAssign for Bitboard {
    #[inline]
    fn bitxor_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl fmt::Debug for Bitboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bitboard(0x{:016x})", self.0)?;
        for rank in (0..8).rev() {
            write!(f, "  {} ", rank + 1)?;
            for file in 0..8 {
                let sq = Square::from_file_rank(file, rank);
                write!(f, "{}", if self.is_set(sq) { '1' } else { '.' })?;
                if file < 7 {
                    write!(f, " ")?;
                }
            }
            writeln!(f)?;
        }
        writeln!(f, "    a b c d e f g h")
    }
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

/// Special move categories. Castling is encoded as "king captures its own
/// rook": `to` holds the rook's origin square.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MoveKind {
    #[default]
    Normal,
    Promotion,
    EnPassant,
    Castling,
}

/// A chess move: from-square, to-square, kind and optional promotion.
/// Kept at 4 bytes so it can be passed by value efficiently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub kind: MoveKind,
    pub promotion: Option<PieceType>,
}

impl Move {
    /// Placeholder for "no move" (a1a1).
    pub const NONE: Move = Move {
        from: Square(0),
        to: Square(0),
        kind: MoveKind::Normal,
        promotion: None,
    };

    /// The null move used by search to pass (b1b1).
    pub const NULL: Move = Move {
        from: Square(1),
        to: Square(1),
        kind: MoveKind::Normal,
        promotion: None,
    };

    pub const fn new(from: Square, to: Square) -> Self {
        Move {
            from,
            to,
            kind: MoveKind::Normal,
            promotion: None,
        }
    }

    pub const fn with_promotion(from: Square, to: Square, promotion: PieceType) -> Self {
        Move {
            from,
            to,
            kind: MoveKind::Promotion,
            promotion: Some(promotion),
        }
    }

    pub const fn en_passant(from: Square, to: Square) -> Self {
        Move {
            from,
            to,
            kind: MoveKind::EnPassant,
            promotion: None,
        }
    }

    /// Castling move: `king` origin to the castling `rook` origin.
    pub const fn castling(king: Square, rook: Square) -> Self {
        Move {
            from: king,
            to: rook,
            kind: MoveKind::Castling,
            promotion: None,
        }
    }

    /// False for `NONE`, `NULL` and anything else with from == to.
    #[inline]
    pub fn is_ok(self) -> bool {
        self.from != self.to
    }

    /// 16-bit packing: bits 0-5 to, 6-11 from, 12-13 promotion piece
    /// (knight..queen), 14-15 kind.
    pub fn raw(self) -> u16 {
        let promo = match self.promotion {
            Some(pt) if pt >= PieceType::Knight && pt <= PieceType::Queen => {
                (pt.index() - PieceType::Knight.index()) as u16
            }
            _ => 0,
        };
        let kind = match self.kind {
            MoveKind::Normal => 0u16,
            MoveKind::Promotion => 1,
            MoveKind::EnPassant => 2,
            MoveKind::Castling => 3,
        };
        (kind << 14) | (promo << 12) | ((self.from.0 as u16) << 6) | self.to.0 as u16
    }

    /// Inverse of [`Move::raw`]. Every 16-bit value decodes to some move,
    /// which is why moves recovered from hash storage must be screened with
    /// `Position::pseudo_legal` before use.
    pub fn from_raw(raw: u16) -> Self {
        let to = Square((raw & 0x3F) as u8);
        let from = Square(((raw >> 6) & 0x3F) as u8);
        match raw >> 14 {
            1 => {
                let pt = PieceType::ALL[PieceType::Knight.index() + ((raw >> 12) & 3) as usize];
                Move::with_promotion(from, to, pt)
            }
            2 => Move::en_passant(from, to),
            3 => Move::castling(from, to),
            _ => Move::new(from, to),
        }
    }

    /// UCI long algebraic notation. Castling is printed as the king's
    /// destination in standard chess and as "king takes rook" in Chess960.
    pub fn to_uci(self, chess960: bool) -> String {
        if self == Move::NONE {
            return "(none)".to_string();
        }
        if self == Move::NULL {
            return "0000".to_string();
        }
        let mut to = self.to;
        if self.kind == MoveKind::Castling && !chess960 {
            let rank = self.from.rank();
            let file = if self.to > self.from { 6 } else { 2 };
            to = Square::from_file_rank(file, rank);
        }
        let mut s = format!("{}{}", self.from, to);
        if let Some(promo) = self.promotion {
            s.push(promo.letter());
        }
        s
    }
}

impl Default for Move {
    fn default() -> Self {
        Move::NONE
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(promo) = self.promotion {
            write!(f, "{}", promo.letter())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CastlingRights
// ---------------------------------------------------------------------------

/// Castling availability bitfield: bits 0-3 = WK, WQ, BK, BQ.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CastlingRights(pub u8);

impl CastlingRights {
    pub const NONE: CastlingRights = CastlingRights(0);
    pub const WHITE_KINGSIDE: CastlingRights = CastlingRights(1);
    pub const WHITE_QUEENSIDE: CastlingRights = CastlingRights(2);
    pub const BLACK_KINGSIDE: CastlingRights = CastlingRights(4);
    pub const BLACK_QUEENSIDE: CastlingRights = CastlingRights(8);
    pub const KING_SIDE: CastlingRights = CastlingRights(1 | 4);
    pub const ALL: CastlingRights = CastlingRights(0b1111);

    /// Number of distinct rights values (0..15).
    pub const COUNT: usize = 16;

    /// Both rights of one colour.
    #[inline]
    pub const fn of(color: Color) -> CastlingRights {
        match color {
            Color::White => CastlingRights(1 | 2),
            Color::Black => CastlingRights(4 | 8),
        }
    }

    /// The single right of `color` on the given side.
    #[inline]
    pub const fn single(color: Color, king_side: bool) -> CastlingRights {
        match (color, king_side) {
            (Color::White, true) => Self::WHITE_KINGSIDE,
            (Color::White, false) => Self::WHITE_QUEENSIDE,
            (Color::Black, true) => Self::BLACK_KINGSIDE,
            (Color::Black, false) => Self::BLACK_QUEENSIDE,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn has(self, flag: CastlingRights) -> bool {
        self.0 & flag.0 != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn remove(&mut self, flag: CastlingRights) {
        self.0 &= !flag.0;
    }

    #[inline]
    pub fn can_castle_kingside(self, color: Color) -> bool {
        self.has(Self::single(color, true))
    }

    #[inline]
    pub fn can_castle_queenside(self, color: Color) -> bool {
        self.has(Self::single(color, false))
    }
}

impl std::ops::BitOr for CastlingRights {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        CastlingRights(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CastlingRights {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for CastlingRights {
    type Output = Self;
    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        CastlingRights(self.0 & rhs.0)
    }
}

// ---------------------------------------------------------------------------
// ChessError
// ---------------------------------------------------------------------------

/// Domain errors for the board core.
#[derive(Debug, thiserror::Error)]
pub enum ChessError {
    #[error("invalid FEN string: {0}")]
    InvalidFen(String),

    #[error("invalid move: {0}")]
    InvalidMove(String),

    #[error("cuckoo table could not place key {key:#018x}")]
    CuckooOverflow { key: Key },

    #[error("cuckoo table holds {found} reversible moves, expected {expected}")]
    CuckooCount { expected: usize, found: usize },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
