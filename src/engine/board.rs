//! Bitboard-based chess position with a per-ply state stack.
//!
//! `Position` keeps a square-indexed board array plus redundant bitboards by
//! colour and by piece type, and owns the stack of [`StateInfo`] records that
//! `do_move` pushes and `undo_move` pops. Hash keys are maintained
//! incrementally and never recomputed on undo.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::engine::attacks;
use crate::engine::state::StateInfo;
use crate::engine::tables::HashTables;
use crate::engine::types::{
    Bitboard, CastlingRights, ChessError, Color, Key, Move, MoveKind, Piece, PieceType, Square,
    Value,
};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Largest half-move clock or full-move number accepted from a FEN. Keeps
/// the ply counters far from `i32` overflow however long play continues.
const MAX_CLOCK: i32 = 1 << 24;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A complete chess position.
///
/// Board layout follows LERF (Little-Endian Rank-File) mapping:
/// a1 = 0, b1 = 1, … h1 = 7, a2 = 8, … h8 = 63.
#[derive(Clone)]
pub struct Position {
    board: [Option<Piece>; 64],
    by_type: [Bitboard; PieceType::COUNT],
    by_color: [Bitboard; 2],
    piece_count: [[u8; PieceType::COUNT]; 2],
    /// Rights lost when a move touches the square.
    castling_rights_mask: [CastlingRights; 64],
    castling_rook_square: [Option<Square>; CastlingRights::COUNT],
    /// Squares that must be empty for each castling right.
    castling_path: [Bitboard; CastlingRights::COUNT],
    game_ply: i32,
    side_to_move: Color,
    chess960: bool,
    /// State stack; the last entry is the current state.
    states: Vec<StateInfo>,
    tables: Arc<HashTables>,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl Position {
    /// An empty board with a single default state. Not a valid position
    /// until [`Position::set`] succeeds.
    pub fn new(tables: &Arc<HashTables>) -> Self {
        Position {
            board: [None; 64],
            by_type: [Bitboard::EMPTY; PieceType::COUNT],
            by_color: [Bitboard::EMPTY; 2],
            piece_count: [[0; PieceType::COUNT]; 2],
            castling_rights_mask: [CastlingRights::NONE; 64],
            castling_rook_square: [None; CastlingRights::COUNT],
            castling_path: [Bitboard::EMPTY; CastlingRights::COUNT],
            game_ply: 0,
            side_to_move: Color::White,
            chess960: false,
            states: vec![StateInfo::default()],
            tables: Arc::clone(tables),
        }
    }

    pub fn from_fen(fen: &str, chess960: bool, tables: &Arc<HashTables>) -> Result<Self, ChessError> {
        let mut pos = Position::new(tables);
        pos.set(fen, chess960)?;
        Ok(pos)
    }

    /// Standard starting position.
    pub fn starting(tables: &Arc<HashTables>) -> Self {
        Self::from_fen(START_FEN, false, tables).expect("starting FEN is always valid")
    }

    /// Build a position from an endgame material code such as `"KBPKN"` or
    /// `"KRvK"`. The first king's side belongs to `strong`.
    pub fn from_material_code(
        code: &str,
        strong: Color,
        tables: &Arc<HashTables>,
    ) -> Result<Self, ChessError> {
        let code = code.to_ascii_uppercase();
        let bad = || ChessError::InvalidFen(format!("invalid material code '{code}'"));

        if !code.starts_with('K') {
            return Err(bad());
        }
        let second_king = code[1..].find('K').map(|i| i + 1).ok_or_else(bad)?;
        let strong_end = code.find('V').map_or(second_king, |v| v.min(second_king));

        let mut sides = [code[second_king..].to_string(), code[..strong_end].to_string()];
        if sides.iter().any(|s| s.is_empty() || s.len() >= 8) {
            return Err(bad());
        }
        sides[strong.index()] = sides[strong.index()].to_ascii_lowercase();

        let fen = format!(
            "8/{}{}/8/8/8/8/{}{}/8 w - - 0 10",
            sides[0],
            8 - sides[0].len(),
            sides[1],
            8 - sides[1].len()
        );
        Self::from_fen(&fen, false, tables)
    }

    /// Reserve state storage for `plies` further moves so the search never
    /// reallocates mid-tree.
    pub fn reserve_plies(&mut self, plies: usize) {
        self.states.reserve(plies);
    }

    // -----------------------------------------------------------------------
    // Piece manipulation (low-level, no hashing)
    // -----------------------------------------------------------------------

    #[inline]
    fn put_piece(&mut self, pc: Piece, sq: Square) {
        debug_assert!(self.board[sq.index()].is_none());
        let bb = Bitboard::from_square(sq);
        self.board[sq.index()] = Some(pc);
        self.by_type[pc.kind.index()] |= bb;
        self.by_color[pc.color.index()] |= bb;
        self.piece_count[pc.color.index()][pc.kind.index()] += 1;
    }

    #[inline]
    fn remove_piece(&mut self, sq: Square) {
        if let Some(pc) = self.board[sq.index()].take() {
            let bb = Bitboard::from_square(sq);
            self.by_type[pc.kind.index()] ^= bb;
            self.by_color[pc.color.index()] ^= bb;
            self.piece_count[pc.color.index()][pc.kind.index()] -= 1;
        }
    }

    #[inline]
    fn move_piece(&mut self, from: Square, to: Square) {
        if let Some(pc) = self.board[from.index()].take() {
            let bb = Bitboard::from_square(from) | Bitboard::from_square(to);
            self.by_type[pc.kind.index()] ^= bb;
            self.by_color[pc.color.index()] ^= bb;
            self.board[to.index()] = Some(pc);
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Position {
    #[inline]
    pub fn tables(&self) -> &HashTables {
        &self.tables
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    #[inline]
    pub fn is_chess960(&self) -> bool {
        self.chess960
    }

    /// Plies since the start of the game (0 before White's first move).
    #[inline]
    pub fn game_ply(&self) -> i32 {
        self.game_ply
    }

    #[inline]
    pub fn piece_on(&self, sq: Square) -> Option<Piece> {
        self.board[sq.index()]
    }

    #[inline]
    pub fn is_empty(&self, sq: Square) -> bool {
        self.board[sq.index()].is_none()
    }

    /// All occupied squares.
    #[inline]
    pub fn occupied(&self) -> Bitboard {
        self.by_color[0] | self.by_color[1]
    }

    #[inline]
    pub fn by_color(&self, color: Color) -> Bitboard {
        self.by_color[color.index()]
    }

    #[inline]
    pub fn by_type(&self, pt: PieceType) -> Bitboard {
        self.by_type[pt.index()]
    }

    #[inline]
    pub fn pieces(&self, color: Color, pt: PieceType) -> Bitboard {
        self.by_color[color.index()] & self.by_type[pt.index()]
    }

    #[inline]
    pub fn count(&self, pc: Piece) -> u8 {
        self.piece_count[pc.color.index()][pc.kind.index()]
    }

    #[inline]
    pub fn king_square(&self, color: Color) -> Square {
        self.pieces(color, PieceType::King).lsb_square()
    }

    // -- state --

    /// The current state record.
    #[inline]
    pub fn st(&self) -> &StateInfo {
        &self.states[self.states.len() - 1]
    }

    #[inline]
    pub(crate) fn st_mut(&mut self) -> &mut StateInfo {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    /// The state stack, oldest first.
    #[inline]
    pub fn states(&self) -> &[StateInfo] {
        &self.states
    }

    #[inline]
    pub fn key(&self) -> Key {
        self.st().key
    }

    #[inline]
    pub fn pawn_key(&self) -> Key {
        self.st().pawn_key
    }

    #[inline]
    pub fn material_key(&self) -> Key {
        self.st().material_key
    }

    #[inline]
    pub fn non_pawn_material(&self, color: Color) -> Value {
        self.st().non_pawn_material(color)
    }

    #[inline]
    pub fn checkers(&self) -> Bitboard {
        self.st().checkers
    }

    #[inline]
    pub fn in_check(&self) -> bool {
        self.st().checkers.is_not_empty()
    }

    #[inline]
    pub fn blockers_for_king(&self, color: Color) -> Bitboard {
        self.st().blockers_for_king[color.index()]
    }

    #[inline]
    pub fn pinners(&self, color: Color) -> Bitboard {
        self.st().pinners[color.index()]
    }

    #[inline]
    pub fn check_squares(&self, pt: PieceType) -> Bitboard {
        self.st().check_squares(pt)
    }

    #[inline]
    pub fn ep_square(&self) -> Option<Square> {
        self.st().ep_square
    }

    #[inline]
    pub fn rule50_count(&self) -> i32 {
        self.st().rule50
    }

    #[inline]
    pub fn captured_piece(&self) -> Option<Piece> {
        self.st().captured
    }

    // -- castling --

    #[inline]
    pub fn castling_rights(&self) -> CastlingRights {
        self.st().castling_rights
    }

    #[inline]
    pub fn can_castle(&self, cr: CastlingRights) -> bool {
        self.st().castling_rights.has(cr)
    }

    /// True when a piece stands on the path of the single right `cr`.
    #[inline]
    pub fn castling_impeded(&self, cr: CastlingRights) -> bool {
        (self.occupied() & self.castling_path[cr.index()]).is_not_empty()
    }

    #[inline]
    pub fn castling_rook_square(&self, cr: CastlingRights) -> Option<Square> {
        self.castling_rook_square[cr.index()]
    }
}

// ---------------------------------------------------------------------------
// FEN input
// ---------------------------------------------------------------------------

impl Position {
    /// Replace this position with the one described by `fen`.
    ///
    /// Castling accepts `KQkq`, Shredder rook files (`HAha`) or a mix.
    /// An en-passant square is kept only when a capture onto it is actually
    /// possible. Missing clock fields default to `0 1`.
    pub fn set(&mut self, fen: &str, chess960: bool) -> Result<(), ChessError> {
        trace!(fen, chess960, "setting position");
        let err = |msg: String| ChessError::InvalidFen(msg);

        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 2 {
            return Err(err(format!("expected at least 2 fields, got {}", fields.len())));
        }

        let mut pos = Position::new(&self.tables);
        pos.states.reserve(self.states.capacity());
        pos.chess960 = chess960;

        // ----- Field 1: Piece placement -----
        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(err(format!("expected 8 ranks, got {}", ranks.len())));
        }
        for (rank_idx, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - rank_idx as u8;
            let mut file: u8 = 0;
            for ch in rank_str.chars() {
                if let Some(digit) = ch.to_digit(10) {
                    if !(1..=8).contains(&digit) {
                        return Err(err(format!("invalid empty count '{ch}'")));
                    }
                    file += digit as u8;
                } else if let Some(pc) = Piece::from_char(ch) {
                    if file > 7 {
                        return Err(err(format!("too many squares in rank {}", rank + 1)));
                    }
                    pos.put_piece(pc, Square::from_file_rank(file, rank));
                    file += 1;
                } else {
                    return Err(err(format!("invalid character '{ch}' in piece placement")));
                }
            }
            if file != 8 {
                return Err(err(format!("rank {} has {file} squares instead of 8", rank + 1)));
            }
        }

        for color in Color::ALL {
            let kings = pos.pieces(color, PieceType::King).pop_count();
            if kings != 1 {
                return Err(err(format!("{color} has {kings} kings (expected 1)")));
            }
        }
        if (pos.by_type(PieceType::Pawn) & (Bitboard::RANK_1 | Bitboard::RANK_8)).is_not_empty() {
            return Err(err("pawn on the first or last rank".to_string()));
        }

        // ----- Field 2: Side to move -----
        pos.side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(err(format!("invalid side to move: '{other}'"))),
        };

        // ----- Field 3: Castling -----
        for token in fields.get(2).copied().unwrap_or("-").chars() {
            let color = if token.is_ascii_uppercase() {
                Color::White
            } else {
                Color::Black
            };
            if let Some(rsq) = pos.castling_rook_for_token(color, token.to_ascii_uppercase()) {
                pos.set_castling_right(color, rsq);
            }
        }

        // ----- Field 4: En passant -----
        let us = pos.side_to_move;
        let ep = fields
            .get(3)
            .and_then(|s| Square::from_algebraic(s))
            .filter(|&ep| ep.relative_rank(us) == 5)
            .filter(|&ep| {
                let t = attacks::tables();
                let enemy_pawn = ep.offset((!us).pawn_push());
                let behind = ep.offset(us.pawn_push());
                (t.pawn_attacks(!us, ep) & pos.pieces(us, PieceType::Pawn)).is_not_empty()
                    && pos.pieces(!us, PieceType::Pawn).is_set(enemy_pawn)
                    && pos.is_empty(ep)
                    && pos.is_empty(behind)
            });
        pos.st_mut().ep_square = ep;

        // ----- Fields 5-6: Clocks -----
        let rule50 = match fields.get(4) {
            Some(s) => s
                .parse::<i32>()
                .ok()
                .filter(|n| (0..=MAX_CLOCK).contains(n))
                .ok_or_else(|| err(format!("invalid halfmove clock: '{s}'")))?,
            None => 0,
        };
        let fullmove = match fields.get(5) {
            Some(s) => s
                .parse::<i32>()
                .ok()
                .filter(|n| (0..=MAX_CLOCK).contains(n))
                .ok_or_else(|| err(format!("invalid fullmove number: '{s}'")))?,
            None => 1,
        };
        pos.st_mut().rule50 = rule50;
        pos.game_ply = (2 * (fullmove - 1)).max(0) + i32::from(us == Color::Black);

        pos.set_state();
        let them = !us;
        if (pos.attackers_to(pos.king_square(them), pos.occupied()) & pos.by_color(us)).is_not_empty() {
            return Err(err(format!("{them} is in check but not to move")));
        }
        debug_assert!(pos.is_ok());

        *self = pos;
        Ok(())
    }

    /// Rook square named by a castling token for `color`, if the board
    /// supports it. `K`/`Q` pick the outermost rook on that wing.
    fn castling_rook_for_token(&self, color: Color, token: char) -> Option<Square> {
        let rook = Piece::new(color, PieceType::Rook);
        let ksq = self.king_square(color);
        let back_rank = Square::A1.relative(color).rank();
        if ksq.rank() != back_rank {
            return None;
        }
        let on_file = |file: u8| Square::from_file_rank(file, back_rank);

        let rsq = match token {
            'K' => (ksq.file() + 1..8)
                .rev()
                .map(on_file)
                .find(|&s| self.piece_on(s) == Some(rook))?,
            'Q' => (0..ksq.file())
                .map(on_file)
                .find(|&s| self.piece_on(s) == Some(rook))?,
            'A'..='H' => on_file(token as u8 - b'A'),
            _ => return None,
        };
        (self.piece_on(rsq) == Some(rook)).then_some(rsq)
    }

    /// Record the castling right of `color` with the rook on `rfrom`, plus
    /// the squares that must be clear to use it.
    fn set_castling_right(&mut self, color: Color, rfrom: Square) {
        let kfrom = self.king_square(color);
        let king_side = kfrom < rfrom;
        let cr = CastlingRights::single(color, king_side);

        self.st_mut().castling_rights |= cr;
        self.castling_rights_mask[kfrom.index()] |= cr;
        self.castling_rights_mask[rfrom.index()] |= cr;
        self.castling_rook_square[cr.index()] = Some(rfrom);

        let (kto, rto) = castling_targets(color, king_side);
        let t = attacks::tables();
        self.castling_path[cr.index()] = (t.between(rfrom, rto) | t.between(kfrom, kto))
            & !(Bitboard::from_square(kfrom) | Bitboard::from_square(rfrom));
    }

    /// Refresh pin, blocker and check-square caches of the current state.
    pub(crate) fn set_check_info(&mut self) {
        let (white_blockers, black_pinners) =
            self.slider_blockers(self.by_color(Color::Black), self.king_square(Color::White));
        let (black_blockers, white_pinners) =
            self.slider_blockers(self.by_color(Color::White), self.king_square(Color::Black));

        let t = attacks::tables();
        let them = !self.side_to_move;
        let ksq = self.king_square(them);
        let occ = self.occupied();
        let bishop = t.bishop_attacks(ksq, occ);
        let rook = t.rook_attacks(ksq, occ);
        let check_squares = [
            t.pawn_attacks(them, ksq),
            t.knight_attacks(ksq),
            bishop,
            rook,
            bishop | rook,
            Bitboard::EMPTY,
        ];

        let st = self.st_mut();
        st.blockers_for_king = [white_blockers, black_blockers];
        st.pinners = [white_pinners, black_pinners];
        st.check_squares = check_squares;
    }

    /// Compute keys, material and checkers of the current state from scratch.
    fn set_state(&mut self) {
        let z = &self.tables.zobrist;
        let mut key = 0;
        let mut pawn_key = z.no_pawns();
        let mut material_key = 0;
        let mut npm = [0; 2];

        for sq in self.occupied().iter() {
            let Some(pc) = self.board[sq.index()] else {
                continue;
            };
            key ^= z.psq(pc, sq);
            match pc.kind {
                PieceType::Pawn => pawn_key ^= z.psq(pc, sq),
                PieceType::King => {}
                kind => npm[pc.color.index()] += kind.value(),
            }
        }

        let st = self.st();
        if let Some(ep) = st.ep_square {
            key ^= z.en_passant(ep.file());
        }
        if self.side_to_move == Color::Black {
            key ^= z.side();
        }
        key ^= z.castling(st.castling_rights);

        for color in Color::ALL {
            for kind in PieceType::ALL {
                let pc = Piece::new(color, kind);
                for n in 0..self.count(pc) {
                    material_key ^= z.material(pc, n);
                }
            }
        }

        let us = self.side_to_move;
        let checkers = self.attackers_to(self.king_square(us), self.occupied()) & self.by_color(!us);

        let st = self.st_mut();
        st.key = key;
        st.pawn_key = pawn_key;
        st.material_key = material_key;
        st.non_pawn_material = npm;
        st.checkers = checkers;
        self.set_check_info();
    }

    /// The full position key recomputed from the board, for consistency
    /// checks against the incrementally maintained one.
    pub fn compute_key(&self) -> Key {
        let z = &self.tables.zobrist;
        let mut key = self
            .occupied()
            .iter()
            .filter_map(|sq| self.piece_on(sq).map(|pc| z.psq(pc, sq)))
            .fold(0, |acc, k| acc ^ k);
        if let Some(ep) = self.ep_square() {
            key ^= z.en_passant(ep.file());
        }
        if self.side_to_move == Color::Black {
            key ^= z.side();
        }
        key ^ z.castling(self.castling_rights())
    }
}

/// King and rook destinations for castling on one wing.
#[inline]
pub(crate) fn castling_targets(color: Color, king_side: bool) -> (Square, Square) {
    if king_side {
        (Square::G1.relative(color), Square::F1.relative(color))
    } else {
        (Square::C1.relative(color), Square::D1.relative(color))
    }
}

// ---------------------------------------------------------------------------
// FEN output
// ---------------------------------------------------------------------------

impl Position {
    /// Export the position as FEN. Chess960 castling uses rook files.
    pub fn fen(&self) -> String {
        let mut fen = String::with_capacity(90);

        for rank in (0..8).rev() {
            let mut empty = 0u8;
            for file in 0..8 {
                match self.piece_on(Square::from_file_rank(file, rank)) {
                    Some(pc) => {
                        if empty > 0 {
                            fen.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        fen.push(pc.to_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push((b'0' + empty) as char);
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push_str(match self.side_to_move {
            Color::White => " w ",
            Color::Black => " b ",
        });

        let mut castling = String::new();
        for (cr, letter) in [
            (CastlingRights::WHITE_KINGSIDE, 'K'),
            (CastlingRights::WHITE_QUEENSIDE, 'Q'),
            (CastlingRights::BLACK_KINGSIDE, 'k'),
            (CastlingRights::BLACK_QUEENSIDE, 'q'),
        ] {
            if !self.can_castle(cr) {
                continue;
            }
            match self.castling_rook_square(cr) {
                Some(rsq) if self.chess960 => {
                    let file = (b'a' + rsq.file()) as char;
                    castling.push(if letter.is_ascii_uppercase() {
                        file.to_ascii_uppercase()
                    } else {
                        file
                    });
                }
                _ => castling.push(letter),
            }
        }
        if castling.is_empty() {
            castling.push('-');
        }
        fen.push_str(&castling);

        let ep = self.ep_square().map_or_else(|| "-".to_string(), |sq| sq.to_algebraic());
        let fullmove = 1 + (self.game_ply - i32::from(self.side_to_move == Color::Black)) / 2;
        fen.push_str(&format!(" {ep} {} {fullmove}", self.rule50_count()));
        fen
    }
}

// ---------------------------------------------------------------------------
// Make / undo
// ---------------------------------------------------------------------------

impl Position {
    /// Apply a legal move. `gives_check` must equal `self.gives_check(m)`.
    pub fn do_move(&mut self, m: Move, gives_check: bool) {
        debug_assert!(m.is_ok());
        debug_assert!(m.kind != MoveKind::Promotion || m.promotion.is_some());

        let tables = Arc::clone(&self.tables);
        let z = &tables.zobrist;

        let mut st = self.st().carried();
        let mut key = self.st().key ^ z.side();

        self.game_ply += 1;
        st.rule50 += 1;
        st.plies_from_null += 1;

        let us = self.side_to_move;
        let them = !us;
        let from = m.from;
        let mut to = m.to;
        let pc = self
            .piece_on(from)
            .expect("do_move: no piece on the origin square");
        let mut captured = if m.kind == MoveKind::EnPassant {
            Some(Piece::new(them, PieceType::Pawn))
        } else {
            self.piece_on(to)
        };

        debug_assert_eq!(pc.color, us);
        debug_assert!(match captured {
            Some(cap) if m.kind == MoveKind::Castling => cap == Piece::new(us, PieceType::Rook),
            Some(cap) => cap.color == them && cap.kind != PieceType::King,
            None => true,
        });

        if m.kind == MoveKind::Castling {
            let (kto, rfrom, rto) = self.do_castling(us, from, to, true);
            let rook = Piece::new(us, PieceType::Rook);
            key ^= z.psq(rook, rfrom) ^ z.psq(rook, rto);
            to = kto;
            captured = None;
        }

        if let Some(cap) = captured {
            let mut capsq = to;
            if cap.kind == PieceType::Pawn {
                if m.kind == MoveKind::EnPassant {
                    capsq = to.offset(-us.pawn_push());
                    debug_assert!(pc.kind == PieceType::Pawn);
                    debug_assert!(self.is_empty(to));
                    debug_assert_eq!(self.piece_on(capsq), Some(cap));
                }
                st.pawn_key ^= z.psq(cap, capsq);
            } else {
                st.non_pawn_material[them.index()] -= cap.kind.value();
            }

            self.remove_piece(capsq);
            key ^= z.psq(cap, capsq);
            st.material_key ^= z.material(cap, self.count(cap));
            st.rule50 = 0;
        }

        key ^= z.psq(pc, from) ^ z.psq(pc, to);

        if let Some(ep) = st.ep_square.take() {
            key ^= z.en_passant(ep.file());
        }

        let touched = self.castling_rights_mask[from.index()] | self.castling_rights_mask[to.index()];
        if !st.castling_rights.is_empty() && !touched.is_empty() {
            key ^= z.castling(st.castling_rights);
            st.castling_rights.remove(touched);
            key ^= z.castling(st.castling_rights);
        }

        if m.kind != MoveKind::Castling {
            self.move_piece(from, to);
        }

        if pc.kind == PieceType::Pawn {
            let t = attacks::tables();
            let ep = to.offset(-us.pawn_push());
            if from.0 ^ to.0 == 16
                && (t.pawn_attacks(us, ep) & self.pieces(them, PieceType::Pawn)).is_not_empty()
            {
                st.ep_square = Some(ep);
                key ^= z.en_passant(ep.file());
            } else if let (MoveKind::Promotion, Some(kind)) = (m.kind, m.promotion) {
                let promo = Piece::new(us, kind);
                debug_assert_eq!(to.relative_rank(us), 7);

                self.remove_piece(to);
                self.put_piece(promo, to);

                key ^= z.psq(pc, to) ^ z.psq(promo, to);
                st.pawn_key ^= z.psq(pc, to);
                st.material_key ^=
                    z.material(promo, self.count(promo) - 1) ^ z.material(pc, self.count(pc));
                st.non_pawn_material[us.index()] += kind.value();
            }

            st.pawn_key ^= z.psq(pc, from) ^ z.psq(pc, to);
            st.rule50 = 0;
        }

        st.captured = captured;
        st.key = key;
        st.checkers = if gives_check {
            self.attackers_to(self.king_square(them), self.occupied()) & self.by_color(us)
        } else {
            Bitboard::EMPTY
        };

        self.side_to_move = them;
        self.states.push(st);
        self.set_check_info();
        self.update_repetition();

        debug_assert!(self.quick_check());
    }

    /// Apply `m`, working out whether it gives check first.
    pub fn make_move(&mut self, m: Move) {
        let gives_check = self.gives_check(m);
        self.do_move(m, gives_check);
    }

    /// Revert the last `do_move(m)`. Keys are restored by popping the state.
    pub fn undo_move(&mut self, m: Move) {
        debug_assert!(m.is_ok());
        debug_assert!(self.states.len() > 1, "undo_move without a matching do_move");

        self.side_to_move = !self.side_to_move;
        let us = self.side_to_move;
        let (from, to) = (m.from, m.to);

        if m.kind == MoveKind::Promotion {
            debug_assert_eq!(to.relative_rank(us), 7);
            self.remove_piece(to);
            self.put_piece(Piece::new(us, PieceType::Pawn), to);
        }

        if m.kind == MoveKind::Castling {
            self.do_castling(us, from, to, false);
        } else {
            self.move_piece(to, from);
            if let Some(cap) = self.st().captured {
                let capsq = if m.kind == MoveKind::EnPassant {
                    to.offset(-us.pawn_push())
                } else {
                    to
                };
                self.put_piece(cap, capsq);
            }
        }

        self.states.pop();
        self.game_ply -= 1;

        debug_assert!(self.quick_check());
    }

    /// Move king and rook for a castling move (`to` is the rook's origin),
    /// or put them back when `apply` is false. Both pieces are lifted before
    /// either is placed, since in Chess960 the destination squares may be
    /// the other piece's origin. Returns `(king_to, rook_from, rook_to)`.
    pub(crate) fn do_castling(
        &mut self,
        us: Color,
        from: Square,
        to: Square,
        apply: bool,
    ) -> (Square, Square, Square) {
        let king_side = to > from;
        let rfrom = to;
        let (kto, rto) = castling_targets(us, king_side);

        let (k_src, k_dst, r_src, r_dst) = if apply {
            (from, kto, rfrom, rto)
        } else {
            (kto, from, rto, rfrom)
        };
        self.remove_piece(k_src);
        self.remove_piece(r_src);
        self.put_piece(Piece::new(us, PieceType::King), k_dst);
        self.put_piece(Piece::new(us, PieceType::Rook), r_dst);

        (kto, rfrom, rto)
    }

    /// Pass the turn without moving. Not allowed while in check.
    ///
    /// The new record copies the current one except for the en-passant
    /// square, the null-move counter and the repetition distance. The
    /// distance is cleared because it described the key before the side
    /// flip, and the reset counter means no earlier position can match
    /// the new key.
    pub fn do_null_move(&mut self) {
        debug_assert!(!self.in_check(), "null move while in check");

        let z = &self.tables.zobrist;
        let mut st = *self.st();
        if let Some(ep) = st.ep_square.take() {
            st.key ^= z.en_passant(ep.file());
        }
        st.key ^= z.side();
        st.plies_from_null = 0;
        st.repetition = 0;
        st.captured = None;

        self.side_to_move = !self.side_to_move;
        self.states.push(st);
        self.set_check_info();

        debug_assert!(self.quick_check());
    }

    pub fn undo_null_move(&mut self) {
        debug_assert!(!self.in_check());
        debug_assert!(self.states.len() > 1, "undo_null_move without a null move");

        self.states.pop();
        self.side_to_move = !self.side_to_move;
    }

    /// Predicted key after a normal move, for prefetching. Ignores en
    /// passant, castling and promotion.
    pub fn key_after(&self, m: Move) -> Key {
        let z = &self.tables.zobrist;
        let mut key = self.key() ^ z.side();
        if let Some(cap) = self.piece_on(m.to) {
            key ^= z.psq(cap, m.to);
        }
        if let Some(pc) = self.piece_on(m.from) {
            key ^= z.psq(pc, m.to) ^ z.psq(pc, m.from);
        }
        key
    }
}

// ---------------------------------------------------------------------------
// Debugging helpers
// ---------------------------------------------------------------------------

impl Position {
    /// Mirror the position colour-for-colour. Resets the state history.
    pub fn flip(&mut self) -> Result<(), ChessError> {
        let fen = self.fen();
        let fields: Vec<&str> = fen.split(' ').collect();
        let swap_case = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_lowercase() {
                        c.to_ascii_uppercase()
                    } else {
                        c.to_ascii_lowercase()
                    }
                })
                .collect()
        };

        let placement: Vec<&str> = fields[0].split('/').rev().collect();
        let stm = if fields[1] == "w" { "b" } else { "w" };
        let ep = match fields[3] {
            "-" => "-".to_string(),
            sq => sq.replace('3', "#").replace('6', "3").replace('#', "6"),
        };
        let flipped = format!(
            "{} {stm} {} {ep} {} {}",
            swap_case(&placement.join("/")),
            swap_case(fields[2]),
            fields[4],
            fields[5]
        );
        self.set(&flipped, self.chess960)
    }

    /// Consistency audit of board, bitboards, counts and castling data.
    pub fn is_ok(&self) -> bool {
        if !self.quick_check() {
            return false;
        }

        for color in Color::ALL {
            if self.pieces(color, PieceType::King).pop_count() != 1 {
                return false;
            }
        }
        let us = self.side_to_move;
        if (self.attackers_to(self.king_square(!us), self.occupied()) & self.by_color(us)).is_not_empty() {
            return false;
        }
        if (self.by_type(PieceType::Pawn) & (Bitboard::RANK_1 | Bitboard::RANK_8)).is_not_empty() {
            return false;
        }
        if (self.by_color[0] & self.by_color[1]).is_not_empty() {
            return false;
        }
        let mut union = Bitboard::EMPTY;
        for pt in PieceType::ALL {
            if (union & self.by_type(pt)).is_not_empty() {
                return false;
            }
            union |= self.by_type(pt);
        }
        if union != self.occupied() {
            return false;
        }

        for color in Color::ALL {
            for kind in PieceType::ALL {
                let pc = Piece::new(color, kind);
                let on_board = self.board.iter().filter(|&&p| p == Some(pc)).count();
                if self.pieces(color, kind).pop_count() as usize != on_board
                    || self.count(pc) as usize != on_board
                {
                    return false;
                }
            }
            for king_side in [true, false] {
                let cr = CastlingRights::single(color, king_side);
                if !self.can_castle(cr) {
                    continue;
                }
                let Some(rsq) = self.castling_rook_square(cr) else {
                    return false;
                };
                if self.piece_on(rsq) != Some(Piece::new(color, PieceType::Rook))
                    || self.castling_rights_mask[rsq.index()] != cr
                    || (self.castling_rights_mask[self.king_square(color).index()] & cr) != cr
                {
                    return false;
                }
            }
        }
        true
    }

    /// The cheap subset of [`Position::is_ok`] asserted after every move.
    fn quick_check(&self) -> bool {
        let kings_ok = Color::ALL.iter().all(|&c| {
            self.pieces(c, PieceType::King).is_not_empty()
                && self.piece_on(self.king_square(c)) == Some(Piece::new(c, PieceType::King))
        });
        let ep_ok = self
            .ep_square()
            .is_none_or(|ep| ep.relative_rank(self.side_to_move) == 5);
        kings_ok && ep_ok
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SEPARATOR: &str = " +---+---+---+---+---+---+---+---+";
        writeln!(f, "{SEPARATOR}")?;
        for rank in (0..8).rev() {
            for file in 0..8 {
                let ch = self
                    .piece_on(Square::from_file_rank(file, rank))
                    .map_or(' ', Piece::to_char);
                write!(f, " | {ch}")?;
            }
            writeln!(f, " | {}", rank + 1)?;
            writeln!(f, "{SEPARATOR}")?;
        }
        writeln!(f, "   a   b   c   d   e   f   g   h")?;
        writeln!(f)?;
        writeln!(f, "Fen: {}", self.fen())?;
        writeln!(f, "Key: {:016X}", self.key())?;
        write!(f, "Checkers:")?;
        for sq in self.checkers().iter() {
            write!(f, " {sq}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Position")
            .field("fen", &self.fen())
            .field("key", &format_args!("{:016X}", self.key()))
            .field("plies", &(self.states.len() - 1))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tables;
    use std::sync::OnceLock;

    // -- helpers --

    fn hash_tables() -> Arc<HashTables> {
        static TABLES: OnceLock<Arc<HashTables>> = OnceLock::new();
        Arc::clone(TABLES.get_or_init(|| tables::init().unwrap()))
    }

    fn pos(fen: &str) -> Position {
        Position::from_fen(fen, false, &hash_tables()).unwrap()
    }

    fn starting() -> Position {
        Position::starting(&hash_tables())
    }

    fn sq(name: &str) -> Square {
        Square::from_algebraic(name).unwrap()
    }

    fn mv(from: &str, to: &str) -> Move {
        Move::new(sq(from), sq(to))
    }

    /// Apply a move and check the incremental key against a recomputation.
    fn play(p: &mut Position, m: Move) {
        p.make_move(m);
        assert_eq!(p.key(), p.compute_key(), "key drift after {m}");
        assert!(p.is_ok(), "inconsistent after {m}:\n{p}");
    }

    // =========================================================================
    // FEN parsing
    // =========================================================================

    #[test]
    fn starting_position_fields() {
        let p = starting();
        assert_eq!(p.side_to_move(), Color::White);
        assert_eq!(p.occupied().pop_count(), 32);
        assert_eq!(p.castling_rights(), CastlingRights::ALL);
        assert_eq!(p.ep_square(), None);
        assert_eq!(p.rule50_count(), 0);
        assert_eq!(p.game_ply(), 0);
        assert_eq!(p.king_square(Color::White), sq("e1"));
        assert_eq!(p.king_square(Color::Black), sq("e8"));
        assert_eq!(
            p.piece_on(sq("d8")),
            Some(Piece::new(Color::Black, PieceType::Queen))
        );
        assert!(!p.in_check());
        assert!(p.is_ok());
    }

    #[test]
    fn starting_material() {
        let p = starting();
        let expected = 2 * PieceType::Knight.value()
            + 2 * PieceType::Bishop.value()
            + 2 * PieceType::Rook.value()
            + PieceType::Queen.value();
        assert_eq!(p.non_pawn_material(Color::White), expected);
        assert_eq!(p.non_pawn_material(Color::Black), expected);
        assert_eq!(p.count(Piece::new(Color::White, PieceType::Pawn)), 8);
    }

    #[test]
    fn fen_round_trip() {
        for fen in [
            START_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2",
        ] {
            let p = pos(fen);
            assert_eq!(p.fen(), fen);
            let again = pos(&p.fen());
            assert_eq!(again.key(), p.key());
            assert_eq!(again.occupied(), p.occupied());
            assert_eq!(again.castling_rights(), p.castling_rights());
        }
    }

    #[test]
    fn missing_clocks_default() {
        let p = pos("4k3/8/8/8/8/8/8/4K3 b -");
        assert_eq!(p.rule50_count(), 0);
        assert_eq!(p.game_ply(), 1);
        assert_eq!(p.fen(), "4k3/8/8/8/8/8/8/4K3 b - - 0 1");
    }

    #[test]
    fn fullmove_converts_to_ply() {
        let p = pos("4k3/8/8/8/8/8/8/4K3 b - - 12 30");
        assert_eq!(p.game_ply(), 59);
        assert_eq!(p.rule50_count(), 12);
        let p = pos("4k3/8/8/8/8/8/8/4K3 w - - 0 0");
        assert_eq!(p.game_ply(), 0);
    }

    #[test]
    fn malformed_fen_is_rejected() {
        let t = hash_tables();
        for fen in [
            "",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP w KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq - 0 1",
            "rnbqkbnr/pppppppp/9/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "rnbqkbnr/ppppxppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "rnbqkbnr/ppppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "rnbq1bnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQ - 0 1",
            "4k3/8/8/8/8/8/8/4K2P w - - 0 1",
            "4k3/8/8/8/8/8/8/4K3 w - - x 1",
            // Clocks out of range.
            "4k3/8/8/8/8/8/8/4K3 w - - 0 2147483647",
            "4k3/8/8/8/8/8/8/4K3 w - - 0 -2147483648",
            "4k3/8/8/8/8/8/8/4K3 w - - 2147483647 1",
            "4k3/8/8/8/8/8/8/4K3 w - - -1 1",
            // Side not to move in check.
            "4k3/8/8/8/8/8/4R3/4K3 w - - 0 1",
        ] {
            assert!(
                matches!(Position::from_fen(fen, false, &t), Err(ChessError::InvalidFen(_))),
                "accepted {fen:?}"
            );
        }
    }

    #[test]
    fn large_clocks_within_range_are_kept() {
        let fen = "4k3/8/8/8/8/8/8/4K3 b - - 16777216 16777216";
        let mut p = Position::from_fen(fen, false, &hash_tables()).unwrap();
        assert_eq!(p.rule50_count(), 1 << 24);
        assert_eq!(p.fen(), fen);
        p.make_move(Move::new(sq("e8"), sq("d8")));
        assert_eq!(p.rule50_count(), (1 << 24) + 1);
    }

    #[test]
    fn failed_set_leaves_position_untouched() {
        let mut p = starting();
        let key = p.key();
        assert!(p.set("garbage", false).is_err());
        assert_eq!(p.key(), key);
        assert_eq!(p.fen(), START_FEN);
    }

    // =========================================================================
    // Castling rights
    // =========================================================================

    #[test]
    fn shredder_castling_tokens() {
        let fen = "bqnb1rkr/pp3ppp/3ppn2/2p5/5P2/P2P4/NPP1P1PP/BQ1BNRKR w HFhf - 2 9";
        let p = Position::from_fen(fen, true, &hash_tables()).unwrap();
        assert_eq!(p.castling_rights(), CastlingRights::ALL);
        assert_eq!(
            p.castling_rook_square(CastlingRights::WHITE_KINGSIDE),
            Some(sq("h1"))
        );
        assert_eq!(
            p.castling_rook_square(CastlingRights::WHITE_QUEENSIDE),
            Some(sq("f1"))
        );
        assert_eq!(p.fen(), fen);
    }

    #[test]
    fn kq_tokens_pick_outermost_rook() {
        let fen = "1r2k1r1/8/8/8/8/8/8/R1R1K2R w KQkq - 0 1";
        let p = Position::from_fen(fen, true, &hash_tables()).unwrap();
        assert_eq!(
            p.castling_rook_square(CastlingRights::WHITE_QUEENSIDE),
            Some(sq("a1"))
        );
        assert_eq!(
            p.castling_rook_square(CastlingRights::BLACK_KINGSIDE),
            Some(sq("g8"))
        );
        assert_eq!(p.fen(), "1r2k1r1/8/8/8/8/8/8/R1R1K2R w HAgb - 0 1");
    }

    #[test]
    fn castling_tokens_without_rook_are_ignored() {
        let p = pos("4k3/8/8/8/8/8/8/4K2R w KQkq - 0 1");
        assert_eq!(p.castling_rights(), CastlingRights::WHITE_KINGSIDE);
    }

    #[test]
    fn castling_path_and_impeded() {
        let p = starting();
        assert!(p.castling_impeded(CastlingRights::WHITE_KINGSIDE));
        let p = pos("r3k2r/8/8/8/8/8/8/R3K1NR w KQkq - 0 1");
        assert!(p.castling_impeded(CastlingRights::WHITE_KINGSIDE));
        assert!(!p.castling_impeded(CastlingRights::WHITE_QUEENSIDE));
        assert!(!p.castling_impeded(CastlingRights::BLACK_KINGSIDE));
    }

    // =========================================================================
    // En passant
    // =========================================================================

    #[test]
    fn ep_square_kept_only_when_capturable() {
        let p = pos("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        assert_eq!(p.ep_square(), Some(sq("f6")));

        // No white pawn can capture on e6.
        let p = pos("rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq e6 0 2");
        assert_eq!(p.ep_square(), None);
        assert_eq!(
            p.fen(),
            "rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 2"
        );

        // Wrong rank for the side to move.
        let p = pos("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f3 0 3");
        assert_eq!(p.ep_square(), None);
    }

    #[test]
    fn double_push_sets_ep_only_with_enemy_pawn_adjacent() {
        let mut p = starting();
        play(&mut p, mv("e2", "e4"));
        assert_eq!(p.ep_square(), None);

        let mut p = pos("rnbqkbnr/ppp1pppp/8/8/3p4/8/PPPPPPPP/RNBQKBNR w KQkq - 0 3");
        play(&mut p, mv("e2", "e4"));
        assert_eq!(p.ep_square(), Some(sq("e3")));
        play(&mut p, Move::en_passant(sq("d4"), sq("e3")));
        assert_eq!(p.piece_on(sq("e4")), None);
        assert_eq!(p.captured_piece(), Some(Piece::new(Color::White, PieceType::Pawn)));
        assert_eq!(p.rule50_count(), 0);
    }

    // =========================================================================
    // Make / undo
    // =========================================================================

    #[test]
    fn do_undo_restores_everything() {
        let mut p = pos("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        let before_fen = p.fen();
        let before_key = p.key();
        let before_pawn = p.pawn_key();
        let before_material = p.material_key();

        for m in [
            Move::castling(sq("e1"), sq("h1")),
            Move::castling(sq("e1"), sq("a1")),
            mv("e5", "f7"),
            mv("f3", "f6"),
            mv("d5", "e6"),
            mv("a2", "a4"),
        ] {
            p.make_move(m);
            assert_eq!(p.key(), p.compute_key(), "key drift after {m}");
            p.undo_move(m);
            assert_eq!(p.fen(), before_fen, "board changed by {m}");
            assert_eq!(p.key(), before_key);
            assert_eq!(p.pawn_key(), before_pawn);
            assert_eq!(p.material_key(), before_material);
        }
    }

    #[test]
    fn castling_moves_king_and_rook() {
        let mut p = pos("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
        play(&mut p, Move::castling(sq("e1"), sq("h1")));
        assert_eq!(p.piece_on(sq("g1")), Some(Piece::new(Color::White, PieceType::King)));
        assert_eq!(p.piece_on(sq("f1")), Some(Piece::new(Color::White, PieceType::Rook)));
        assert!(p.is_empty(sq("e1")));
        assert!(p.is_empty(sq("h1")));
        assert_eq!(p.castling_rights(), CastlingRights::of(Color::Black));
        assert_eq!(p.captured_piece(), None);
        assert_eq!(p.rule50_count(), 1);

        play(&mut p, Move::castling(sq("e8"), sq("a8")));
        assert_eq!(p.piece_on(sq("c8")), Some(Piece::new(Color::Black, PieceType::King)));
        assert_eq!(p.piece_on(sq("d8")), Some(Piece::new(Color::Black, PieceType::Rook)));
        assert_eq!(p.castling_rights(), CastlingRights::NONE);
    }

    #[test]
    fn chess960_castling_with_overlapping_squares() {
        // King on f1 and rook on g1: castling short lands on g1/f1.
        let fen = "4k3/8/8/8/8/8/8/5KR1 w G - 0 1";
        let mut p = Position::from_fen(fen, true, &hash_tables()).unwrap();
        let m = Move::castling(sq("f1"), sq("g1"));
        play(&mut p, m);
        assert_eq!(p.piece_on(sq("g1")), Some(Piece::new(Color::White, PieceType::King)));
        assert_eq!(p.piece_on(sq("f1")), Some(Piece::new(Color::White, PieceType::Rook)));
        p.undo_move(m);
        assert_eq!(p.fen(), fen);
    }

    #[test]
    fn rook_capture_removes_castling_right() {
        let mut p = pos("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
        play(&mut p, mv("a1", "a8"));
        assert_eq!(
            p.castling_rights(),
            CastlingRights::WHITE_KINGSIDE | CastlingRights::BLACK_KINGSIDE
        );
        assert_eq!(p.captured_piece(), Some(Piece::new(Color::Black, PieceType::Rook)));
        assert!(p.in_check());
    }

    #[test]
    fn promotion_updates_material_and_keys() {
        let mut p = pos("4k3/1P6/8/8/8/8/8/4K3 w - - 0 1");
        let pawn_key = p.pawn_key();
        let m = Move::with_promotion(sq("b7"), sq("b8"), PieceType::Queen);
        play(&mut p, m);
        assert_eq!(p.piece_on(sq("b8")), Some(Piece::new(Color::White, PieceType::Queen)));
        assert_eq!(p.non_pawn_material(Color::White), PieceType::Queen.value());
        assert_eq!(p.pawn_key(), p.tables().zobrist.no_pawns());
        assert!(p.in_check());

        let fresh = pos(&p.fen());
        assert_eq!(p.material_key(), fresh.material_key());
        assert_eq!(p.pawn_key(), fresh.pawn_key());

        p.undo_move(m);
        assert_eq!(p.pawn_key(), pawn_key);
        assert_eq!(p.non_pawn_material(Color::White), 0);
    }

    #[test]
    fn capture_matches_fresh_material_key() {
        let mut p = pos("4k3/8/3n4/8/4B3/8/8/4K3 w - - 5 40");
        play(&mut p, mv("e1", "e2"));
        play(&mut p, mv("e8", "e7"));
        play(&mut p, mv("e4", "f5"));
        play(&mut p, mv("d6", "f5"));
        assert_eq!(p.rule50_count(), 0);
        let fresh = pos(&p.fen());
        assert_eq!(p.material_key(), fresh.material_key());
        assert_eq!(p.non_pawn_material(Color::White), 0);
        assert_eq!(p.non_pawn_material(Color::Black), PieceType::Knight.value());
    }

    #[test]
    fn game_ply_tracks_moves() {
        let mut p = starting();
        play(&mut p, mv("e2", "e4"));
        play(&mut p, mv("e7", "e5"));
        assert_eq!(p.game_ply(), 2);
        assert!(p.fen().ends_with(" 0 2"));
    }

    // =========================================================================
    // Null move / key_after
    // =========================================================================

    #[test]
    fn null_move_flips_side_and_clears_ep() {
        let mut p = pos("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        let key = p.key();
        p.do_null_move();
        assert_eq!(p.side_to_move(), Color::Black);
        assert_eq!(p.ep_square(), None);
        assert_eq!(p.key(), p.compute_key());
        assert_eq!(p.st().plies_from_null, 0);
        p.undo_null_move();
        assert_eq!(p.key(), key);
        assert_eq!(p.ep_square(), Some(sq("f6")));
    }

    #[test]
    fn key_after_predicts_normal_moves() {
        let mut p = pos("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        for m in [mv("e5", "f7"), mv("f3", "f6"), mv("c3", "b1")] {
            let predicted = p.key_after(m);
            p.make_move(m);
            assert_eq!(predicted, p.key(), "prediction for {m}");
            p.undo_move(m);
        }
    }

    // =========================================================================
    // Flip / material code / display
    // =========================================================================

    #[test]
    fn flip_mirrors_colours() {
        let mut p = pos("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        p.flip().unwrap();
        assert_eq!(
            p.fen(),
            "rnbqkbnr/pppp1ppp/8/8/3PpP2/8/PPP1P1PP/RNBQKBNR b KQkq f3 0 3"
        );
        p.flip().unwrap();
        assert_eq!(
            p.fen(),
            "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3"
        );
    }

    #[test]
    fn material_code_builds_endgame() {
        let t = hash_tables();
        let p = Position::from_material_code("KBPKN", Color::White, &t).unwrap();
        assert_eq!(p.fen(), "8/kn6/8/8/8/8/KBP5/8 w - - 0 10");
        let q = Position::from_material_code("KNKBP", Color::Black, &t).unwrap();
        assert_eq!(q.fen(), "8/KBP5/8/8/8/8/kn6/8 w - - 0 10");
        // Same material on different squares.
        assert_eq!(p.material_key(), q.material_key());
        assert_ne!(p.key(), q.key());
        assert!(Position::from_material_code("QK", Color::White, &t).is_err());
        assert!(Position::from_material_code("KRRRRRRRRK", Color::White, &t).is_err());
    }

    #[test]
    fn display_shows_fen_key_and_checkers() {
        let p = pos("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1");
        let text = p.to_string();
        assert!(text.contains("Fen: 4k3/8/8/8/8/8/4r3/4K3 w - - 0 1"));
        assert!(text.contains(&format!("Key: {:016X}", p.key())));
        assert!(text.contains("Checkers: e2"));
        assert!(text.contains(" | r | "));
    }
}
