//! Per-ply state record.
//!
//! A [`Position`](super::Position) keeps these in a stack: `do_move` pushes a
//! new record derived from the top one, `undo_move` pops it. Nothing in a
//! record is ever recomputed on undo.

use crate::engine::types::{Bitboard, CastlingRights, Color, Key, Piece, PieceType, Square, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateInfo {
    // Carried forward by do_move and then updated.
    pub pawn_key: Key,
    pub material_key: Key,
    pub non_pawn_material: [Value; 2],
    pub castling_rights: CastlingRights,
    /// Plies since the last capture or pawn move.
    pub rule50: i32,
    pub plies_from_null: i32,
    pub ep_square: Option<Square>,

    // Recomputed for every new record.
    pub key: Key,
    /// Enemy pieces giving check to the side to move.
    pub checkers: Bitboard,
    /// `blockers_for_king[c]`: pieces of either colour shielding `c`'s king
    /// from an enemy slider.
    pub blockers_for_king: [Bitboard; 2],
    /// `pinners[c]`: sliders of colour `c` pinning a piece to the enemy king.
    pub pinners: [Bitboard; 2],
    /// Squares from which a piece of each type would check the side not to
    /// move. Indexed by `PieceType::index()`.
    pub check_squares: [Bitboard; PieceType::COUNT],
    /// Piece removed by the move that produced this record.
    pub captured: Option<Piece>,
    /// Signed distance to an earlier identical position; 0 when none. Negative
    /// when that earlier position was itself a repetition.
    pub repetition: i32,
}

impl StateInfo {
    /// A new record carrying the incrementally updated fields of `self`,
    /// with everything else reset.
    #[inline]
    pub fn carried(&self) -> StateInfo {
        StateInfo {
            pawn_key: self.pawn_key,
            material_key: self.material_key,
            non_pawn_material: self.non_pawn_material,
            castling_rights: self.castling_rights,
            rule50: self.rule50,
            plies_from_null: self.plies_from_null,
            ep_square: self.ep_square,
            ..StateInfo::default()
        }
    }

    #[inline]
    pub fn non_pawn_material(&self, color: Color) -> Value {
        self.non_pawn_material[color.index()]
    }

    #[inline]
    pub fn check_squares(&self, pt: PieceType) -> Bitboard {
        self.check_squares[pt.index()]
    }
}
