//! Attack queries, pin detection and move legality.

use crate::engine::attacks;
use crate::engine::board::{Position, castling_targets};
use crate::engine::movegen;
use crate::engine::types::{Bitboard, Color, Move, MoveKind, PieceType, Square};

impl Position {
    // =========================================================================
    // Attacks and pins
    // =========================================================================

    /// Pieces of either colour that are the only piece between `s` and a
    /// slider in `sliders`, plus the sliders that pin a piece of the colour
    /// standing on `s`. Returns `(blockers, pinners)`.
    pub fn slider_blockers(&self, sliders: Bitboard, s: Square) -> (Bitboard, Bitboard) {
        let t = attacks::tables();
        let mut blockers = Bitboard::EMPTY;
        let mut pinners = Bitboard::EMPTY;

        let queens = self.by_type(PieceType::Queen);
        let snipers = ((t.rook_attacks(s, Bitboard::EMPTY) & (queens | self.by_type(PieceType::Rook)))
            | (t.bishop_attacks(s, Bitboard::EMPTY) & (queens | self.by_type(PieceType::Bishop))))
            & sliders;
        let occupancy = self.occupied() ^ snipers;
        let own = self.piece_on(s).map(|pc| self.by_color(pc.color));

        for sniper in snipers.iter() {
            let b = t.between(s, sniper) & occupancy;
            if b.is_not_empty() && !b.more_than_one() {
                blockers |= b;
                if own.is_some_and(|own| (b & own).is_not_empty()) {
                    pinners.set(sniper);
                }
            }
        }
        (blockers, pinners)
    }

    /// Pieces of both colours attacking `s`, with sliders seen through
    /// `occupied` rather than the actual board.
    pub fn attackers_to(&self, s: Square, occupied: Bitboard) -> Bitboard {
        let t = attacks::tables();
        let queens = self.by_type(PieceType::Queen);
        (t.pawn_attacks(Color::Black, s) & self.pieces(Color::White, PieceType::Pawn))
            | (t.pawn_attacks(Color::White, s) & self.pieces(Color::Black, PieceType::Pawn))
            | (t.knight_attacks(s) & self.by_type(PieceType::Knight))
            | (t.rook_attacks(s, occupied) & (self.by_type(PieceType::Rook) | queens))
            | (t.bishop_attacks(s, occupied) & (self.by_type(PieceType::Bishop) | queens))
            | (t.king_attacks(s) & self.by_type(PieceType::King))
    }

    /// Enemy sliders that would hit `ksq` through `occupied`.
    fn slider_attacks_on(&self, ksq: Square, occupied: Bitboard, by: Color) -> Bitboard {
        let t = attacks::tables();
        let queens = self.pieces(by, PieceType::Queen);
        (t.rook_attacks(ksq, occupied) & (queens | self.pieces(by, PieceType::Rook)))
            | (t.bishop_attacks(ksq, occupied) & (queens | self.pieces(by, PieceType::Bishop)))
    }

    // =========================================================================
    // Legality
    // =========================================================================

    /// Whether a pseudo-legal move leaves the mover's king safe.
    pub fn legal(&self, m: Move) -> bool {
        debug_assert!(m.is_ok());
        let t = attacks::tables();
        let us = self.side_to_move();
        let them = !us;
        let (from, to) = (m.from, m.to);
        let ksq = self.king_square(us);

        debug_assert_eq!(self.piece_on(from).map(|pc| pc.color), Some(us));

        match m.kind {
            MoveKind::EnPassant => {
                let capsq = to.offset(-us.pawn_push());
                let occupied = (self.occupied()
                    ^ Bitboard::from_square(from)
                    ^ Bitboard::from_square(capsq))
                    | Bitboard::from_square(to);
                debug_assert_eq!(self.ep_square(), Some(to));
                self.slider_attacks_on(ksq, occupied, them).is_empty()
            }
            MoveKind::Castling => {
                // The generator leaves attacks on the king's path to us.
                let (kto, _) = castling_targets(us, to > from);
                let step: i8 = if kto > from { -1 } else { 1 };
                let mut s = kto;
                while s != from {
                    if (self.attackers_to(s, self.occupied()) & self.by_color(them)).is_not_empty() {
                        return false;
                    }
                    s = s.offset(step);
                }
                // A Chess960 rook may be the piece shielding the king.
                !self.is_chess960() || !self.blockers_for_king(us).is_set(to)
            }
            _ if self.piece_on(from).is_some_and(|pc| pc.kind == PieceType::King) => {
                let occupied = self.occupied() ^ Bitboard::from_square(from);
                (self.attackers_to(to, occupied) & self.by_color(them)).is_empty()
            }
            _ => !self.blockers_for_king(us).is_set(from) || t.aligned(from, to, ksq),
        }
    }

    /// Screen a move of unknown origin (hash table, protocol input) against
    /// the current board. Accepts exactly the moves the generator could
    /// have produced here.
    pub fn pseudo_legal(&self, m: Move) -> bool {
        if !m.is_ok() {
            return false;
        }
        let t = attacks::tables();
        let us = self.side_to_move();
        let them = !us;
        let (from, to) = (m.from, m.to);

        if m.kind != MoveKind::Normal {
            return movegen::generate(self).contains(&m);
        }
        if m.promotion.is_some() {
            return false;
        }

        let Some(pc) = self.piece_on(from) else {
            return false;
        };
        if pc.color != us || self.by_color(us).is_set(to) {
            return false;
        }

        if pc.kind == PieceType::Pawn {
            // Promotions are never normal moves.
            if (Bitboard::RANK_1 | Bitboard::RANK_8).is_set(to) {
                return false;
            }
            let push = us.pawn_push();
            let delta = to.0 as i8 - from.0 as i8;
            let capture = (t.pawn_attacks(us, from) & self.by_color(them)).is_set(to);
            let single = delta == push && self.is_empty(to);
            let double = delta == 2 * push
                && from.relative_rank(us) == 1
                && self.is_empty(to)
                && self.is_empty(to.offset(-push));
            if !(capture || single || double) {
                return false;
            }
        } else if !t.attacks(pc.kind, from, self.occupied()).is_set(to) {
            return false;
        }

        // Evasions: the generator would only produce moves that deal with
        // the check.
        let checkers = self.checkers();
        if checkers.is_not_empty() {
            if pc.kind != PieceType::King {
                if checkers.more_than_one() {
                    return false;
                }
                let ksq = self.king_square(us);
                if !t.between(ksq, checkers.lsb_square()).is_set(to) {
                    return false;
                }
            } else {
                let occupied = self.occupied() ^ Bitboard::from_square(from);
                if (self.attackers_to(to, occupied) & self.by_color(them)).is_not_empty() {
                    return false;
                }
            }
        }
        true
    }

    /// Whether a pseudo-legal move checks the opponent.
    pub fn gives_check(&self, m: Move) -> bool {
        debug_assert!(m.is_ok());
        let t = attacks::tables();
        let us = self.side_to_move();
        let (from, to) = (m.from, m.to);
        let Some(pc) = self.piece_on(from) else {
            return false;
        };
        debug_assert_eq!(pc.color, us);
        let their_king = self.king_square(!us);

        // Direct check.
        if self.check_squares(pc.kind).is_set(to) {
            return true;
        }

        // Discovered check.
        if self.blockers_for_king(!us).is_set(from) {
            return !t.aligned(from, to, their_king) || m.kind == MoveKind::Castling;
        }

        match m.kind {
            MoveKind::Normal => false,
            MoveKind::Promotion => m.promotion.is_some_and(|promo| {
                t.attacks(promo, to, self.occupied() ^ Bitboard::from_square(from))
                    .is_set(their_king)
            }),
            // Only the rare discovered check through the captured pawn is
            // left to find.
            MoveKind::EnPassant => {
                let capsq = Square::from_file_rank(to.file(), from.rank());
                let occupied = (self.occupied()
                    ^ Bitboard::from_square(from)
                    ^ Bitboard::from_square(capsq))
                    | Bitboard::from_square(to);
                self.slider_attacks_on(their_king, occupied, us).is_not_empty()
            }
            MoveKind::Castling => {
                let (kto, rto) = castling_targets(us, to > from);
                let occupied = (self.occupied()
                    ^ Bitboard::from_square(from)
                    ^ Bitboard::from_square(to))
                    | Bitboard::from_square(rto)
                    | Bitboard::from_square(kto);
                t.rook_attacks(rto, occupied).is_set(their_king)
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
