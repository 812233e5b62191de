//! Static exchange evaluation.

use crate::engine::attacks;
use crate::engine::board::Position;
use crate::engine::types::{Bitboard, Move, MoveKind, PieceType, Value};

/// Capturing pieces in the order they are thrown into an exchange.
const EXCHANGE_ORDER: [PieceType; 5] = [
    PieceType::Pawn,
    PieceType::Knight,
    PieceType::Bishop,
    PieceType::Rook,
    PieceType::Queen,
];

impl Position {
    /// Whether the exchange started by `m` on its destination square nets
    /// at least `threshold` for the side to move, assuming both sides
    /// always recapture with their least valuable piece and may stop at
    /// any point. Special moves are scored as an even trade.
    pub fn see_ge(&self, m: Move, threshold: Value) -> bool {
        debug_assert!(m.is_ok());

        if m.kind != MoveKind::Normal {
            return 0 >= threshold;
        }

        let t = attacks::tables();
        let (from, to) = (m.from, m.to);
        let value_on = |s| self.piece_on(s).map_or(0, |pc| pc.kind.value());

        let mut swap = value_on(to) - threshold;
        if swap < 0 {
            return false;
        }
        swap = value_on(from) - swap;
        if swap <= 0 {
            return true;
        }

        debug_assert_eq!(self.piece_on(from).map(|pc| pc.color), Some(self.side_to_move()));

        // Lifting `to` as well keeps the pin test below honest when the
        // first capture takes a pinner.
        let mut occupied = self.occupied() ^ Bitboard::from_square(from) ^ Bitboard::from_square(to);
        let mut stm = self.side_to_move();
        let mut attackers = self.attackers_to(to, occupied);
        let diagonal = self.by_type(PieceType::Bishop) | self.by_type(PieceType::Queen);
        let straight = self.by_type(PieceType::Rook) | self.by_type(PieceType::Queen);
        let mut res = true;

        loop {
            stm = !stm;
            attackers &= occupied;

            let mut stm_attackers = attackers & self.by_color(stm);
            if stm_attackers.is_empty() {
                break;
            }

            // Pinned pieces may not join while their pinner is still there.
            if (self.pinners(!stm) & occupied).is_not_empty() {
                stm_attackers &= !self.blockers_for_king(stm);
                if stm_attackers.is_empty() {
                    break;
                }
            }

            res = !res;

            let Some((kind, bb)) = EXCHANGE_ORDER
                .iter()
                .map(|&pt| (pt, stm_attackers & self.by_type(pt)))
                .find(|(_, bb)| bb.is_not_empty())
            else {
                // Only the king is left: the capture stands only if nothing
                // can take it back.
                let defended = (attackers & !self.by_color(stm)).is_not_empty();
                return res != defended;
            };

            occupied ^= bb.lsb_bb();
            swap = kind.value() - swap;
            if swap < Value::from(res) {
                break;
            }

            // Reveal sliders that were behind the piece just used.
            if matches!(kind, PieceType::Pawn | PieceType::Bishop | PieceType::Queen) {
                attackers |= t.bishop_attacks(to, occupied) & diagonal;
            }
            if matches!(kind, PieceType::Rook | PieceType::Queen) {
                attackers |= t.rook_attacks(to, occupied) & straight;
            }
        }

        res
    }
}
