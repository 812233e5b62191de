//! Draw detection: fifty-move rule, repetitions and upcoming game cycles.

use crate::engine::attacks;
use crate::engine::board::Position;
use crate::engine::movegen;
use crate::engine::types::Bitboard;

impl Position {
    /// Plies back through which an identical position could still occur:
    /// both a capture/pawn move and a null move break the chain, and the
    /// state stack never reaches further back than the FEN it was set from.
    #[inline]
    fn reversible_window(&self) -> usize {
        let st = self.st();
        let end = st.rule50.min(st.plies_from_null).max(0) as usize;
        end.min(self.states().len() - 1)
    }

    /// Called by `do_move` once the new state is on the stack: look back in
    /// steps of two plies for the same key and record the distance, negated
    /// when that earlier position was already a repetition.
    pub(crate) fn update_repetition(&mut self) {
        let end = self.reversible_window();
        let cur = self.states().len() - 1;
        let key = self.key();

        let repetition = (4..=end)
            .step_by(2)
            .map(|i| (i as i32, &self.states()[cur - i]))
            .find(|(_, earlier)| earlier.key == key)
            .map_or(0, |(i, earlier)| if earlier.repetition != 0 { -i } else { i });

        self.st_mut().repetition = repetition;
    }

    /// Whether the position is drawn at search depth `ply`: fifty-move rule
    /// (unless checkmated), or a repetition that either happened after the
    /// root or is the third occurrence.
    pub fn is_draw(&self, ply: i32) -> bool {
        if self.rule50_count() > 99
            && (!self.in_check() || !movegen::legal_moves(self).is_empty())
        {
            return true;
        }
        let repetition = self.st().repetition;
        repetition != 0 && repetition < ply
    }

    /// Whether any position since the last irreversible move repeated.
    pub fn has_repeated(&self) -> bool {
        let st = self.st();
        let end = st.rule50.min(st.plies_from_null);
        self.states()
            .iter()
            .rev()
            .take((end - 3).max(0) as usize)
            .any(|s| s.repetition != 0)
    }

    /// Whether the side to move can reach an earlier position with one
    /// reversible move, or an earlier position reached this one that way.
    pub fn has_game_cycle(&self, ply: i32) -> bool {
        let end = self.reversible_window();
        if end < 3 {
            return false;
        }

        let t = attacks::tables();
        let cuckoo = &self.tables().cuckoo;
        let states = self.states();
        let cur = states.len() - 1;
        let original_key = self.key();

        for i in (3..=end).step_by(2) {
            let earlier = &states[cur - i];
            let Some(m) = cuckoo.probe(original_key ^ earlier.key) else {
                continue;
            };
            let (s1, s2) = (m.from, m.to);
            if ((t.between(s1, s2) ^ Bitboard::from_square(s2)) & self.occupied()).is_not_empty() {
                continue;
            }

            if ply > i as i32 {
                return true;
            }

            // At or before the root only a genuine repetition counts. The
            // table stores each square pair once, so find the mover first.
            let mover = if self.is_empty(s1) { s2 } else { s1 };
            if self.piece_on(mover).map(|pc| pc.color) != Some(self.side_to_move()) {
                continue;
            }
            if earlier.repetition != 0 {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tables::{self, HashTables};
    use crate::engine::types::{Move, Square};
    use std::sync::{Arc, OnceLock};

    fn hash_tables() -> Arc<HashTables> {
        static TABLES: OnceLock<Arc<HashTables>> = OnceLock::new();
        Arc::clone(TABLES.get_or_init(|| tables::init().unwrap()))
    }

    fn sq(name: &str) -> Square {
        Square::from_algebraic(name).unwrap()
    }

    fn play(p: &mut Position, moves: &[&str]) {
        for uci in moves {
            let m = Move::new(sq(&uci[..2]), sq(&uci[2..4]));
            p.make_move(m);
        }
    }

    const SHUFFLE: [&str; 4] = ["g1f3", "g8f6", "f3g1", "f6g8"];

    // =========================================================================
    // Repetition distance
    // =========================================================================

    #[test]
    fn first_repetition_is_positive() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE[..3]);
        assert_eq!(p.st().repetition, 0);
        play(&mut p, &SHUFFLE[3..]);
        assert_eq!(p.st().repetition, 4);
    }

    #[test]
    fn second_repetition_is_negative() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE);
        play(&mut p, &SHUFFLE);
        assert_eq!(p.st().repetition, -4);
    }

    #[test]
    fn window_stops_at_irreversible_move() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE);
        play(&mut p, &["e2e4", "e7e5"]);
        play(&mut p, &SHUFFLE);
        // The shuffle after the pawn moves repeats only itself.
        assert_eq!(p.st().repetition, 4);
        assert_eq!(p.rule50_count(), 4);
    }

    #[test]
    fn repetition_after_fen_with_running_clock() {
        // The clock says 40 reversible plies, but the stack starts at the FEN.
        let fen = "4k3/8/8/8/8/8/8/4K2R w - - 40 60";
        let mut p = Position::from_fen(fen, false, &hash_tables()).unwrap();
        play(&mut p, &["h1h2", "e8d8"]);
        assert_eq!(p.st().repetition, 0);
        play(&mut p, &["h2h1", "d8e8"]);
        assert_eq!(p.st().repetition, 4);
    }

    #[test]
    fn null_move_breaks_repetition_chain() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE[..2]);
        p.do_null_move();
        p.undo_null_move();
        play(&mut p, &SHUFFLE[2..]);
        assert_eq!(p.st().repetition, 4);

        let mut p = Position::starting(&hash_tables());
        play(&mut p, &["g1f3"]);
        p.do_null_move();
        play(&mut p, &["f3g1"]);
        p.do_null_move();
        assert_eq!(p.key(), Position::starting(&hash_tables()).key());
        assert_eq!(p.st().repetition, 0);
    }

    #[test]
    fn null_move_after_repetition_clears_distance() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE);
        assert_eq!(p.st().repetition, 4);

        p.do_null_move();
        assert_eq!(p.st().repetition, 0);
        assert!(!p.is_draw(100));
        p.undo_null_move();
        assert_eq!(p.st().repetition, 4);
        assert!(p.is_draw(5));
    }

    // =========================================================================
    // is_draw / has_repeated
    // =========================================================================

    #[test]
    fn repetition_draw_depends_on_ply() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE);
        assert!(p.is_draw(5));
        assert!(!p.is_draw(4));
        play(&mut p, &SHUFFLE);
        // Third occurrence: negative distance, a draw at any ply.
        assert!(p.is_draw(0));
        assert!(p.is_draw(8));
    }

    #[test]
    fn fifty_move_rule() {
        let p = Position::from_fen("4k3/8/8/8/8/8/8/4K2R w - - 100 80", false, &hash_tables())
            .unwrap();
        assert!(p.is_draw(0));

        let p = Position::from_fen("4k3/8/8/8/8/8/8/4K2R w - - 99 80", false, &hash_tables())
            .unwrap();
        assert!(!p.is_draw(0));
    }

    #[test]
    fn fifty_move_rule_yields_to_checkmate() {
        // Back-rank mate with the clock already past 100.
        let fen = "R5k1/5ppp/8/8/8/8/8/6K1 b - - 100 80";
        let p = Position::from_fen(fen, false, &hash_tables()).unwrap();
        assert!(p.in_check());
        assert!(!p.is_draw(0));

        // Stalemate at the limit is still a draw.
        let fen = "7k/5Q2/6K1/8/8/8/8/8 b - - 100 80";
        let p = Position::from_fen(fen, false, &hash_tables()).unwrap();
        assert!(p.is_draw(0));
    }

    #[test]
    fn has_repeated_sees_any_marked_state() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE);
        assert!(p.has_repeated());
        play(&mut p, &["g1f3"]);
        assert!(p.has_repeated());
        play(&mut p, &["e7e5"]);
        assert!(!p.has_repeated());
    }

    // =========================================================================
    // has_game_cycle
    // =========================================================================

    #[test]
    fn cycle_found_one_move_before_repetition() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &SHUFFLE[..3]);
        // Black can play f6g8 and restore the starting position.
        assert!(p.has_game_cycle(4));
        // At the root that would only be a second occurrence.
        assert!(!p.has_game_cycle(2));
    }

    #[test]
    fn cycle_needs_clear_path() {
        // The rook walks a8-a7-d7-d8 while the white king steps out and back,
        // so five plies ago differs from now by a8-d8 alone.
        let walk = ["a8a7", "e1e2", "a7d7", "e2e1", "d7d8"];

        let fen = "r3k3/8/8/8/8/8/8/4K3 b - - 0 1";
        let mut p = Position::from_fen(fen, false, &hash_tables()).unwrap();
        play(&mut p, &walk);
        assert!(p.has_game_cycle(10));
        // At the root the rook belongs to the side not to move.
        assert!(!p.has_game_cycle(5));

        let fen = "rn2k3/8/8/8/8/8/8/4K3 b - - 0 1";
        let mut p = Position::from_fen(fen, false, &hash_tables()).unwrap();
        play(&mut p, &walk);
        // The knight on b8 blocks a direct a8-d8.
        assert!(!p.has_game_cycle(10));
    }

    #[test]
    fn cycle_through_king_step() {
        let fen = "4k3/8/8/8/8/8/8/RN2K3 w - - 0 1";
        let mut p = Position::from_fen(fen, false, &hash_tables()).unwrap();
        play(&mut p, &["b1c3", "e8d8", "c3b1"]);
        // d8e8 would bring back the starting position.
        assert!(p.has_game_cycle(10));
    }

    #[test]
    fn no_cycle_without_reversible_window() {
        let mut p = Position::starting(&hash_tables());
        play(&mut p, &["g1f3", "g8f6"]);
        assert!(!p.has_game_cycle(10));
        play(&mut p, &["e2e4"]);
        assert!(!p.has_game_cycle(10));
    }
}
