//! Move generation.
//!
//! Pipeline:
//!   1. [`generate`] produces pseudo-legal moves: check evasions when the
//!      side to move is in check, every non-evasion otherwise. Pins and
//!      attacked castling paths are not looked at.
//!   2. [`legal_moves`] keeps the ones [`Position::legal`] accepts.
//!
//! Castling is emitted as "king takes own rook", the encoding `do_move`
//! expects.

use crate::engine::attacks;
use crate::engine::board::Position;
use crate::engine::types::{Bitboard, CastlingRights, ChessError, Color, Move, PieceType, Square};

// =========================================================================
// Public API
// =========================================================================

/// Pseudo-legal moves for the side to move.
pub fn generate(pos: &Position) -> Vec<Move> {
    let mut moves = Vec::with_capacity(128);
    let us = pos.side_to_move();
    let ksq = pos.king_square(us);
    let checkers = pos.checkers();

    if checkers.is_empty() {
        let target = !pos.by_color(us);
        generate_pawn_moves(pos, us, target, &mut moves);
        generate_piece_moves(pos, us, target, &mut moves);
        generate_king_moves(pos, us, target, &mut moves);
        generate_castling_moves(pos, us, &mut moves);
        return moves;
    }

    // In double check only the king can move.
    if !checkers.more_than_one() {
        let target = attacks::tables().between(ksq, checkers.lsb_square());
        generate_pawn_moves(pos, us, target, &mut moves);
        generate_piece_moves(pos, us, target, &mut moves);
    }
    generate_king_evasions(pos, us, &mut moves);
    moves
}

/// Legal moves for the side to move.
pub fn legal_moves(pos: &Position) -> Vec<Move> {
    let mut moves = generate(pos);
    moves.retain(|&m| pos.legal(m));
    moves
}

/// Resolve a UCI move string (`e2e4`, `e7e8q`, `e1g1`, or `e1h1` in
/// Chess960) against the legal moves of `pos`.
pub fn parse_uci_move(pos: &Position, uci: &str) -> Result<Move, ChessError> {
    let uci = uci.trim().to_ascii_lowercase();
    legal_moves(pos)
        .into_iter()
        .find(|m| m.to_uci(pos.is_chess960()) == uci)
        .ok_or_else(|| ChessError::InvalidMove(format!("illegal or malformed move '{uci}'")))
}

/// Leaf nodes of the legal move tree `depth` plies deep. Make/unmake and
/// legality are exercised on every edge.
pub fn perft(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let moves = legal_moves(pos);
    if depth == 1 {
        return moves.len() as u64;
    }
    let mut nodes = 0u64;
    for m in moves {
        pos.make_move(m);
        nodes += perft(pos, depth - 1);
        pos.undo_move(m);
    }
    nodes
}

/// Per-root-move perft counts, in generation order.
pub fn divide(pos: &mut Position, depth: u32) -> Vec<(Move, u64)> {
    let depth = depth.max(1);
    legal_moves(pos)
        .into_iter()
        .map(|m| {
            pos.make_move(m);
            let nodes = perft(pos, depth - 1);
            pos.undo_move(m);
            (m, nodes)
        })
        .collect()
}

// =========================================================================
// Pawn moves
// =========================================================================

fn generate_pawn_moves(pos: &Position, us: Color, target: Bitboard, moves: &mut Vec<Move>) {
    let t = attacks::tables();
    let pawns = pos.pieces(us, PieceType::Pawn);
    let enemy = pos.by_color(!us);
    let push = us.pawn_push();

    for from in pawns.iter() {
        let promotes = from.relative_rank(us) == 6;

        // --- Pushes ---
        let to = from.offset(push);
        if pos.is_empty(to) {
            if target.is_set(to) {
                if promotes {
                    add_promotions(from, to, moves);
                } else {
                    moves.push(Move::new(from, to));
                }
            }

            // --- Double push ---
            if from.relative_rank(us) == 1 {
                let to2 = to.offset(push);
                if pos.is_empty(to2) && target.is_set(to2) {
                    moves.push(Move::new(from, to2));
                }
            }
        }

        // --- Captures (including promotion captures) ---
        for to in (t.pawn_attacks(us, from) & enemy & target).iter() {
            if promotes {
                add_promotions(from, to, moves);
            } else {
                moves.push(Move::new(from, to));
            }
        }

        // --- En passant ---
        if let Some(ep) = pos.ep_square()
            && t.pawn_attacks(us, from).is_set(ep)
            && en_passant_in_target(pos, us, ep, target)
        {
            moves.push(Move::en_passant(from, ep));
        }
    }
}

/// An en passant capture answers a check only by taking the checking pawn
/// or by landing on the checking ray.
fn en_passant_in_target(pos: &Position, us: Color, ep: Square, target: Bitboard) -> bool {
    if pos.checkers().is_empty() {
        return true;
    }
    let capsq = ep.offset(-us.pawn_push());
    target.is_set(ep) || pos.checkers().is_set(capsq)
}

/// Add all four promotion variants for a pawn push or capture.
fn add_promotions(from: Square, to: Square, moves: &mut Vec<Move>) {
    for promo in [
        PieceType::Queen,
        PieceType::Rook,
        PieceType::Bishop,
        PieceType::Knight,
    ] {
        moves.push(Move::with_promotion(from, to, promo));
    }
}

// =========================================================================
// Knight and slider moves
// =========================================================================

fn generate_piece_moves(pos: &Position, us: Color, target: Bitboard, moves: &mut Vec<Move>) {
    let t = attacks::tables();
    let occ = pos.occupied();

    for piece in [
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
    ] {
        for from in pos.pieces(us, piece).iter() {
            for to in (t.attacks(piece, from, occ) & target).iter() {
                moves.push(Move::new(from, to));
            }
        }
    }
}

// =========================================================================
// King moves
// =========================================================================

fn generate_king_moves(pos: &Position, us: Color, target: Bitboard, moves: &mut Vec<Move>) {
    let t = attacks::tables();
    let ksq = pos.king_square(us);
    for to in (t.king_attacks(ksq) & target).iter() {
        moves.push(Move::new(ksq, to));
    }
}

/// King steps out of check. Squares further along a checking slider's ray
/// are skipped up front; everything else is left to `legal`.
fn generate_king_evasions(pos: &Position, us: Color, moves: &mut Vec<Move>) {
    let t = attacks::tables();
    let ksq = pos.king_square(us);
    let slider_checkers =
        pos.checkers() & !(pos.by_type(PieceType::Pawn) | pos.by_type(PieceType::Knight));

    let mut slider_rays = Bitboard::EMPTY;
    for checker in slider_checkers.iter() {
        slider_rays |= t.line(checker, ksq) ^ Bitboard::from_square(checker);
    }

    generate_king_moves(pos, us, !pos.by_color(us) & !slider_rays, moves);
}

// =========================================================================
// Castling
// =========================================================================

/// Castling moves whose right is intact and whose path is empty. Attacks
/// on the king's path are checked by `legal`.
fn generate_castling_moves(pos: &Position, us: Color, moves: &mut Vec<Move>) {
    let ksq = pos.king_square(us);
    for king_side in [true, false] {
        let cr = CastlingRights::single(us, king_side);
        if !pos.can_castle(cr) || pos.castling_impeded(cr) {
            continue;
        }
        if let Some(rsq) = pos.castling_rook_square(cr) {
            moves.push(Move::castling(ksq, rsq));
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
