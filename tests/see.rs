//! Static exchange evaluation against a plain swap-list reference on random
//! positions.

use std::sync::{Arc, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_chess_core::engine::movegen::legal_moves;
use rust_chess_core::engine::{
    self, Bitboard, Color, HashTables, Move, MoveKind, Piece, PieceType, Position, Square, Value,
    attacks,
};

fn tables() -> Arc<HashTables> {
    static TABLES: OnceLock<Arc<HashTables>> = OnceLock::new();
    Arc::clone(TABLES.get_or_init(|| engine::init().unwrap()))
}

fn value_on(pos: &Position, s: Square) -> Value {
    pos.piece_on(s).map_or(0, |pc| pc.kind.value())
}

/// Exact exchange value of `m`: both sides capture with their least
/// valuable piece and either may stand pat. Sliders are re-derived from the
/// shrinking occupancy, which reveals x-rays.
fn reference_see(pos: &Position, m: Move) -> Value {
    let to = m.to;
    let mut occupied = pos.occupied() ^ Bitboard::from_square(m.from) ^ Bitboard::from_square(to);
    let mut gain = vec![value_on(pos, to)];
    let mut on_square = value_on(pos, m.from);
    let mut side = !pos.side_to_move();

    loop {
        let attackers = pos.attackers_to(to, occupied) & occupied & pos.by_color(side);
        let next = PieceType::ALL
            .iter()
            .find_map(|&pt| (attackers & pos.by_type(pt)).iter().next().map(|s| (pt, s)));
        let Some((pt, from)) = next else {
            break;
        };
        let last = *gain.last().unwrap();
        gain.push(on_square - last);
        on_square = pt.value();
        occupied ^= Bitboard::from_square(from);
        side = !side;
    }

    while gain.len() > 1 {
        let last = gain.pop().unwrap();
        let prev = gain.last_mut().unwrap();
        *prev = -(-*prev).max(last);
    }
    gain[0]
}

/// Random position with both kings and a handful of other pieces, or
/// `None` if the draw is not a legal FEN.
fn random_position(rng: &mut StdRng) -> Option<Position> {
    let mut board: [Option<Piece>; 64] = [None; 64];
    let mut place = |rng: &mut StdRng, pc: Piece| loop {
        let s = rng.gen_range(0..64usize);
        let rank = s / 8;
        if board[s].is_none() && (pc.kind != PieceType::Pawn || (1..7).contains(&rank)) {
            board[s] = Some(pc);
            break;
        }
    };

    place(rng, Piece::new(Color::White, PieceType::King));
    place(rng, Piece::new(Color::Black, PieceType::King));
    for _ in 0..rng.gen_range(6..16) {
        let color = if rng.gen_bool(0.5) { Color::White } else { Color::Black };
        let kind = PieceType::ALL[rng.gen_range(0..5)];
        place(rng, Piece::new(color, kind));
    }

    let mut placement = String::new();
    for rank in (0..8).rev() {
        let mut empty = 0;
        for file in 0..8 {
            match board[rank * 8 + file] {
                Some(pc) => {
                    if empty > 0 {
                        placement.push_str(&empty.to_string());
                        empty = 0;
                    }
                    placement.push(pc.to_char());
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            placement.push_str(&empty.to_string());
        }
        if rank > 0 {
            placement.push('/');
        }
    }
    let stm = if rng.gen_bool(0.5) { "w" } else { "b" };
    Position::from_fen(&format!("{placement} {stm} - - 0 1"), false, &tables()).ok()
}

#[test]
fn see_ge_agrees_with_swap_list() {
    let t = attacks::tables();
    let mut rng = StdRng::seed_from_u64(0x00c0_ffee);
    let mut checked = 0;

    for _ in 0..20_000 {
        if checked >= 1_000 {
            break;
        }
        let Some(pos) = random_position(&mut rng) else {
            continue;
        };
        // The pin rule and king recaptures are covered by unit tests.
        if Color::ALL.iter().any(|&c| pos.pinners(c).is_not_empty()) {
            continue;
        }

        for m in legal_moves(&pos) {
            if m.kind != MoveKind::Normal || pos.is_empty(m.to) {
                continue;
            }
            if (t.king_attacks(m.to) & pos.by_type(PieceType::King)).is_not_empty() {
                continue;
            }

            let value = reference_see(&pos, m);
            assert!(pos.see_ge(m, value), "see_ge({m}, {value}) false in {}", pos.fen());
            assert!(
                !pos.see_ge(m, value + 1),
                "see_ge({m}, {}) true in {}",
                value + 1,
                pos.fen()
            );
            checked += 1;
        }
    }
    assert!(checked >= 200, "only {checked} captures examined");
}

#[test]
fn see_ge_on_quiet_moves_is_never_positive() {
    let pos = Position::from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        false,
        &tables(),
    )
    .unwrap();
    for m in legal_moves(&pos) {
        if m.kind == MoveKind::Normal && pos.is_empty(m.to) {
            assert!(!pos.see_ge(m, 1), "quiet move {m} gains material");
        }
    }
}
