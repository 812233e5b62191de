pub mod attacks;
pub mod board;
pub mod cuckoo;
pub mod legality;
pub mod movegen;
pub mod repetition;
pub mod see;
pub mod state;
pub mod tables;
pub mod types;
pub mod zobrist;

pub use board::{Position, START_FEN};
pub use movegen::{legal_moves, parse_uci_move};
pub use state::StateInfo;
pub use tables::{HashTables, init};
pub use types::*;
