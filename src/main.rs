use std::process::ExitCode;
use std::time::Instant;

use rust_chess_core::config::AppConfig;
use rust_chess_core::engine::{self, Position, movegen};

fn main() -> ExitCode {
    // Initialize tracing (structured logging).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_chess_core=info".into()),
        )
        .init();

    let config = AppConfig::from_env().with_args(std::env::args().skip(1));

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &AppConfig) -> Result<(), engine::ChessError> {
    let tables = engine::init()?;
    let mut pos = Position::from_fen(&config.fen, config.chess960, &tables)?;
    pos.reserve_plies(config.perft_depth as usize);

    tracing::info!(
        "rust-chess-core v{} perft depth {} on {}",
        env!("CARGO_PKG_VERSION"),
        config.perft_depth,
        pos.fen()
    );
    println!("{pos}");

    let started = Instant::now();
    let nodes = if config.divide {
        let split = movegen::divide(&mut pos, config.perft_depth);
        for (m, count) in &split {
            println!("{}: {count}", m.to_uci(pos.is_chess960()));
        }
        split.iter().map(|(_, count)| count).sum()
    } else {
        movegen::perft(&mut pos, config.perft_depth)
    };
    let elapsed = started.elapsed();

    let nps = (nodes as f64 / elapsed.as_secs_f64().max(1e-9)) as u64;
    tracing::info!(nodes, elapsed_ms = elapsed.as_millis() as u64, nps, "perft finished");
    println!("\nNodes searched: {nodes}");
    Ok(())
}
