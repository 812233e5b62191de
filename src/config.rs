use crate::engine::START_FEN;

/// Diagnostic driver configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Position to analyse.
    pub fen: String,
    /// Parse castling rights as Chess960 and print castling as king-takes-rook.
    pub chess960: bool,
    /// Perft depth in plies.
    pub perft_depth: u32,
    /// Print per-root-move node counts.
    pub divide: bool,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = AppConfig::default();
        AppConfig {
            fen: var("CHESS_FEN").unwrap_or(defaults.fen),
            chess960: var("CHESS_960")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.chess960),
            perft_depth: var("PERFT_DEPTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.perft_depth),
            divide: var("PERFT_DIVIDE")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.divide),
        }
    }

    /// Apply positional command-line overrides: `[depth] [fen...]`. A FEN
    /// may be passed unquoted, spread over several arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter().peekable();
        if let Some(depth) = args.peek().and_then(|a| a.as_ref().parse().ok()) {
            self.perft_depth = depth;
            args.next();
        }
        let fen: Vec<String> = args.map(|a| a.as_ref().to_string()).collect();
        if !fen.is_empty() {
            self.fen = fen.join(" ");
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            fen: START_FEN.to_string(),
            chess960: false,
            perft_depth: 4,
            divide: false,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
