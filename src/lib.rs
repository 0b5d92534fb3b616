//! Election Ledger
//!
//! An auditable record of voters, candidates and votes. Every mutation is
//! captured in a hash-chained history log, every voter votes at most once,
//! and the live vote counts always equal the votes recorded in the log.
//!
//! Start with [`Ledger`] for synchronous access or [`LedgerService`] for
//! the awaitable, deadline-bounded surface.

pub mod config;
pub mod crypto;
pub mod errors;
pub mod ledger;
pub mod service;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use errors::{Error, Result};
pub use ledger::{Ledger, OperationContext};
pub use service::LedgerService;

use config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with defaults (`RUST_LOG`, else `election_ledger=info`)
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "election_ledger=info".into()),
        )
        .try_init()
        .map_err(|e| Error::configuration(format!("logging already initialized: {e}")))?;

    tracing::info!("🗳️  Election ledger v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from configuration.
///
/// `RUST_LOG` still wins over `config.level` when set. Formats are
/// `pretty`, `compact` and `json`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::configuration(format!("Invalid LOG_LEVEL: {e}")))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        "pretty" => builder.pretty().try_init(),
        other => {
            return Err(Error::configuration(format!(
                "Invalid LOG_FORMAT: {other} (expected pretty, compact or json)"
            )));
        }
    };
    installed.map_err(|e| Error::configuration(format!("logging already initialized: {e}")))?;

    tracing::info!(format = %config.format, "🗳️  Election ledger v{} initialized", VERSION);
    Ok(())
}
