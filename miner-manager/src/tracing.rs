//! Logging setup.
//!
//! Log to the systemd journal when started by systemd, otherwise to stdout
//! with local timestamps. `RUST_LOG` overrides the default `info` filter.

use std::env;

use time::macros::format_description;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, fmt::time::LocalTime, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Macros for use throughout the crate.
pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy()
}

/// Install the global subscriber.
///
/// Falls back to stdout if the journal socket cannot be opened.
pub fn init_journald_or_stdout() {
    if env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(journald)
                    .init();
                return;
            }
            Err(e) => eprintln!("journald unavailable, logging to stdout: {e}"),
        }
    }

    init_stdout();
}

fn init_stdout() {
    let timer = LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(timer)
        .with_target(false)
        .init();
}
