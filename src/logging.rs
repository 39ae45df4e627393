//! Subscriber setup for hosts embedding the geocoder.

use tracing_subscriber::EnvFilter;

fn filter(verbose: u8, quiet: bool) -> EnvFilter {
    if let Ok(env) = std::env::var("GEOCODER_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    }
}

/// Installs a stderr fmt subscriber. `GEOCODER_LOG` overrides the level
/// picked from `verbose` and `quiet`.
///
/// Panics if a global subscriber is already set.
pub fn init_tracing(verbose: u8, quiet: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose, quiet))
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Like [`init_tracing`], but does nothing when a subscriber is already
/// installed. Meant for tests.
pub fn try_init(verbose: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose, false))
        .with_test_writer()
        .without_time()
        .try_init();
}
