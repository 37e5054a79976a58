use tracing_subscriber::{EnvFilter, fmt};

/// Install the global `tracing` subscriber.
///
/// `BOARDSIGHT_LOG` is checked first, then `RUST_LOG`; otherwise `info`, or
/// `debug` for this crate when `verbose` is set. Logs go to stderr so stdout
/// stays clean for move output.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "info,boardsight=debug" } else { "warn,boardsight=info" };
    let filter = EnvFilter::try_from_env("BOARDSIGHT_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // a second call (e.g. from tests) keeps the first subscriber
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init();
}
