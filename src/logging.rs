//! Log output for the `svw` binary.
//!
//! Everything goes to stderr so stdout stays clean for `--json` output.
//! `RUST_LOG` overrides the default filter.

use tracing_subscriber::EnvFilter;

/// Default filter: our own crate at `info`, everything else at `warn`.
/// Child output is printed by `svw run` itself, so its log target is off.
pub const DEFAULT_FILTER: &str = "warn,svcwarden=info,svcwarden::child=off";

/// Install the global subscriber. Later calls are no-ops.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,svcwarden=debug,svcwarden::child=off")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}
