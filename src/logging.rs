use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize logging on stderr, leaving stdout to the display.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects debug output for this crate.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("codeassist=debug,warn")
        } else {
            EnvFilter::new("codeassist=info,warn")
        }
    });

    // A second initialization, e.g. from tests, is a no-op.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init();
}
