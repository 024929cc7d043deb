use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise events from this crate at `level` and
/// above are kept. Output goes to stderr so stdout stays machine-readable.
pub fn init_tracing(level: &str, json: bool) {
    let filter_directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("finguard={level}"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directive))
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    // A subscriber may already be installed (tests, embedding binaries).
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
