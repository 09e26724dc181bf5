use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "prompt_arena=debug,info"
    } else {
        "prompt_arena=info,warn"
    }
}

/// Install the global subscriber, writing to stderr. `RUST_LOG` wins over
/// `verbose`. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
