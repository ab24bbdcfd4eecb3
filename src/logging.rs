use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "KDESK_LOG";

/// Logs go to stderr. `KDESK_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "kdesk=debug" } else { "kdesk=info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
