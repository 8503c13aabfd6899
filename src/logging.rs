use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

const DEFAULT_FILTER: &str = "info,tower_http=debug";

pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        // try_init also installs the log -> tracing bridge.
        if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
            eprintln!("failed to initialize logging: {}", e);
        }
    });
}
