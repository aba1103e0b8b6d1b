use std::io::{self, IsTerminal as _};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

const ENV_NAME: &str = "SWEEPTREE_LOG";

fn istty() -> bool {
    io::stdout().is_terminal() && io::stderr().is_terminal()
}

/// Creates the env filter from [`ENV_NAME`], falling back to `warn`.
fn env_filter() -> EnvFilter {
    let directives = match std::env::var(ENV_NAME) {
        Ok(env) => env,
        Err(std::env::VarError::NotPresent) => String::new(),
        Err(std::env::VarError::NotUnicode(_)) => {
            panic!("Environment variable {} is not unicode", ENV_NAME);
        }
    };

    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directives)
}

/// Install a global `tracing` subscriber writing compact lines to stderr.
///
/// Calling this more than once is harmless: only the first subscriber is kept. Tests call it
/// freely.
pub fn init() {
    let format = fmt::format()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(false)
        .compact()
        .with_timer(fmt::time::SystemTime);
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(istty())
        .event_format(format)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
