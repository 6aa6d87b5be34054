use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the stderr subscriber. `RUST_LOG` sets the base filter (default
/// `warn`); each `-v` raises this crate's level: 1 = DEBUG, 2+ = TRACE.
pub fn init(verbosity: u8) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let level = match verbosity {
        0 => None,
        1 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    };
    if let Some(level) = level {
        if let Ok(directive) = format!("nuget_deps={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("warning: logging disabled: {err}");
    }
}
