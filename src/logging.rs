//! Logging setup
//! Timestamped `env_logger` output on stderr; stdout is left to the channel.

use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;

fn env_overrides() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

/// Installs the global logger at `level`. `RUST_LOG` overrides it.
/// Calling it twice is harmless: the second call is ignored.
///
/// The logger itself accepts every level so `set_level` can move the
/// threshold once the configuration is known.
pub fn init(level: LevelFilter) {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .target(Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        });

    if builder.try_init().is_ok() {
        set_level(level);
        log::debug!("Logging initialized at {}", log::max_level());
    }
}

/// Moves the global threshold unless `RUST_LOG` pins it.
pub fn set_level(level: LevelFilter) {
    if !env_overrides() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_follows_the_configured_level() {
        init(LevelFilter::Warn);
        if env_overrides() {
            return;
        }
        assert_eq!(log::max_level(), LevelFilter::Warn);

        set_level(LevelFilter::Debug);
        assert_eq!(log::max_level(), LevelFilter::Debug);
        set_level(LevelFilter::Info);
        assert_eq!(log::max_level(), LevelFilter::Info);
    }
}
