//! Logging macros with verbosity level control.
//!
//! Events are emitted through `tracing`, so nothing is printed unless a
//! subscriber is installed (see [`init_logging`]). The verbosity gate keeps
//! hot loops free of event construction when disabled.
//!
//! Verbosity levels match the Python pipeline's logger:
//! - 0: SILENT (warnings and errors only)
//! - 1: CHANGES (job start/finish, graph builds, cache hits)
//! - 2: CHECKS (skipped origins, progress)
//! - 3: DEBUG (per-search statistics)

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at CHANGES level (verbosity >= 1).
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            tracing::info!($($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            tracing::debug!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            tracing::trace!($($arg)*);
        }
    };
}

static SUBSCRIBER_INSTALLED: OnceLock<bool> = OnceLock::new();

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Only the first call has
/// an effect; returns whether this process ended up with our subscriber (false
/// if the host application had already installed its own).
pub fn init_logging(default_level: &str) -> bool {
    *SUBSCRIBER_INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_constants() {
        assert_eq!(VERBOSITY_SILENT, 0);
        assert_eq!(VERBOSITY_CHANGES, 1);
        assert_eq!(VERBOSITY_CHECKS, 2);
        assert_eq!(VERBOSITY_DEBUG, 3);
    }

    #[test]
    fn test_log_macros_compile() {
        let verbosity = VERBOSITY_DEBUG;
        log_changes!(verbosity, "test {}", 1);
        log_checks!(verbosity, origin = 7, "test {}", 2);
        log_debug!(verbosity, "test {}", 3);
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let first = init_logging("warn");
        let second = init_logging("trace");
        assert_eq!(first, second);
    }
}
