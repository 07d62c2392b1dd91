//! Subscriber installation

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable lines on stderr, debug and up
    Development,
    /// JSON lines on stderr, info and up
    Production,
    /// No output; tests use `init_test_capture`
    Test,
}

impl Profile {
    /// Filter used when `RUST_LOG` is unset
    fn default_directives(self) -> &'static str {
        match self {
            Profile::Development => "bincore_core=debug,bincore_engine=debug,bincore=debug",
            Profile::Production => "bincore_core=info,bincore_engine=info,bincore=info",
            Profile::Test => "off",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber for `profile`; later calls are no-ops
///
/// `RUST_LOG` overrides the profile's default filter.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| match profile {
        Profile::Development => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_env_filter(profile.filter())
                .init();
        }
        Profile::Production => {
            tracing_subscriber::fmt()
                .json()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_env_filter(profile.filter())
                .init();
        }
        Profile::Test => {
            tracing_subscriber::registry().init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_is_quieter_than_development() {
        assert!(Profile::Development.default_directives().contains("=debug"));
        assert!(!Profile::Production.default_directives().contains("=debug"));
        assert_eq!(Profile::Test.default_directives(), "off");
    }
}
