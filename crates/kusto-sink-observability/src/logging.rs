//! Tracing subscriber setup for binaries.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Filter built from `RUST_LOG` (e.g. `info,kusto_sink_connector=debug`),
/// `info` otherwise.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global fmt subscriber filtered by `RUST_LOG`.
///
/// Returns false when a global subscriber was already installed.
pub fn init_from_env() -> bool {
    init_with_filter(env_filter())
}

pub fn init_with_filter(filter: EnvFilter) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_target_directives_are_kept() {
        let filter = EnvFilter::try_new("warn,kusto_sink_connector=debug").unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("kusto_sink_connector=debug"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    fn test_default_directive_is_info() {
        assert!(EnvFilter::new(DEFAULT_DIRECTIVE).to_string().contains("info"));
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let _first = init_with_filter(EnvFilter::new("warn"));
        assert!(!init_with_filter(EnvFilter::new("debug")));
    }
}
