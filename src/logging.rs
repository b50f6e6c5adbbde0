//! Logging setup shared by the server and client modes.
//!
//! Logs go to stderr; stdout is reserved for the CSV report.
//!
//! # Environment Variables
//!
//! - `PHRED_DISPATCH_LOG` - Log filter (overrides RUST_LOG)
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line
    Json,
}

/// Filter used when no environment variable is set.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "phred_dispatch=info",
        1 => "phred_dispatch=debug",
        _ => "phred_dispatch=trace",
    }
}

fn build_filter(verbosity: u8) -> EnvFilter {
    let from_env = std::env::var("PHRED_DISPATCH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok();
    from_env
        .and_then(|filter| EnvFilter::try_new(filter).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)))
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init(verbosity: u8, format: LogFormat) {
    let filter = build_filter(verbosity);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::from_str("pretty", false), Ok(LogFormat::Pretty));
        assert_eq!(LogFormat::from_str("compact", false), Ok(LogFormat::Compact));
        assert_eq!(LogFormat::from_str("JSON", true), Ok(LogFormat::Json));
        assert!(LogFormat::from_str("xml", true).is_err());
    }

    #[test]
    fn test_verbosity_directives() {
        assert_eq!(default_directive(0), "phred_dispatch=info");
        assert_eq!(default_directive(1), "phred_dispatch=debug");
        assert_eq!(default_directive(5), "phred_dispatch=trace");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(0, LogFormat::Compact);
        init(2, LogFormat::Json);
    }
}
