//! Logging Configuration
//!
//! Library crates log through the `log` facade; the subscriber installed here
//! bridges those records and writes everything to stderr so stdout carries
//! only model output.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "CHORUS_LOG_LEVEL";

/// HTTP stack crates stay quiet unless something goes wrong.
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "rustls", "reqwest"];

pub fn parse_log_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_lowercase().as_str() {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}

pub fn level_to_str(level: LevelFilter) -> &'static str {
    [
        (LevelFilter::TRACE, "trace"),
        (LevelFilter::DEBUG, "debug"),
        (LevelFilter::INFO, "info"),
        (LevelFilter::WARN, "warn"),
        (LevelFilter::ERROR, "error"),
    ]
    .into_iter()
    .find(|(candidate, _)| *candidate == level)
    .map_or("off", |(_, name)| name)
}

/// Flag first, then the environment, then `info` (`debug` when verbose).
pub fn resolve_level(flag: Option<&str>, env_value: Option<&str>, verbose: bool) -> LevelFilter {
    let fallback = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    for (source, value) in [("--log-level", flag), (LOG_LEVEL_ENV, env_value)] {
        let Some(value) = value else {
            continue;
        };
        match parse_log_level(value) {
            Some(level) => return level,
            None => eprintln!(
                "Warning: Invalid {} '{}', falling back to default",
                source, value
            ),
        }
    }
    fallback
}

fn build_filter(level: LevelFilter) -> EnvFilter {
    let level = level_to_str(level);
    let mut directives = vec![level.to_string()];
    if level != "off" {
        directives.extend(NOISY_TARGETS.iter().map(|target| format!("{}=warn", target)));
    }
    EnvFilter::new(directives.join(","))
}

pub fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))
}
