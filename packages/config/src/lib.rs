// ABOUTME: Environment configuration helpers shared by dockertest crates
// ABOUTME: Exposes variable name constants and typed readers with lenient parsing

pub mod constants;

use std::time::Duration;
use tracing::warn;

/// Read a non-empty string variable.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read a whole number of seconds.
///
/// Unparseable values are logged and ignored so a typo in the environment
/// falls back to the built-in default instead of aborting the run.
pub fn env_duration_secs(name: &str) -> Option<Duration> {
    let raw = env_string(name)?;
    parse_secs(&raw).or_else(|| {
        warn!("Ignoring {}={:?}: expected a whole number of seconds", name, raw);
        None
    })
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_secs(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_secs("5m"), None);
        assert_eq!(parse_secs("-1"), None);
    }

    #[test]
    fn test_env_readers_ignore_missing_and_blank() {
        let name = "DOCKERTEST_CONFIG_TEST_BLANK";
        std::env::set_var(name, "   ");
        assert_eq!(env_string(name), None);
        assert_eq!(env_duration_secs(name), None);
        std::env::remove_var(name);
        assert_eq!(env_string(name), None);
    }

    #[test]
    fn test_env_duration_secs_reads_value() {
        let name = "DOCKERTEST_CONFIG_TEST_SECS";
        std::env::set_var(name, "120");
        assert_eq!(env_duration_secs(name), Some(Duration::from_secs(120)));
        std::env::set_var(name, "soon");
        assert_eq!(env_duration_secs(name), None);
        std::env::remove_var(name);
    }
}
