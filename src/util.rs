//! Small shared helpers: compact duration strings and short random IDs.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Parse a compact duration string like `"30s"`, `"5m"`, `"12h"` or `"31d"`.
///
/// All `\d+[smhd]` groups in the input are summed, so `"1h30m"` is ninety
/// minutes. When the input contains no valid group the `default` string is
/// parsed instead; the default must itself be well-formed.
pub fn parse_duration(input: &str, default: &str) -> Duration {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+)([smhd])").unwrap());

    let mut total = Duration::ZERO;
    let mut matched = false;

    for caps in re.captures_iter(input) {
        let value: u64 = match caps[1].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        matched = true;

        total += match &caps[2] {
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => Duration::from_secs(value * 86_400),
        };
    }

    if !matched {
        if default.is_empty() {
            return Duration::ZERO;
        }
        tracing::warn!("invalid duration string '{}', using default '{}'", input, default);
        return parse_duration(default, "");
    }

    total
}

/// Generate a short opaque identifier: 8 lowercase hex characters.
pub fn short_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}
