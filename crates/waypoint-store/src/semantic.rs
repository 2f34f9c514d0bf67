//! Free-form rewind command parsing.
//!
//! A command resolves to exactly one strategy, tried in priority order:
//! step counts, relative times, "last <agent> checkpoint" for a known
//! agent, then boilerplate-stripped free text for fuzzy description
//! search.

use once_cell::sync::Lazy;
use regex::Regex;

/// A parsed rewind command.
#[derive(Debug, Clone, PartialEq)]
pub enum RewindTarget {
    /// "rewind 3 steps" → timeline entry 3.
    Steps(usize),
    /// "rewind 2 hours ago" / "30 minutes ago" → nearest checkpoint in
    /// time, expressed in hours.
    HoursAgo(f64),
    /// "last builder checkpoint" → most recent checkpoint for that agent.
    Agent(String),
    /// Anything else → fuzzy description search.
    Description(String),
}

static STEPS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*steps?\b").unwrap_or_else(|error| panic!("steps regex: {error}"))
});

static TIME_AGO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(hours?|hrs?|minutes?|mins?)\s+ago\b")
        .unwrap_or_else(|error| panic!("time regex: {error}"))
});

static LAST_AGENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\blast\s+(\S+)\s+checkpoint\b")
        .unwrap_or_else(|error| panic!("agent regex: {error}"))
});

/// Parses a free-form rewind command against the set of known agent
/// types.
pub fn parse_rewind_command(command: &str, known_agents: &[String]) -> RewindTarget {
    if let Some(captures) = STEPS.captures(command) {
        if let Ok(steps) = captures[1].parse::<usize>() {
            return RewindTarget::Steps(steps);
        }
    }

    if let Some(captures) = TIME_AGO.captures(command) {
        if let Ok(amount) = captures[1].parse::<f64>() {
            let unit = captures[2].to_lowercase();
            let hours = if unit.starts_with("min") {
                amount / 60.0
            } else {
                amount
            };
            return RewindTarget::HoursAgo(hours);
        }
    }

    if let Some(captures) = LAST_AGENT.captures(command) {
        let candidate = captures[1].to_lowercase();
        if let Some(agent) = known_agents
            .iter()
            .find(|agent| agent.to_lowercase() == candidate)
        {
            return RewindTarget::Agent(agent.clone());
        }
    }

    RewindTarget::Description(strip_boilerplate(command))
}

/// Drops leading "rewind"/"rewind to" and surrounding quotes, leaving the
/// free text to search for.
fn strip_boilerplate(command: &str) -> String {
    let mut text = command.trim();
    for prefix in ["rewind to", "rewind"] {
        if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
            text = text[prefix.len()..].trim_start();
            break;
        }
    }
    text.trim_matches(|symbol| symbol == '"' || symbol == '\'')
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents() -> Vec<String> {
        vec!["builder".to_owned(), "tester".to_owned()]
    }

    #[test]
    fn test_parse_steps() {
        assert_eq!(
            parse_rewind_command("rewind 3 steps", &agents()),
            RewindTarget::Steps(3)
        );
        assert_eq!(
            parse_rewind_command("go back 1 step", &agents()),
            RewindTarget::Steps(1)
        );
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(
            parse_rewind_command("rewind 2 hours ago", &agents()),
            RewindTarget::HoursAgo(2.0)
        );
        match parse_rewind_command("30 minutes ago", &agents()) {
            RewindTarget::HoursAgo(hours) => assert!((hours - 0.5).abs() < 1e-9),
            other => panic!("unexpected target: {other:?}"),
        }
    }

    #[test]
    fn test_parse_known_agent() {
        assert_eq!(
            parse_rewind_command("rewind to last builder checkpoint", &agents()),
            RewindTarget::Agent("builder".to_owned())
        );
    }

    #[test]
    fn test_unknown_agent_falls_back_to_description() {
        assert_eq!(
            parse_rewind_command("last sorcerer checkpoint", &agents()),
            RewindTarget::Description("last sorcerer checkpoint".to_owned())
        );
    }

    #[test]
    fn test_steps_take_priority_over_time() {
        // Both patterns present; steps wins by priority order.
        assert_eq!(
            parse_rewind_command("rewind 2 steps from 3 hours ago", &agents()),
            RewindTarget::Steps(2)
        );
    }

    #[test]
    fn test_boilerplate_stripping() {
        assert_eq!(
            parse_rewind_command("rewind to \"auth fix\"", &agents()),
            RewindTarget::Description("auth fix".to_owned())
        );
        assert_eq!(
            parse_rewind_command("rewind broken parser", &agents()),
            RewindTarget::Description("broken parser".to_owned())
        );
    }
}
