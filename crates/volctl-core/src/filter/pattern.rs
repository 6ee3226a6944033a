//! Accept/reject filter over device paths
//!
//! Patterns are written `a|regex|` or `r|regex|`: a sign character, then
//! the regex enclosed in a pair of identical delimiter characters. Any
//! non-alphanumeric character may delimit, so `r/loop/` works too.
//! Rules are tried in order and the first match decides.

use regex::Regex;
use tracing::trace;

use super::{DevFilter, FilterError};
use crate::config::ConfigNode;
use crate::device::Device;

/// Verdict attached to a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Accept,
    Reject,
}

impl Sign {
    /// Parse the `devices/filter_default` value
    pub fn from_config(value: &str) -> Result<Self, FilterError> {
        match value.to_ascii_lowercase().as_str() {
            "a" | "accept" => Ok(Self::Accept),
            "r" | "reject" => Ok(Self::Reject),
            _ => Err(FilterError::InvalidDefault(value.to_string())),
        }
    }

    fn passes(self) -> bool {
        self == Self::Accept
    }
}

pub struct RegexFilter {
    rules: Vec<(Sign, Regex)>,
    default: Sign,
}

impl RegexFilter {
    /// Create a filter from already-compiled rules
    pub fn new(rules: Vec<(Sign, Regex)>, default: Sign) -> Self {
        Self { rules, default }
    }

    /// Build from the `devices/filter` list
    pub fn from_config(node: &ConfigNode, default: Sign) -> Result<Self, FilterError> {
        let rules = node
            .strings()?
            .into_iter()
            .map(parse_rule)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules, default))
    }

    /// Sign of the first matching rule, or the default
    pub fn evaluate(&self, path: &str) -> Sign {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(path))
            .map(|(sign, _)| *sign)
            .unwrap_or(self.default)
    }

    pub fn default_sign(&self) -> Sign {
        self.default
    }
}

/// Parse one `<a|r><delim><regex><delim>` rule
pub fn parse_rule(rule: &str) -> Result<(Sign, Regex), FilterError> {
    let invalid = |reason: &str| FilterError::InvalidPattern {
        pattern: rule.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = rule.chars();
    let sign = match chars.next() {
        Some('a') => Sign::Accept,
        Some('r') => Sign::Reject,
        _ => return Err(invalid("must start with 'a' or 'r'")),
    };

    let body = chars.as_str();
    let delim = body
        .chars()
        .next()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .ok_or_else(|| invalid("missing delimiter"))?;

    let inner = &body[delim.len_utf8()..];
    let pattern = inner
        .strip_suffix(delim)
        .ok_or_else(|| invalid("missing closing delimiter"))?;
    if pattern.is_empty() {
        return Err(invalid("empty pattern"));
    }

    let re = Regex::new(pattern).map_err(|e| invalid(&e.to_string()))?;
    Ok((sign, re))
}

impl DevFilter for RegexFilter {
    fn passes(&mut self, device: &Device) -> bool {
        let sign = self.evaluate(&device.path_str());
        trace!(device = %device.path.display(), ?sign, "Regex filter");
        sign.passes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;

    fn filter(patterns: &[&str], default: Sign) -> RegexFilter {
        let rules = patterns
            .iter()
            .map(|p| parse_rule(p).unwrap())
            .collect();
        RegexFilter::new(rules, default)
    }

    #[test]
    fn test_first_match_wins() {
        let mut f = filter(&["r|^/dev/loop|", "a|.*|"], Sign::Accept);
        assert!(!f.passes(&Device::new("/dev/loop0")));
        assert!(f.passes(&Device::new("/dev/sda1")));

        // Reordering flips the outcome for loop devices
        let mut f = filter(&["a|.*|", "r|^/dev/loop|"], Sign::Accept);
        assert!(f.passes(&Device::new("/dev/loop0")));
    }

    #[test]
    fn test_no_match_default_is_accept() {
        let cf = ConfigTree::from_toml("[devices]\nfilter = [\"r|^/dev/hd|\"]\n").unwrap();
        let node = cf.find_node("devices/filter").unwrap();
        let default = Sign::from_config(cf.find_str("devices/filter_default", "accept")).unwrap();
        let mut f = RegexFilter::from_config(&node, default).unwrap();

        assert_eq!(f.default_sign(), Sign::Accept);
        assert!(f.passes(&Device::new("/dev/sdb")));
        assert!(!f.passes(&Device::new("/dev/hda")));
    }

    #[test]
    fn test_no_match_default_reject() {
        let mut f = filter(&["a|^/dev/sd|"], Sign::Reject);
        assert!(f.passes(&Device::new("/dev/sdc")));
        assert!(!f.passes(&Device::new("/dev/nvme0n1")));
    }

    #[test]
    fn test_alternate_delimiters() {
        let (sign, re) = parse_rule("r/loop/").unwrap();
        assert_eq!(sign, Sign::Reject);
        assert!(re.is_match("/dev/loop3"));

        let (sign, re) = parse_rule("a#^/dev/md[0-9]+$#").unwrap();
        assert_eq!(sign, Sign::Accept);
        assert!(re.is_match("/dev/md12"));
    }

    #[test]
    fn test_malformed_rules() {
        for bad in ["", "x|sda|", "a", "a|sda", "asda", "a||", "a|[|"] {
            assert!(
                matches!(parse_rule(bad), Err(FilterError::InvalidPattern { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_sign_from_config() {
        assert_eq!(Sign::from_config("Accept").unwrap(), Sign::Accept);
        assert_eq!(Sign::from_config("r").unwrap(), Sign::Reject);
        assert!(Sign::from_config("yes").is_err());
    }
}
