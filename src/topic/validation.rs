//! Topic filter validation and matching
//!
//! Key rules:
//! - Topic filters MAY contain wildcards
//! - Multi-level wildcard (#) must be the last level and occupy it entirely
//! - Single-level wildcard (+) must occupy an entire level
//! - Topics starting with $ are not matched by a leading wildcard

/// Split a shared subscription filter into (group, filter).
///
/// Returns `None` when `filter` is not of the form `$share/{group}/{filter}`.
pub fn parse_shared_subscription(filter: &str) -> Option<(&str, &str)> {
    let rest = filter.strip_prefix("$share/")?;
    let slash_pos = rest.find('/')?;
    let group = &rest[..slash_pos];
    let actual_filter = &rest[slash_pos + 1..];
    if group.is_empty() || actual_filter.is_empty() {
        return None;
    }
    Some((group, actual_filter))
}

/// Validate a topic filter used in a mapping
///
/// Topic filters:
/// - Must be at least 1 character
/// - Must not exceed 65535 bytes
/// - Must not contain null character
/// - `#` must be alone in the last level
/// - `+` must occupy an entire level
/// - Shared subscriptions ($share/{group}/{filter}) are accepted
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }

    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }

    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let actual_filter = if filter.starts_with("$share/") {
        let (group, actual) =
            parse_shared_subscription(filter).ok_or("invalid shared subscription format")?;
        if group.contains('+') || group.contains('#') {
            return Err("shared subscription group name cannot contain wildcards");
        }
        actual
    } else {
        filter
    };

    let levels: Vec<&str> = actual_filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != levels.len() - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }

        if level.contains('+') && *level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}

/// Check if a topic filter matches a topic name
///
/// Matching rules:
/// - / is the level separator
/// - + matches exactly one level
/// - # matches zero or more levels (must be last)
/// - $-topics don't match filters starting with + or #
/// - a `$share/{group}/` prefix on the filter is ignored
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    let filter = parse_shared_subscription(filter)
        .map(|(_, actual)| actual)
        .unwrap_or(filter);

    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // # matches everything remaining, including the parent level
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("sensors").is_ok());
        assert!(validate_topic_filter("sensors/temp").is_ok());
        assert!(validate_topic_filter("+").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("sensors/+").is_ok());
        assert!(validate_topic_filter("sensors/#").is_ok());
        assert!(validate_topic_filter("+/+/alarm").is_ok());
        assert!(validate_topic_filter("$share/mqti/sensors/#").is_ok());

        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("sensors+").is_err());
        assert!(validate_topic_filter("sensors#").is_err());
        assert!(validate_topic_filter("sensors/#/temp").is_err());
        assert!(validate_topic_filter("+temp").is_err());
        assert!(validate_topic_filter("$share/").is_err());
        assert!(validate_topic_filter("$share/group").is_err());
        assert!(validate_topic_filter("$share/gr+up/a").is_err());
    }

    #[test]
    fn test_parse_shared_subscription() {
        assert_eq!(
            parse_shared_subscription("$share/workers/jobs/#"),
            Some(("workers", "jobs/#"))
        );
        assert_eq!(parse_shared_subscription("jobs/#"), None);
        assert_eq!(parse_shared_subscription("$share//jobs"), None);
        assert_eq!(parse_shared_subscription("$share/workers/"), None);
    }

    #[test]
    fn test_topic_matches() {
        // Exact matches
        assert!(topic_matches_filter("test", "test"));
        assert!(topic_matches_filter("test/topic", "test/topic"));
        assert!(!topic_matches_filter("test", "test/topic"));
        assert!(!topic_matches_filter("test/topic", "test"));

        // Single-level wildcard
        assert!(topic_matches_filter("test/topic", "test/+"));
        assert!(topic_matches_filter("test/topic", "+/topic"));
        assert!(topic_matches_filter("a/b/c", "+/b/+"));
        assert!(!topic_matches_filter("test", "+/+"));
        assert!(!topic_matches_filter("test/topic/extra", "test/+"));

        // Multi-level wildcard
        assert!(topic_matches_filter("test", "#"));
        assert!(topic_matches_filter("test/topic/more", "#"));
        assert!(topic_matches_filter("test/topic/more", "test/#"));
        assert!(topic_matches_filter("test", "test/#"));
        assert!(!topic_matches_filter("other/topic", "test/#"));

        // $-topics
        assert!(!topic_matches_filter("$SYS/test", "+/test"));
        assert!(!topic_matches_filter("$SYS/test", "#"));
        assert!(topic_matches_filter("$SYS/test", "$SYS/+"));

        // Shared subscriptions route on the inner filter
        assert!(topic_matches_filter("jobs/42", "$share/workers/jobs/+"));
        assert!(!topic_matches_filter("other/42", "$share/workers/jobs/+"));
    }
}
