//! Topic normalization and MQTT topic-filter matching
//!
//! Configured topics may arrive quoted (`"application/#"`) from hand-edited
//! files; [`normalize_topic`] strips that. Filter matching follows MQTT 3.1.1
//! section 4.7: `+` matches exactly one level, `#` matches the remaining levels
//! (including none), and wildcards at the first level never match `$` topics.

use thiserror::Error;

/// Strip surrounding whitespace and single/double quotes from a configured topic
pub fn normalize_topic(raw: &str) -> String {
    raw.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
        .to_string()
}

/// Validate a topic filter used for subscriptions
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Validate a concrete topic name used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInTopicName(topic.to_string()));
    }
    Ok(())
}

/// Whether `topic` is matched by subscription `filter`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("'#' must be the last level on its own: {0}")]
    MisplacedMultiLevelWildcard(String),
    #[error("'+' must occupy a whole level: {0}")]
    MisplacedSingleLevelWildcard(String),
    #[error("Wildcards are not allowed in topic names: {0}")]
    WildcardInTopicName(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_topic_strips_quotes() {
        assert_eq!(normalize_topic("\"application/#\""), "application/#");
        assert_eq!(normalize_topic("'sensors/out'"), "sensors/out");
        assert_eq!(normalize_topic("  plain/topic  "), "plain/topic");
        assert_eq!(normalize_topic("\"\""), "");
    }

    #[test]
    fn test_exact_and_single_level_matching() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(topic_matches("application/+/device/+/event/up", "application/7/device/0011/event/up"));
        assert!(!topic_matches("application/+/device/+/event/up", "application/7/device/0011/event/join"));
        assert!(topic_matches("+/+", "/finance"));
    }

    #[test]
    fn test_multi_level_matching() {
        assert!(topic_matches("application/#", "application/1/device/2/event/up"));
        assert!(topic_matches("application/#", "application"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("application/#", "other/1"));
    }

    #[test]
    fn test_dollar_topics_not_matched_by_leading_wildcards() {
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("application/+/device/+/event/up").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert_eq!(validate_topic_filter(""), Err(TopicError::Empty));
        assert!(validate_topic_filter("a/#/b").is_err());
        assert!(validate_topic_filter("a/b#").is_err());
        assert!(validate_topic_filter("a/b+/c").is_err());
    }

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("lora/output").is_ok());
        assert!(validate_topic_name("lora/+").is_err());
        assert!(validate_topic_name("").is_err());
    }

    proptest! {
        #[test]
        fn test_literal_filter_matches_itself(topic in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn test_hash_matches_every_plain_topic(topic in "[a-z0-9/]{0,32}") {
            prop_assert!(topic_matches("#", &topic));
        }

        #[test]
        fn test_normalize_is_idempotent(raw in ".{0,32}") {
            let once = normalize_topic(&raw);
            let twice = normalize_topic(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
