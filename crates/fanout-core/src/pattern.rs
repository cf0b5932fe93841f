//! Event type naming and pattern matching.
//!
//! Event types follow the `category.action` convention (`user.created`,
//! `organization.deleted`). Subscription and action rules match against an
//! event type with one of three pattern forms:
//!
//! - exact: `user.created`
//! - category wildcard: `user.*`
//! - universal: `*`

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

static EVENT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_]+\.[a-z_]+$").expect("event type regex is valid"));

/// Validate an event type against the `category.action` naming convention.
pub fn validate_event_type(event_type: &str) -> Result<(), CoreError> {
    if EVENT_TYPE_RE.is_match(event_type) {
        Ok(())
    } else {
        Err(CoreError::InvalidEventType {
            event_type: event_type.to_string(),
        })
    }
}

/// Check whether a pattern matches an event type.
///
/// Supported forms: exact (`user.created`), category wildcard (`user.*`),
/// universal (`*`). Anything else matches only by string equality.
#[must_use]
pub fn matches_pattern(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(category) = pattern.strip_suffix(".*") {
        return event_type
            .strip_prefix(category)
            .is_some_and(|rest| rest.starts_with('.'));
    }

    pattern == event_type
}

/// Validate a subscription/action pattern: an exact event type, a
/// `category.*` wildcard, or the universal `*`.
pub fn validate_pattern(pattern: &str) -> Result<(), CoreError> {
    if pattern == "*" {
        return Ok(());
    }

    if let Some(category) = pattern.strip_suffix(".*") {
        if !category.is_empty()
            && category
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_')
        {
            return Ok(());
        }
        return Err(CoreError::InvalidEventType {
            event_type: pattern.to_string(),
        });
    }

    validate_event_type(pattern)
}

/// The category wildcard pattern that would match the given event type.
///
/// `user.created` -> `user.*`. Returns `None` when the event type has no
/// category separator.
#[must_use]
pub fn wildcard_for(event_type: &str) -> Option<String> {
    event_type
        .split_once('.')
        .map(|(category, _)| format!("{category}.*"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_event_types() {
        assert!(validate_event_type("user.created").is_ok());
        assert!(validate_event_type("organization.created").is_ok());
        assert!(validate_event_type("billing_account.plan_changed").is_ok());
    }

    #[test]
    fn test_invalid_event_types() {
        assert!(validate_event_type("").is_err());
        assert!(validate_event_type("usercreated").is_err());
        assert!(validate_event_type("User.Created").is_err());
        assert!(validate_event_type("user.created.now").is_err());
        assert!(validate_event_type("user.").is_err());
        assert!(validate_event_type(".created").is_err());
        assert!(validate_event_type("user-account.created").is_err());
        assert!(validate_event_type("user.created ").is_err());
    }

    #[test]
    fn test_exact_match() {
        assert!(matches_pattern("user.created", "user.created"));
        assert!(!matches_pattern("user.created", "user.deleted"));
    }

    #[test]
    fn test_category_wildcard() {
        assert!(matches_pattern("user.*", "user.created"));
        assert!(matches_pattern("user.*", "user.deleted"));
        assert!(!matches_pattern("user.*", "organization.created"));
    }

    #[test]
    fn test_wildcard_does_not_match_prefix_category() {
        // `user.*` must not match `user_group.created`
        assert!(!matches_pattern("user.*", "user_group.created"));
    }

    #[test]
    fn test_universal_wildcard() {
        assert!(matches_pattern("*", "user.created"));
        assert!(matches_pattern("*", "organization.deleted"));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("*").is_ok());
        assert!(validate_pattern("user.*").is_ok());
        assert!(validate_pattern("billing_account.*").is_ok());
        assert!(validate_pattern("user.created").is_ok());
        assert!(validate_pattern(".*").is_err());
        assert!(validate_pattern("User.*").is_err());
        assert!(validate_pattern("user.**").is_err());
        assert!(validate_pattern("user").is_err());
    }

    #[test]
    fn test_wildcard_for() {
        assert_eq!(wildcard_for("user.created").as_deref(), Some("user.*"));
        assert_eq!(wildcard_for("nodot"), None);
    }
}
