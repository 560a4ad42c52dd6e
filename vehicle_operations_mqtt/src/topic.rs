// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT5 topic name and topic filter utilities.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL_WILDCARD: &str = "+";
const MULTI_LEVEL_WILDCARD: &str = "#";

// TODO: topics beginning with '$' are not yet exempted from wildcard matching

/// Error when parsing a topic name or topic filter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicParseError {
    /// The topic name or topic filter is empty.
    #[error("must be at least one character long")]
    Empty,
    /// A topic name contains a wildcard character.
    #[error("wildcard characters not allowed in topic name: {0}")]
    WildcardInTopicName(String),
    /// A wildcard does not occupy an entire level of the topic filter.
    #[error("wildcard characters must occupy an entire level of the topic filter: {0}")]
    WildcardNotAlone(String),
    /// A multi-level wildcard is not the last level of the topic filter.
    #[error("multi-level wildcard must be the last level of the topic filter: {0}")]
    WildcardNotLast(String),
}

/// A validated MQTT5 topic name (no wildcards).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicName {
    topic_name: String,
}

impl TopicName {
    /// Validate and wrap a topic name.
    ///
    /// # Errors
    /// [`TopicParseError`] if the string is not a valid MQTT5 topic name.
    pub fn from_string(topic_name: String) -> Result<TopicName, TopicParseError> {
        // Topic names must be at least one character long (MQTT5 4.7.3)
        if topic_name.is_empty() {
            return Err(TopicParseError::Empty);
        }
        // Wildcard characters must not be used in topic names (MQTT5 4.7.1)
        if topic_name.contains(['+', '#']) {
            return Err(TopicParseError::WildcardInTopicName(topic_name));
        }
        Ok(TopicName { topic_name })
    }

    /// The topic name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.topic_name
    }

    /// Iterate over the topic levels.
    ///
    /// Adjacent separators denote zero-length levels (MQTT5 4.7.1.1).
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.topic_name.split(LEVEL_SEPARATOR)
    }
}

impl FromStr for TopicName {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicName::from_string(s.to_string())
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic_name)
    }
}

/// A validated MQTT5 topic filter, possibly containing wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    topic_filter: String,
}

impl TopicFilter {
    /// Validate and wrap a topic filter.
    ///
    /// # Errors
    /// [`TopicParseError`] if the string is not a valid MQTT5 topic filter.
    pub fn from_string(topic_filter: String) -> Result<TopicFilter, TopicParseError> {
        // Topic filters must be at least one character long (MQTT5 4.7.3)
        if topic_filter.is_empty() {
            return Err(TopicParseError::Empty);
        }
        let mut levels = topic_filter.split(LEVEL_SEPARATOR).peekable();
        while let Some(level) = levels.next() {
            if level.contains('#') {
                // The multi-level wildcard must occupy an entire level and be
                // the last level of the filter (MQTT5 4.7.1.2)
                if level != MULTI_LEVEL_WILDCARD {
                    return Err(TopicParseError::WildcardNotAlone(topic_filter));
                }
                if levels.peek().is_some() {
                    return Err(TopicParseError::WildcardNotLast(topic_filter));
                }
            } else if level.contains('+') && level != SINGLE_LEVEL_WILDCARD {
                // The single-level wildcard must occupy an entire level (MQTT5 4.7.1.3)
                return Err(TopicParseError::WildcardNotAlone(topic_filter));
            }
        }
        Ok(TopicFilter { topic_filter })
    }

    /// The topic filter as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.topic_filter
    }

    /// Iterate over the filter levels.
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.topic_filter.split(LEVEL_SEPARATOR)
    }

    /// True if the given topic name matches this filter.
    #[must_use]
    pub fn matches(&self, topic_name: &TopicName) -> bool {
        topic_matches(self, topic_name)
    }
}

impl FromStr for TopicFilter {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicFilter::from_string(s.to_string())
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic_filter)
    }
}

/// Check a topic name against a topic filter.
///
/// `+` matches exactly one level; `#` matches zero or more trailing levels,
/// including the parent level itself (`a/#` matches `a`).
#[must_use]
pub fn topic_matches(topic_filter: &TopicFilter, topic_name: &TopicName) -> bool {
    let mut filter = topic_filter.levels();
    let mut name = topic_name.levels();
    loop {
        match (filter.next(), name.next()) {
            // '#' covers the remaining levels, including none at all
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(filter_level), Some(name_level)) if filter_level == name_level => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("vehicles"; "single level")]
    #[test_case("vehicles/vin 1234/commands"; "levels with spaces")]
    #[test_case("vehicles/m1/commands/c1/unlock"; "multi level")]
    #[test_case("/vehicles/m1"; "zero length first level")]
    #[test_case("vehicles//commands"; "zero length middle level")]
    #[test_case("vehicles/m1/"; "zero length last level")]
    fn valid_topic_name(topic_name: &str) {
        assert!(TopicName::from_str(topic_name).is_ok());
    }

    #[test_case(""; "empty")]
    #[test_case("vehicles/+/commands"; "single level wildcard")]
    #[test_case("vehicles/m1/#"; "multi level wildcard")]
    fn invalid_topic_name(topic_name: &str) {
        assert!(TopicName::from_str(topic_name).is_err());
    }

    #[test_case("vehicles"; "single level")]
    #[test_case("vehicles/m1/commands/c1/unlock"; "multi level")]
    #[test_case("+"; "lone single level wildcard")]
    #[test_case("#"; "lone multi level wildcard")]
    #[test_case("vehicles/+/commands/+/+"; "several single level wildcards")]
    #[test_case("vehicles/m1/#"; "trailing multi level wildcard")]
    #[test_case("+/#"; "both wildcards")]
    #[test_case("vehicles//+"; "zero length level before wildcard")]
    fn valid_topic_filter(topic_filter: &str) {
        assert!(TopicFilter::from_str(topic_filter).is_ok());
    }

    #[test_case("", TopicParseError::Empty; "empty")]
    #[test_case("vehicles/m+", TopicParseError::WildcardNotAlone("vehicles/m+".to_string()); "plus not alone")]
    #[test_case("vehicles/m#", TopicParseError::WildcardNotAlone("vehicles/m#".to_string()); "hash not alone")]
    #[test_case("vehicles/#/commands", TopicParseError::WildcardNotLast("vehicles/#/commands".to_string()); "hash not last")]
    fn invalid_topic_filter(topic_filter: &str, expected: TopicParseError) {
        assert_eq!(TopicFilter::from_str(topic_filter).unwrap_err(), expected);
    }

    #[test_case("vehicles/m1/commands/c1/unlock", &["vehicles/m1/commands/c1/unlock"]; "exact")]
    #[test_case("vehicles/m1/commands/c1/+", &["vehicles/m1/commands/c1/unlock", "vehicles/m1/commands/c1/lock"]; "trailing plus")]
    #[test_case("vehicles/+/commands/+/+", &["vehicles/m1/commands/c1/unlock", "vehicles/m2/commands/c9/lock"]; "several plus")]
    #[test_case("vehicles/m1/#", &["vehicles/m1", "vehicles/m1/commands", "vehicles/m1/commands/c1/unlock"]; "hash matches parent and descendants")]
    #[test_case("#", &["vehicles", "vehicles/m1/commands", "/"]; "lone hash matches everything")]
    #[test_case("+/+", &["vehicles/m1", "/vehicles", "vehicles/", "/"]; "plus matches zero length levels")]
    fn filter_matches(topic_filter: &str, topic_names: &[&str]) {
        let filter = TopicFilter::from_str(topic_filter).unwrap();
        for topic_name in topic_names {
            let name = TopicName::from_str(topic_name).unwrap();
            assert!(filter.matches(&name), "{filter} should match {name}");
        }
    }

    #[test_case("vehicles/m1/commands/c1/unlock", &["vehicles/m1/commands/c1/lock", "vehicles/m1/commands/c1", "vehicles/m1/commands/c1/unlock/now"]; "exact mismatches")]
    #[test_case("vehicles/m1/commands/c1/+", &["vehicles/m1/commands/c1", "vehicles/m2/commands/c1/unlock", "vehicles/m1/commands/c1/unlock/now"]; "plus needs exactly one level")]
    #[test_case("vehicles/m1/#", &["vehicles/m2", "fleet/m1/commands"]; "hash prefix mismatch")]
    #[test_case("+", &["vehicles/m1", "/vehicles"]; "lone plus is single level only")]
    fn filter_mismatches(topic_filter: &str, topic_names: &[&str]) {
        let filter = TopicFilter::from_str(topic_filter).unwrap();
        for topic_name in topic_names {
            let name = TopicName::from_str(topic_name).unwrap();
            assert!(!filter.matches(&name), "{filter} should not match {name}");
        }
    }
}
