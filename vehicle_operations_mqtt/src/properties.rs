// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An ordered MQTT5 property bag with semantic accessors for the properties
//! the vehicle command envoys read and write.

use bytes::Bytes;
use thiserror::Error;

/// A single MQTT5 property carried on a PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Content type of the payload (MQTT5 Content Type).
    ContentType(String),
    /// Topic the receiver should publish its response to (MQTT5 Response Topic).
    ResponseTopic(String),
    /// Opaque bytes binding a response to its request (MQTT5 Correlation Data).
    CorrelationData(Bytes),
    /// Free-form key/value pair (MQTT5 User Property).
    User(String, String),
}

/// A required property was not present in the bag.
///
/// Carries the wire name of the missing property.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("required MQTT5 property '{0}' is missing")]
pub struct MissingProperty(pub &'static str);

/// An ordered collection of MQTT5 properties.
///
/// The bag is reusable: a sender appends properties, hands the contents off
/// with [`PropertyBag::take`], and is left with an empty bag for the next
/// message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag {
    properties: Vec<Property>,
}

impl PropertyBag {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the response topic.
    ///
    /// # Errors
    /// [`MissingProperty`] if no response topic is present.
    pub fn response_topic(&self) -> Result<&str, MissingProperty> {
        self.properties
            .iter()
            .find_map(|p| match p {
                Property::ResponseTopic(topic) => Some(topic.as_str()),
                _ => None,
            })
            .ok_or(MissingProperty("Response Topic"))
    }

    /// Read the correlation data.
    ///
    /// # Errors
    /// [`MissingProperty`] if no correlation data is present.
    pub fn correlation_data(&self) -> Result<&Bytes, MissingProperty> {
        self.properties
            .iter()
            .find_map(|p| match p {
                Property::CorrelationData(data) => Some(data),
                _ => None,
            })
            .ok_or(MissingProperty("Correlation Data"))
    }

    /// Read the content type.
    ///
    /// # Errors
    /// [`MissingProperty`] if no content type is present.
    pub fn content_type(&self) -> Result<&str, MissingProperty> {
        self.properties
            .iter()
            .find_map(|p| match p {
                Property::ContentType(ct) => Some(ct.as_str()),
                _ => None,
            })
            .ok_or(MissingProperty("Content Type"))
    }

    /// Read the value of the first user property with the given key.
    #[must_use]
    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.properties.iter().find_map(|p| match p {
            Property::User(k, v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    /// Append a user property.
    pub fn append_user_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties
            .push(Property::User(key.into(), value.into()));
    }

    /// Append a content type.
    pub fn append_content_type(&mut self, value: impl Into<String>) {
        self.properties.push(Property::ContentType(value.into()));
    }

    /// Append a response topic.
    pub fn append_response_topic(&mut self, value: impl Into<String>) {
        self.properties.push(Property::ResponseTopic(value.into()));
    }

    /// Append correlation data.
    pub fn append_correlation_data(&mut self, data: Bytes) {
        self.properties.push(Property::CorrelationData(data));
    }

    /// Remove every property, making the bag reusable.
    pub fn clear(&mut self) {
        self.properties.clear();
    }

    /// Move the contents out, leaving this bag empty.
    #[must_use]
    pub fn take(&mut self) -> PropertyBag {
        PropertyBag {
            properties: std::mem::take(&mut self.properties),
        }
    }

    /// True if the bag holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Number of properties in the bag.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Iterate over the properties in append order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }
}

impl FromIterator<Property> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        PropertyBag {
            properties: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_bag() -> PropertyBag {
        let mut bag = PropertyBag::new();
        bag.append_response_topic("fleet/responses/1");
        bag.append_correlation_data(Bytes::from_static(b"\xAA\xBB"));
        bag.append_content_type("application/json");
        bag.append_user_property("status", "200");
        bag
    }

    #[test]
    fn reads_find_each_required_property() {
        let bag = populated_bag();
        assert_eq!(bag.response_topic().unwrap(), "fleet/responses/1");
        assert_eq!(
            bag.correlation_data().unwrap(),
            &Bytes::from_static(b"\xAA\xBB")
        );
        assert_eq!(bag.content_type().unwrap(), "application/json");
        assert_eq!(bag.user_property("status"), Some("200"));
        assert_eq!(bag.user_property("statusMessage"), None);
    }

    #[test]
    fn reads_report_which_property_is_missing() {
        let bag = PropertyBag::new();
        assert_eq!(
            bag.response_topic().unwrap_err(),
            MissingProperty("Response Topic")
        );
        assert_eq!(
            bag.correlation_data().unwrap_err(),
            MissingProperty("Correlation Data")
        );
        assert_eq!(
            bag.content_type().unwrap_err(),
            MissingProperty("Content Type")
        );
    }

    #[test]
    fn append_order_is_preserved() {
        let bag = populated_bag();
        let kinds: Vec<_> = bag.iter().collect();
        assert!(matches!(kinds[0], Property::ResponseTopic(_)));
        assert!(matches!(kinds[1], Property::CorrelationData(_)));
        assert!(matches!(kinds[2], Property::ContentType(_)));
        assert!(matches!(kinds[3], Property::User(_, _)));
    }

    #[test]
    fn clear_empties_the_bag() {
        let mut bag = populated_bag();
        assert!(!bag.is_empty());
        bag.clear();
        assert!(bag.is_empty());
        assert_eq!(bag.len(), 0);
    }

    #[test]
    fn take_moves_contents_and_leaves_bag_empty() {
        let mut bag = populated_bag();
        let taken = bag.take();
        assert!(bag.is_empty());
        assert_eq!(taken.len(), 4);
        assert_eq!(taken.user_property("status"), Some("200"));
    }

    #[test]
    fn duplicate_user_keys_read_first_appended() {
        let mut bag = PropertyBag::new();
        bag.append_user_property("k", "first");
        bag.append_user_property("k", "second");
        assert_eq!(bag.user_property("k"), Some("first"));
    }
}
