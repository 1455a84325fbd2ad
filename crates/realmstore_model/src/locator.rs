//! Structured element paths.

use crate::element::ElementKind;
use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A path naming an element or a sub-element within it.
///
/// Root elements are addressed as `<kind>/<type>/<id>`; deeper segments
/// address bags and parameters (`Resource/Item/A/Bag/specs/weight`).
///
/// Two locators are equal iff their segments are equal. Lock identity and
/// the operations-log index both rely on this.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Locator {
    segments: Vec<String>,
}

impl Locator {
    /// Separator between path segments.
    pub const SEPARATOR: char = '/';

    /// Creates a locator from segments.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no segments, or a segment is empty or
    /// contains the separator.
    pub fn new<I, S>(segments: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(ModelError::invalid_locator("", "locator has no segments"));
        }
        for segment in &segments {
            if !Self::is_valid_segment(segment) {
                return Err(ModelError::invalid_locator(
                    segments.join("/"),
                    format!("invalid segment '{segment}'"),
                ));
            }
        }
        Ok(Self { segments })
    }

    /// Returns true if `segment` is non-empty and free of separators.
    #[must_use]
    pub fn is_valid_segment(segment: &str) -> bool {
        !segment.is_empty() && !segment.contains(Self::SEPARATOR)
    }

    /// Returns the locator of a root element.
    ///
    /// Separators in type or id become `_` and empty values become `_`, so
    /// the result always parses back to three segments. Elements with such
    /// names are rejected on add; see [`Locator::is_valid_segment`].
    #[must_use]
    pub fn for_element(kind: ElementKind, type_name: &str, id: &str) -> Self {
        Self {
            segments: vec![kind.tag().to_string(), clean(type_name), clean(id)],
        }
    }

    /// Returns `Transaction/<realm>/<action>`, the locator of messages about a
    /// transaction as a whole. Separators in the names become `_`.
    #[must_use]
    pub fn for_transaction(realm: &str, action: &str) -> Self {
        Self {
            segments: vec!["Transaction".to_string(), clean(realm), clean(action)],
        }
    }

    /// Parses a `/`-separated path.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty path or empty segments (`a//b`).
    pub fn parse(path: &str) -> ModelResult<Self> {
        if path.is_empty() {
            return Err(ModelError::invalid_locator(path, "empty path"));
        }
        let segments: Vec<&str> = path.split(Self::SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ModelError::invalid_locator(path, "empty segment"));
        }
        Ok(Self {
            segments: segments.into_iter().map(str::to_string).collect(),
        })
    }

    /// Returns a new locator with `segment` appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is empty or contains a separator.
    pub fn append(&self, segment: impl Into<String>) -> ModelResult<Self> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; locators have at least one segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the element kind named by the first segment, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ElementKind> {
        self.segments.first().and_then(|s| s.parse().ok())
    }

    /// Returns true if `self` is `other` or a descendant of it.
    #[must_use]
    pub fn starts_with(&self, other: &Locator) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

fn clean(segment: &str) -> String {
    if segment.is_empty() {
        "_".to_string()
    } else {
        segment.replace(Locator::SEPARATOR, "_")
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl FromStr for Locator {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

impl TryFrom<String> for Locator {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
