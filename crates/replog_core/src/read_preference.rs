//! Read preference settings.
//!
//! A read preference tells a router which members may serve a read. It is
//! carried as a small document:
//!
//! ```text
//! { mode: "secondaryPreferred", tags: [{ dc: "east" }, {}], maxStalenessMS: 90000 }
//! ```

use crate::error::{CoreError, CoreResult};
use replog_codec::{Document, Value};
use std::fmt;
use std::time::Duration;

const MODE_FIELD: &str = "mode";
const TAGS_FIELD: &str = "tags";
const MAX_STALENESS_FIELD: &str = "maxStalenessMS";

/// Smallest non-zero staleness bound accepted.
pub const MIN_MAX_STALENESS: Duration = Duration::from_millis(60_000);

/// Which members may serve a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadPreference {
    /// Only the primary.
    PrimaryOnly,
    /// The primary if available, otherwise a secondary.
    PrimaryPreferred,
    /// Only secondaries.
    SecondaryOnly,
    /// A secondary if available, otherwise the primary.
    SecondaryPreferred,
    /// Any member, by latency.
    Nearest,
}

impl ReadPreference {
    /// Returns the wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PrimaryOnly => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::SecondaryOnly => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }

    /// Parses a wire name.
    ///
    /// # Errors
    ///
    /// `Validation` for an unknown name.
    pub fn parse(name: &str) -> CoreResult<Self> {
        match name {
            "primary" => Ok(Self::PrimaryOnly),
            "primaryPreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::SecondaryOnly),
            "secondaryPreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            other => Err(CoreError::read_preference(format!(
                "unknown read preference mode {other:?}; expected one of primary, \
                 primaryPreferred, secondary, secondaryPreferred or nearest"
            ))),
        }
    }

    /// Returns the tag set used when none is given.
    #[must_use]
    pub fn default_tags(self) -> TagSet {
        match self {
            Self::PrimaryOnly => TagSet::primary_only(),
            _ => TagSet::wildcard(),
        }
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered list of tag documents; the first that matches a member wins.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSet(Vec<Document>);

impl TagSet {
    /// Creates a tag set from tag documents.
    #[must_use]
    pub fn new(tags: Vec<Document>) -> Self {
        Self(tags)
    }

    /// `[{}]`: matches every member.
    #[must_use]
    pub fn wildcard() -> Self {
        Self(vec![Document::new()])
    }

    /// `[]`: the only tag set valid with the primary mode.
    #[must_use]
    pub fn primary_only() -> Self {
        Self(Vec::new())
    }

    /// Returns the tag documents.
    #[must_use]
    pub fn tags(&self) -> &[Document] {
        &self.0
    }

    fn to_value(&self) -> Value {
        Value::Array(self.0.iter().cloned().map(Value::Document).collect())
    }
}

impl Default for TagSet {
    fn default() -> Self {
        Self::wildcard()
    }
}

/// A parsed read preference.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPreferenceSetting {
    /// Mode.
    pub pref: ReadPreference,
    /// Tag sets, in priority order.
    pub tags: TagSet,
    /// Bound on secondary lag. `None` means unbounded.
    pub max_staleness: Option<Duration>,
}

impl ReadPreferenceSetting {
    /// Creates a setting with the mode's default tags and no staleness
    /// bound.
    #[must_use]
    pub fn new(pref: ReadPreference) -> Self {
        Self {
            pref,
            tags: pref.default_tags(),
            max_staleness: None,
        }
    }

    /// Replaces the tag sets.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the staleness bound.
    #[must_use]
    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = Some(max_staleness);
        self
    }

    /// Returns true if only the primary may serve the read.
    #[must_use]
    pub fn is_primary_only(&self) -> bool {
        self.pref == ReadPreference::PrimaryOnly
    }

    /// Parses a read preference document.
    ///
    /// `[{}]` and `[]` are both read as "no tags given" and replaced by the
    /// mode's default.
    ///
    /// # Errors
    ///
    /// `Validation` if `mode` is missing or unknown, `tags` is not an array
    /// of documents, tags are given with the primary mode, or
    /// `maxStalenessMS` is not an integer, is negative, is below
    /// [`MIN_MAX_STALENESS`] or is given with the primary mode.
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let mode = match doc.get(MODE_FIELD) {
            Some(Value::Text(mode)) => ReadPreference::parse(mode)?,
            Some(other) => {
                return Err(CoreError::read_preference(format!(
                    "'{MODE_FIELD}' must be a string, got {}",
                    other.type_name()
                )))
            }
            None => {
                return Err(CoreError::read_preference(format!(
                    "missing '{MODE_FIELD}' field"
                )))
            }
        };

        let tags = match doc.get(TAGS_FIELD) {
            None => mode.default_tags(),
            Some(Value::Array(items)) => {
                let tags = items
                    .iter()
                    .map(|item| {
                        item.as_document().cloned().ok_or_else(|| {
                            CoreError::read_preference(format!(
                                "'{TAGS_FIELD}' entries must be documents, got {}",
                                item.type_name()
                            ))
                        })
                    })
                    .collect::<CoreResult<Vec<_>>>()
                    .map(TagSet::new)?;
                if tags == TagSet::wildcard() || tags == TagSet::primary_only() {
                    mode.default_tags()
                } else if mode == ReadPreference::PrimaryOnly {
                    return Err(CoreError::read_preference(
                        "only empty tags are allowed with primary read preference",
                    ));
                } else {
                    tags
                }
            }
            Some(other) => {
                return Err(CoreError::read_preference(format!(
                    "'{TAGS_FIELD}' must be an array, got {}",
                    other.type_name()
                )))
            }
        };

        let staleness_ms = match doc.get(MAX_STALENESS_FIELD) {
            None => 0,
            Some(Value::Integer(ms)) => *ms,
            Some(other) => {
                return Err(CoreError::read_preference(format!(
                    "'{MAX_STALENESS_FIELD}' must be an integer, got {}",
                    other.type_name()
                )))
            }
        };
        let max_staleness = match u64::try_from(staleness_ms) {
            Err(_) => {
                return Err(CoreError::read_preference(format!(
                    "{MAX_STALENESS_FIELD} must be a non negative integer"
                )))
            }
            Ok(0) => None,
            Ok(ms) => {
                let bound = Duration::from_millis(ms);
                if bound < MIN_MAX_STALENESS {
                    return Err(CoreError::read_preference(format!(
                        "{MAX_STALENESS_FIELD} value can not be less than {}",
                        MIN_MAX_STALENESS.as_millis()
                    )));
                }
                if mode == ReadPreference::PrimaryOnly {
                    return Err(CoreError::read_preference(format!(
                        "{MAX_STALENESS_FIELD} can not be set for the primary mode"
                    )));
                }
                Some(bound)
            }
        };

        Ok(Self {
            pref: mode,
            tags,
            max_staleness,
        })
    }

    /// Serializes to a document. Default tags and an unset staleness bound
    /// are omitted.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new().with(MODE_FIELD, self.pref.name());
        if self.tags != self.pref.default_tags() {
            doc.insert(TAGS_FIELD, self.tags.to_value());
        }
        if let Some(bound) = self.max_staleness.filter(|d| !d.is_zero()) {
            let ms = i64::try_from(bound.as_millis()).unwrap_or(i64::MAX);
            doc.insert(MAX_STALENESS_FIELD, ms);
        }
        doc
    }
}

impl Default for ReadPreferenceSetting {
    fn default() -> Self {
        Self::new(ReadPreference::PrimaryOnly)
    }
}

impl fmt::Display for ReadPreferenceSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pref)?;
        if self.tags != self.pref.default_tags() {
            write!(f, " tags={:?}", self.tags.tags())?;
        }
        if let Some(bound) = self.max_staleness {
            write!(f, " maxStalenessMS={}", bound.as_millis())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn mode_is_required() {
        let err = ReadPreferenceSetting::from_document(&Document::new()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = ReadPreferenceSetting::from_document(&Document::new().with("mode", "fastest"))
            .unwrap_err();
        assert!(err.to_string().contains("fastest"));
    }

    #[test]
    fn default_tags_depend_on_mode() {
        let primary =
            ReadPreferenceSetting::from_document(&Document::new().with("mode", "primary")).unwrap();
        assert_eq!(primary.tags, TagSet::primary_only());

        let nearest =
            ReadPreferenceSetting::from_document(&Document::new().with("mode", "nearest")).unwrap();
        assert_eq!(nearest.tags, TagSet::wildcard());
    }

    #[test]
    fn empty_tag_forms_normalize_to_default() {
        let doc = Document::new()
            .with("mode", "secondary")
            .with("tags", Value::Array(vec![]));
        let setting = ReadPreferenceSetting::from_document(&doc).unwrap();
        assert_eq!(setting.tags, TagSet::wildcard());

        let doc = Document::new()
            .with("mode", "primary")
            .with("tags", Value::Array(vec![Value::Document(Document::new())]));
        let setting = ReadPreferenceSetting::from_document(&doc).unwrap();
        assert_eq!(setting.tags, TagSet::primary_only());
    }

    #[test]
    fn primary_rejects_tags_and_staleness() {
        let tags = Value::Array(vec![Value::Document(Document::new().with("dc", "east"))]);
        let err = ReadPreferenceSetting::from_document(
            &Document::new().with("mode", "primary").with("tags", tags),
        )
        .unwrap_err();
        assert!(err.to_string().contains("empty tags"));

        let err = ReadPreferenceSetting::from_document(
            &Document::new().with("mode", "primary").with("maxStalenessMS", 90_000),
        )
        .unwrap_err();
        assert!(err.to_string().contains("primary mode"));
    }

    #[test]
    fn staleness_bounds() {
        let parse = |ms: i64| {
            ReadPreferenceSetting::from_document(
                &Document::new().with("mode", "nearest").with("maxStalenessMS", ms),
            )
        };
        assert!(parse(-1).is_err());
        assert!(parse(59_999).is_err());
        assert_eq!(parse(0).unwrap().max_staleness, None);
        assert_eq!(
            parse(60_000).unwrap().max_staleness,
            Some(Duration::from_millis(60_000))
        );
    }

    #[test]
    fn to_document_omits_defaults() {
        let plain = ReadPreferenceSetting::new(ReadPreference::SecondaryPreferred);
        assert_eq!(
            plain.to_document(),
            Document::new().with("mode", "secondaryPreferred")
        );

        let tagged = ReadPreferenceSetting::new(ReadPreference::Nearest)
            .with_tags(TagSet::new(vec![Document::new().with("dc", "west")]))
            .with_max_staleness(Duration::from_secs(120));
        let doc = tagged.to_document();
        assert_eq!(doc.get_integer("maxStalenessMS"), Some(120_000));
        assert_eq!(ReadPreferenceSetting::from_document(&doc).unwrap(), tagged);
    }
}
