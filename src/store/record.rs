use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a record.
///
/// Assigned when the record is first staged and never reused. This is the only
/// form in which a record may travel between tasks; the receiver resolves it
/// against its own [`Context`](super::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A plain data record: a title and a list of cast names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub cast: Vec<String>,
}

impl Record {
    pub fn new(title: impl Into<String>, cast: Vec<String>) -> Self {
        Self {
            title: title.into(),
            cast,
        }
    }

    /// Synthetic record used by bulk imports: `"<prefix> <index>"` with no cast.
    pub fn synthetic(prefix: &str, index: usize) -> Self {
        Self::new(format!("{} {}", prefix, index), Vec::new())
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be blank".to_string());
        }
        if self.cast.iter().any(|name| name.trim().is_empty()) {
            return Err(format!("record '{}' has a blank cast entry", self.title));
        }
        Ok(())
    }
}

/// A committed record as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub title: String,
    pub cast: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn to_record(&self) -> Record {
        Record::new(self.title.clone(), self.cast.clone())
    }
}

/// Paging over committed records in insertion order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchDescriptor {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FetchDescriptor {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_parses_its_display_form() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().expect("valid uuid");
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<RecordId>().is_err());
    }

    #[test]
    fn synthetic_titles_follow_index() {
        let record = Record::synthetic("Movie", 42);
        assert_eq!(record.title, "Movie 42");
        assert!(record.cast.is_empty());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn blank_titles_and_cast_entries_are_rejected() {
        assert!(Record::new("   ", Vec::new()).validate().is_err());
        assert!(
            Record::new("Heat", vec!["Al Pacino".to_string(), " ".to_string()])
                .validate()
                .is_err()
        );
    }
}
