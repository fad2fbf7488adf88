use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CACHE_KEY_PREFIX: &str = "sarpay-progress-";

/// Where a reader is in one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Opaque renderer position: a scroll offset or a pagination cursor (CFI).
    pub location: String,
    /// Completion estimate in `[0, 100]`.
    pub percentage: f64,
    pub last_read: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_locations: Option<u32>,
}

/// Partial update. `None` fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressPatch {
    pub location: Option<String>,
    pub percentage: Option<f64>,
    pub current_location_index: Option<u32>,
    pub total_locations: Option<u32>,
}

impl ProgressPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn locations(mut self, current: u32, total: u32) -> Self {
        self.current_location_index = Some(current);
        self.total_locations = Some(total);
        self
    }
}

impl ProgressRecord {
    /// Applies `patch` over `previous` (or an empty record) and stamps `now`.
    pub fn merge(
        previous: Option<&ProgressRecord>,
        patch: &ProgressPatch,
        now: DateTime<Utc>,
    ) -> ProgressRecord {
        let previous_percentage = previous.map(|p| p.percentage).unwrap_or(0.0);
        let percentage = match patch.percentage {
            Some(value) if value.is_finite() => value.clamp(0.0, 100.0),
            _ => previous_percentage,
        };

        ProgressRecord {
            location: patch
                .location
                .clone()
                .or_else(|| previous.map(|p| p.location.clone()))
                .unwrap_or_default(),
            percentage,
            last_read: now,
            current_location_index: patch
                .current_location_index
                .or_else(|| previous.and_then(|p| p.current_location_index)),
            total_locations: patch
                .total_locations
                .or_else(|| previous.and_then(|p| p.total_locations)),
        }
    }
}

/// Identity of a progress record: a book, optionally scoped to a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressKey {
    pub book_id: String,
    pub user_id: Option<String>,
}

impl ProgressKey {
    pub fn new(book_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            book_id: book_id.into(),
            user_id,
        }
    }

    pub fn anonymous(book_id: impl Into<String>) -> Self {
        Self::new(book_id, None)
    }

    /// Local cache key. Anonymous and per-user records never share an entry.
    ///
    /// `@` separates book from user, so both ids are escaped first.
    pub fn cache_key(&self) -> String {
        let book = escape_id(&self.book_id);
        match &self.user_id {
            None => format!("{CACHE_KEY_PREFIX}{book}"),
            Some(user) => format!("{CACHE_KEY_PREFIX}{book}@{}", escape_id(user)),
        }
    }

    /// Inverse of [`ProgressKey::cache_key`] for keys with the progress prefix.
    pub fn from_cache_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(CACHE_KEY_PREFIX)?;
        if rest.is_empty() {
            return None;
        }
        Some(match rest.split_once('@') {
            Some((book, user)) if !book.is_empty() && !user.is_empty() => {
                ProgressKey::new(unescape_id(book), Some(unescape_id(user)))
            }
            _ => ProgressKey::anonymous(unescape_id(rest)),
        })
    }
}

fn escape_id(id: &str) -> String {
    id.replace('%', "%25").replace('@', "%40")
}

// every '%' in an escaped id starts "%25" or "%40", so the order is safe
fn unescape_id(id: &str) -> String {
    id.replace("%40", "@").replace("%25", "%")
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_id {
            Some(user) => write!(f, "{} ({user})", self.book_id),
            None => write!(f, "{} (no user)", self.book_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_merge_on_empty_uses_defaults() {
        let patch = ProgressPatch::new().location("ch3");
        let merged = ProgressRecord::merge(None, &patch, at(10));

        assert_eq!(merged.location, "ch3");
        assert_eq!(merged.percentage, 0.0);
        assert_eq!(merged.last_read, at(10));
        assert_eq!(merged.total_locations, None);
    }

    #[test]
    fn test_merge_keeps_unspecified_fields() {
        let previous = ProgressRecord {
            location: "ch1".to_string(),
            percentage: 12.5,
            last_read: at(1),
            current_location_index: Some(4),
            total_locations: Some(200),
        };

        let merged = ProgressRecord::merge(Some(&previous), &ProgressPatch::new().percentage(20.0), at(2));
        assert_eq!(merged.location, "ch1");
        assert_eq!(merged.percentage, 20.0);
        assert_eq!(merged.current_location_index, Some(4));
        assert_eq!(merged.total_locations, Some(200));
        assert_eq!(merged.last_read, at(2));
    }

    #[test]
    fn test_merge_clamps_and_rejects_nan() {
        let high = ProgressRecord::merge(None, &ProgressPatch::new().percentage(140.0), at(0));
        assert_eq!(high.percentage, 100.0);

        let nan = ProgressRecord::merge(Some(&high), &ProgressPatch::new().percentage(f64::NAN), at(1));
        assert_eq!(nan.percentage, 100.0);
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(ProgressKey::anonymous("b1").cache_key(), "sarpay-progress-b1");
        assert_eq!(
            ProgressKey::new("b1", Some("u9".to_string())).cache_key(),
            "sarpay-progress-b1@u9"
        );
        assert_eq!(
            ProgressKey::from_cache_key("sarpay-progress-b1@u9"),
            Some(ProgressKey::new("b1", Some("u9".to_string())))
        );
        assert_eq!(
            ProgressKey::from_cache_key("sarpay-progress-b1"),
            Some(ProgressKey::anonymous("b1"))
        );
        assert_eq!(ProgressKey::from_cache_key("sarpay-reader-preferences"), None);
    }

    #[test]
    fn test_ids_containing_separator_stay_distinct() {
        let anonymous = ProgressKey::anonymous("a@b");
        let user = ProgressKey::new("a", Some("b".to_string()));
        assert_ne!(anonymous.cache_key(), user.cache_key());

        for key in [
            anonymous,
            user,
            ProgressKey::new("50%@x", Some("me@example.com".to_string())),
            ProgressKey::anonymous("%40"),
        ] {
            assert_eq!(ProgressKey::from_cache_key(&key.cache_key()), Some(key));
        }
    }

    #[test]
    fn test_json_uses_camel_case() {
        let record = ProgressRecord {
            location: "epubcfi(/6/2)".to_string(),
            percentage: 42.0,
            last_read: at(0),
            current_location_index: Some(3),
            total_locations: None,
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["lastRead"], "1970-01-01T00:00:00Z");
        assert_eq!(json["currentLocationIndex"], 3);
        assert!(json.get("totalLocations").is_none());
    }
}
