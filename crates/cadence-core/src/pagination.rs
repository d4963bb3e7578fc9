//! Cursor pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Position after the last item of a page.
///
/// Pages are ordered newest first by `(created_at, id)`, so the cursor holds
/// both parts of that key. Callers treat the encoded form as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{:x}:{}", self.created_at.timestamp_millis(), self.id)
    }

    pub fn decode(raw: &str) -> Result<Self, SchedulerError> {
        let malformed = || SchedulerError::BadRequest(format!("malformed cursor '{}'", raw));

        let (millis, id) = raw.split_once(':').ok_or_else(malformed)?;
        let millis = i64::from_str_radix(millis, 16).map_err(|_| malformed())?;
        let created_at = DateTime::from_timestamp_millis(millis).ok_or_else(malformed)?;
        if id.is_empty() {
            return Err(malformed());
        }

        Ok(Self::new(created_at, id))
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_encode_decode() {
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 8, 30, 0).unwrap();
        let cursor = Cursor::new(ts, "9b2e3c1a-0000-4000-8000-000000000000");
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_decode_rejects_garbage() {
        for raw in ["", "nocolon", "zz:abc", "10:", ":abc"] {
            let err = Cursor::decode(raw).unwrap_err();
            assert!(matches!(err, SchedulerError::BadRequest(_)), "{}", raw);
        }
    }
}
