/// Offset and cursor pagination primitives
///
/// List endpoints accept either classic `limit`/`offset` pagination or
/// keyset ("cursor") pagination. Cursors are opaque to clients: a
/// base64url-encoded JSON object carrying the row id plus the value of the
/// ordered column, so a page boundary survives concurrent inserts without
/// skipping or repeating rows.
///
/// # Cursor format
///
/// ```text
/// base64url( {"id": "...", "created_at": "...", "priority": 7} )
/// ```
///
/// `id` and `created_at` are always present; `priority`, `name` and
/// `updated_at` are carried only when they are the ordered column.
/// `created_at` doubles as the tiebreak fallback for cursors that predate
/// the ordered-value fields.
///
/// # Example
///
/// ```
/// use voidrunner_core::pagination::{Cursor, SortField, SortOrder};
/// use chrono::Utc;
/// use uuid::Uuid;
///
/// let cursor = Cursor {
///     id: Uuid::new_v4(),
///     created_at: Utc::now(),
///     priority: Some(7),
///     name: None,
///     updated_at: None,
/// };
/// let encoded = cursor.encode();
/// let decoded = Cursor::decode(&encoded).unwrap();
/// assert_eq!(decoded.id, cursor.id);
/// ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Default page size for offset pagination
pub const DEFAULT_OFFSET_LIMIT: i64 = 10;

/// Default page size for cursor pagination
pub const DEFAULT_CURSOR_LIMIT: i64 = 20;

/// Maximum page size for cursor pagination
pub const MAX_CURSOR_LIMIT: i64 = 100;

/// Offset pagination parameters
///
/// `normalized` clamps the offset to zero and applies the default limit,
/// matching the store contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OffsetPage {
    /// Maximum rows to return
    pub limit: Option<i64>,

    /// Rows to skip
    pub offset: Option<i64>,
}

impl OffsetPage {
    /// Returns `(limit, offset)` with defaults applied and offset clamped ≥ 0
    pub fn normalized(&self) -> (i64, i64) {
        let limit = match self.limit {
            Some(l) if l > 0 => l,
            _ => DEFAULT_OFFSET_LIMIT,
        };
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// Sortable columns for cursor-paginated task listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Creation timestamp (default)
    CreatedAt,

    /// Last update timestamp
    UpdatedAt,

    /// Task priority (0-10)
    Priority,

    /// Task name
    Name,
}

impl Default for SortField {
    fn default() -> Self {
        SortField::CreatedAt
    }
}

impl SortField {
    /// Column name as it appears in SQL; the set is closed so interpolating
    /// it into a query string is safe
    pub fn as_column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Priority => "priority",
            SortField::Name => "name",
        }
    }

    /// Parses the wire name (`created_at`, `updated_at`, `priority`, `name`)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created_at" => Some(SortField::CreatedAt),
            "updated_at" => Some(SortField::UpdatedAt),
            "priority" => Some(SortField::Priority),
            "name" => Some(SortField::Name),
            _ => None,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}

impl SortOrder {
    /// SQL keyword for the direction
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Row-comparison operator for the keyset predicate: rows strictly
    /// after the cursor in this direction
    pub fn comparator(&self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }

    /// Parses `asc`/`desc`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Decoded cursor payload
///
/// Always carries the row id and creation timestamp; the remaining fields
/// are present only when they are the ordered column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    /// Tiebreak row id
    pub id: Uuid,

    /// Creation timestamp (always present; fallback ordering value)
    pub created_at: DateTime<Utc>,

    /// Ordered value when sorting by priority
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Ordered value when sorting by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Ordered value when sorting by updated_at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cursor {
    /// Encodes the cursor as opaque base64url JSON
    pub fn encode(&self) -> String {
        // Serialization of this struct cannot fail
        let json = serde_json::to_vec(self).expect("cursor serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes an opaque cursor string
    ///
    /// Tampered or malformed input yields `StoreError::InvalidCursor`.
    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .map_err(|_| StoreError::InvalidCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| StoreError::InvalidCursor)
    }
}

/// Cursor pagination request
#[derive(Debug, Clone, Default)]
pub struct CursorQuery {
    /// Requested page size (default 20, max 100)
    pub limit: Option<i64>,

    /// Opaque cursor from a previous page
    pub cursor: Option<String>,

    /// Ordered column
    pub sort_field: SortField,

    /// Sort direction
    pub sort_order: SortOrder,
}

impl CursorQuery {
    /// Effective page size with default and cap applied
    pub fn effective_limit(&self) -> i64 {
        match self.limit {
            Some(l) if l > 0 => l.min(MAX_CURSOR_LIMIT),
            _ => DEFAULT_CURSOR_LIMIT,
        }
    }

    /// Decodes the cursor if present
    pub fn decoded_cursor(&self) -> Result<Option<Cursor>, StoreError> {
        match &self.cursor {
            Some(raw) => Cursor::decode(raw).map(Some),
            None => Ok(None),
        }
    }
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    /// Page items in requested order
    pub items: Vec<T>,

    /// Cursor for the next page, absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Whether more rows exist past this page
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_defaults_and_clamp() {
        let page = OffsetPage {
            limit: None,
            offset: Some(-5),
        };
        assert_eq!(page.normalized(), (DEFAULT_OFFSET_LIMIT, 0));

        let page = OffsetPage {
            limit: Some(50),
            offset: Some(30),
        };
        assert_eq!(page.normalized(), (50, 30));
    }

    #[test]
    fn test_cursor_limit_defaults_and_cap() {
        let q = CursorQuery::default();
        assert_eq!(q.effective_limit(), DEFAULT_CURSOR_LIMIT);

        let q = CursorQuery {
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), MAX_CURSOR_LIMIT);

        let q = CursorQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), DEFAULT_CURSOR_LIMIT);
    }

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = Cursor {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            priority: Some(9),
            name: None,
            updated_at: None,
        };

        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.id, cursor.id);
        assert_eq!(decoded.priority, Some(9));
        assert_eq!(
            decoded.created_at.timestamp_micros(),
            cursor.created_at.timestamp_micros()
        );
    }

    #[test]
    fn test_cursor_carries_ordered_value() {
        let cursor = Cursor {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            priority: None,
            name: Some("zeta".to_string()),
            updated_at: None,
        };

        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.name.as_deref(), Some("zeta"));
    }

    #[test]
    fn test_tampered_cursor_rejected() {
        let cursor = Cursor {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            priority: None,
            name: None,
            updated_at: None,
        };
        let mut encoded = cursor.encode();
        encoded.insert(3, '!');

        assert!(matches!(
            Cursor::decode(&encoded),
            Err(StoreError::InvalidCursor)
        ));
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        assert!(matches!(
            Cursor::decode("not-a-cursor"),
            Err(StoreError::InvalidCursor)
        ));
        // Valid base64 but not JSON
        let garbage = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            Cursor::decode(&garbage),
            Err(StoreError::InvalidCursor)
        ));
    }

    #[test]
    fn test_sort_field_parse() {
        assert_eq!(SortField::parse("priority"), Some(SortField::Priority));
        assert_eq!(SortField::parse("name"), Some(SortField::Name));
        assert_eq!(SortField::parse("bogus"), None);
    }

    #[test]
    fn test_sort_order_sql() {
        assert_eq!(SortOrder::Asc.as_sql(), "ASC");
        assert_eq!(SortOrder::Desc.comparator(), "<");
        assert_eq!(SortOrder::parse("desc"), Some(SortOrder::Desc));
        assert_eq!(SortOrder::parse("down"), None);
    }
}
