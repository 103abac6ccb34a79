use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub external_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub const COLUMNS: &'static str = "id, external_token, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: uuid_column(row, 0)?,
            external_token: row.get(1)?,
            created_at: timestamp_column(row, 2)?,
            updated_at: timestamp_column(row, 3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredContent {
    pub id: Uuid,
    pub content_hash: Option<String>,
    pub display_name: String,
    pub size_bytes: u64,
    #[serde(skip_serializing)]
    pub storage_locator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredContent {
    pub const COLUMNS: &'static str =
        "id, content_hash, display_name, size_bytes, storage_locator, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let size: i64 = row.get(3)?;
        Ok(StoredContent {
            id: uuid_column(row, 0)?,
            content_hash: row.get(1)?,
            display_name: row.get(2)?,
            size_bytes: u64::try_from(size)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(e)))?,
            storage_locator: row.get(4)?,
            created_at: timestamp_column(row, 5)?,
            updated_at: timestamp_column(row, 6)?,
        })
    }
}

/// Persisted share state. Expiry is never stored as a status; it is derived
/// from `expires_at` whenever the share is read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Active,
    Revoked,
}

impl ShareStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            ShareStatus::Active => 1,
            ShareStatus::Revoked => 0,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(ShareStatus::Active),
            0 => Some(ShareStatus::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExpiryPolicy {
    #[serde(rename = "day")]
    OneDay,
    #[serde(rename = "week")]
    OneWeek,
    #[serde(rename = "permanent")]
    Permanent,
}

impl ExpiryPolicy {
    pub fn expires_at(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ExpiryPolicy::OneDay => Some(now + Duration::hours(24)),
            ExpiryPolicy::OneWeek => Some(now + Duration::hours(7 * 24)),
            ExpiryPolicy::Permanent => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub id: Uuid,
    pub share_code: String,
    pub owner_id: Uuid,
    pub content_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ShareStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Share {
    pub const COLUMNS: &'static str =
        "id, share_code, owner_id, content_id, expires_at, status, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: i64 = row.get(5)?;
        let expires_at: Option<String> = row.get(4)?;
        Ok(Share {
            id: uuid_column(row, 0)?,
            share_code: row.get(1)?,
            owner_id: uuid_column(row, 2)?,
            content_id: uuid_column(row, 3)?,
            expires_at: expires_at
                .map(|raw| parse_timestamp(4, &raw))
                .transpose()?,
            status: ShareStatus::from_i64(status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    Type::Integer,
                    format!("unknown share status {status}").into(),
                )
            })?,
            created_at: timestamp_column(row, 6)?,
            updated_at: timestamp_column(row, 7)?,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// A share as presented to its owner, joined with the content's display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareSummary {
    pub id: Uuid,
    pub share_code: String,
    pub file_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ShareStatus,
    pub created_at: DateTime<Utc>,
}

impl ShareSummary {
    pub fn new(share: &Share, file_name: impl Into<String>) -> Self {
        ShareSummary {
            id: share.id,
            share_code: share.share_code.clone(),
            file_name: file_name.into(),
            expires_at: share.expires_at,
            status: share.status,
            created_at: share.created_at,
        }
    }
}

/// Fixed-width RFC 3339 so that text ordering in SQLite matches time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
