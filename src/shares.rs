//! Share codes: issuance, listing, revocation and read-time expiry
//!
//! A share is `Active` until its owner revokes it. Expiry is never written
//! back; a share past its `expires_at` stays `Active` in storage and is
//! rejected whenever it is resolved.

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::content::ContentStore;
use crate::db::{is_unique_violation, DbConnection};
use crate::error::{Result, ShareError};
use crate::identity;
use crate::models::{format_timestamp, ExpiryPolicy, Share, ShareStatus, ShareSummary};

pub const SHARE_CODE_LEN: usize = 8;
pub const MAX_CODE_ATTEMPTS: usize = 5;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

pub fn generate_share_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SHARE_CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}

#[derive(Clone)]
pub struct ShareRegistry {
    conn: DbConnection,
    contents: ContentStore,
    generate_code: fn() -> String,
}

impl ShareRegistry {
    pub fn new(conn: DbConnection, contents: ContentStore) -> Self {
        Self {
            conn,
            contents,
            generate_code: generate_share_code,
        }
    }

    pub fn with_code_generator(mut self, generate_code: fn() -> String) -> Self {
        self.generate_code = generate_code;
        self
    }

    pub async fn create_share(
        &self,
        owner_token: &str,
        content_id: Uuid,
        policy: ExpiryPolicy,
    ) -> Result<Share> {
        self.create_share_at(owner_token, content_id, policy, Utc::now())
            .await
    }

    pub async fn create_share_at(
        &self,
        owner_token: &str,
        content_id: Uuid,
        policy: ExpiryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Share> {
        let owner = identity::resolve(&self.conn, owner_token).await?;
        let content = self
            .contents
            .find_by_id(content_id)
            .await?
            .ok_or(ShareError::ContentNotFound)?;

        let mut share = Share {
            id: Uuid::new_v4(),
            share_code: String::new(),
            owner_id: owner.id,
            content_id: content.id,
            expires_at: policy.expires_at(now),
            status: ShareStatus::Active,
            created_at: now,
            updated_at: now,
        };

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            share.share_code = (self.generate_code)();

            let inserted = self.conn.lock().await.execute(
                "INSERT INTO shares (id, share_code, owner_id, content_id, expires_at, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    share.id.to_string(),
                    share.share_code,
                    share.owner_id.to_string(),
                    share.content_id.to_string(),
                    share.expires_at.map(format_timestamp),
                    share.status.as_i64(),
                    format_timestamp(now),
                    format_timestamp(now)
                ],
            );

            match inserted {
                Ok(_) => {
                    tracing::info!(
                        share_id = %share.id,
                        share_code = %share.share_code,
                        content_id = %share.content_id,
                        ?policy,
                        "Created share"
                    );
                    return Ok(share);
                }
                Err(e) if is_unique_violation(&e) => {
                    tracing::warn!(attempt, "Share code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(
            attempts = MAX_CODE_ATTEMPTS,
            "Share code generation exhausted"
        );
        Err(ShareError::ShareCodeExhausted(MAX_CODE_ATTEMPTS))
    }

    /// Active shares owned by `owner_token`, newest first.
    pub async fn list_for_owner(&self, owner_token: &str) -> Result<Vec<ShareSummary>> {
        let owner = identity::resolve(&self.conn, owner_token).await?;

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.share_code, s.owner_id, s.content_id, s.expires_at, s.status,
                    s.created_at, s.updated_at, c.display_name
             FROM shares s
             JOIN stored_contents c ON c.id = s.content_id
             WHERE s.owner_id = ? AND s.status = ?
             ORDER BY s.created_at DESC, s.rowid DESC",
        )?;

        let rows = stmt.query_map(
            params![owner.id.to_string(), ShareStatus::Active.as_i64()],
            |row| {
                let share = Share::from_row(row)?;
                let display_name: String = row.get(8)?;
                Ok(ShareSummary::new(&share, display_name))
            },
        )?;

        let summaries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summaries)
    }

    /// Flips a share to `Revoked`. Existence is checked before ownership.
    pub async fn revoke(&self, owner_token: &str, share_id: &str) -> Result<()> {
        let owner = identity::resolve(&self.conn, owner_token).await?;
        let share_id = Uuid::parse_str(share_id).map_err(|_| ShareError::ShareNotFound)?;

        let conn = self.conn.lock().await;
        let share = conn
            .query_row(
                &format!("SELECT {} FROM shares WHERE id = ?", Share::COLUMNS),
                [share_id.to_string()],
                Share::from_row,
            )
            .optional()?
            .ok_or(ShareError::ShareNotFound)?;

        if share.owner_id != owner.id {
            tracing::warn!(share_id = %share.id, "Rejected revoke by non-owner");
            return Err(ShareError::Forbidden);
        }

        if share.status == ShareStatus::Revoked {
            return Ok(());
        }

        conn.execute(
            "UPDATE shares SET status = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
            params![
                ShareStatus::Revoked.as_i64(),
                format_timestamp(Utc::now()),
                share.id.to_string(),
                owner.id.to_string()
            ],
        )?;

        tracing::info!(share_id = %share.id, share_code = %share.share_code, "Revoked share");
        Ok(())
    }

    pub async fn resolve_active(&self, share_code: &str) -> Result<Share> {
        self.resolve_active_at(share_code, Utc::now()).await
    }

    /// Looks up an active share by code. Expired shares are rejected but
    /// left `Active` in storage.
    pub async fn resolve_active_at(&self, share_code: &str, now: DateTime<Utc>) -> Result<Share> {
        let share = self
            .conn
            .lock()
            .await
            .query_row(
                &format!(
                    "SELECT {} FROM shares WHERE share_code = ? AND status = ?",
                    Share::COLUMNS
                ),
                params![share_code, ShareStatus::Active.as_i64()],
                Share::from_row,
            )
            .optional()?
            .ok_or(ShareError::ShareNotFound)?;

        if share.is_expired_at(now) {
            tracing::debug!(share_code = %share_code, "Rejected expired share");
            return Err(ShareError::ShareExpired);
        }

        Ok(share)
    }

    pub fn contents(&self) -> &ContentStore {
        &self.contents
    }
}
