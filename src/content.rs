//! Content-addressed JSON storage
//!
//! Each distinct byte sequence is stored once, keyed by its SHA-256 digest.
//! Bytes live on disk under a path derived from the row id (never the hash),
//! and the database row is only written after the bytes are on disk, so a
//! visible row always points at complete content.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::db::{is_unique_violation, DbConnection};
use crate::error::{Result, ShareError};
use crate::models::{format_timestamp, StoredContent};

/// Lowercase hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Checks that `data` is one well-formed JSON text without building a value.
pub fn validate_json(data: &[u8]) -> Result<()> {
    serde_json::from_slice::<serde::de::IgnoredAny>(data)
        .map(|_| ())
        .map_err(|e| ShareError::InvalidContent(e.to_string()))
}

#[derive(Clone)]
pub struct ContentStore {
    conn: DbConnection,
    root: PathBuf,
    max_bytes: usize,
}

impl ContentStore {
    pub fn new(conn: DbConnection, root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            conn,
            root: root.into(),
            max_bytes,
        }
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<StoredContent>> {
        let hash = hash.trim().to_ascii_lowercase();
        let content = self
            .conn
            .lock()
            .await
            .query_row(
                &format!(
                    "SELECT {} FROM stored_contents WHERE content_hash = ?",
                    StoredContent::COLUMNS
                ),
                [hash],
                StoredContent::from_row,
            )
            .optional()?;
        Ok(content)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredContent>> {
        let content = self
            .conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {} FROM stored_contents WHERE id = ?", StoredContent::COLUMNS),
                [id.to_string()],
                StoredContent::from_row,
            )
            .optional()?;
        Ok(content)
    }

    /// Stores `data` unless identical content is already present.
    ///
    /// A supplied `precomputed_hash` must match the digest of `data`.
    pub async fn ingest(
        &self,
        data: &[u8],
        display_name: &str,
        precomputed_hash: Option<&str>,
    ) -> Result<StoredContent> {
        if data.len() > self.max_bytes {
            return Err(ShareError::ContentTooLarge {
                limit: self.max_bytes,
            });
        }

        validate_json(data)?;

        let hash = content_hash(data);
        if let Some(declared) = precomputed_hash {
            if !declared.trim().eq_ignore_ascii_case(&hash) {
                return Err(ShareError::InvalidContent(
                    "declared hash does not match content".to_string(),
                ));
            }
        }

        if let Some(existing) = self.find_by_hash(&hash).await? {
            tracing::debug!(content_id = %existing.id, hash = %hash, "Content already stored, reusing");
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        let path = self.path_for(id);
        write_new_file(&path, data).await?;

        let now = Utc::now();
        let content = StoredContent {
            id,
            content_hash: Some(hash),
            display_name: display_name.to_string(),
            size_bytes: data.len() as u64,
            storage_locator: path.to_string_lossy().into_owned(),
            created_at: now,
            updated_at: now,
        };

        let inserted = self.conn.lock().await.execute(
            "INSERT INTO stored_contents (id, content_hash, display_name, size_bytes, storage_locator, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                content.id.to_string(),
                content.content_hash,
                content.display_name,
                data.len() as i64,
                content.storage_locator,
                format_timestamp(now),
                format_timestamp(now)
            ],
        );

        match inserted {
            Ok(_) => {
                tracing::info!(
                    content_id = %content.id,
                    size = content.size_bytes,
                    "Stored new content"
                );
                Ok(content)
            }
            Err(e) => {
                discard(&path).await;
                if is_unique_violation(&e) {
                    if let Some(hash) = content.content_hash.as_deref() {
                        if let Some(winner) = self.find_by_hash(hash).await? {
                            tracing::debug!(content_id = %winner.id, "Lost ingest race, reusing winner");
                            return Ok(winner);
                        }
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Opens the stored bytes for streaming.
    pub async fn open_read_stream(&self, id: Uuid) -> Result<fs::File> {
        let content = self.find_by_id(id).await?.ok_or(ShareError::ContentNotFound)?;
        match fs::File::open(&content.storage_locator).await {
            Ok(file) => Ok(file),
            Err(e) => Err(self.missing_bytes(id, e)),
        }
    }

    /// Reads the stored bytes fully into memory, along with the row they
    /// belong to.
    pub async fn read_all(&self, id: Uuid) -> Result<(StoredContent, Vec<u8>)> {
        let content = self.find_by_id(id).await?.ok_or(ShareError::ContentNotFound)?;
        match fs::read(&content.storage_locator).await {
            Ok(bytes) => Ok((content, bytes)),
            Err(e) => Err(self.missing_bytes(id, e)),
        }
    }

    fn missing_bytes(&self, id: Uuid, err: std::io::Error) -> ShareError {
        if err.kind() == std::io::ErrorKind::NotFound {
            tracing::error!(content_id = %id, "Stored content row has no bytes on disk");
            ShareError::StorageInconsistent(id)
        } else {
            ShareError::Io(err)
        }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

async fn write_new_file(path: &Path, data: &[u8]) -> Result<()> {
    let result = async {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = result {
        discard(path).await;
        return Err(e.into());
    }
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned upload");
        }
    }
}
