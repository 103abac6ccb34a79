use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::db::{is_unique_violation, DbConnection};
use crate::error::{Result, ShareError};
use crate::models::{format_timestamp, User};

/// Returns the user bound to `token`, creating one on first sight.
///
/// The token is opaque here and matched byte for byte; rejecting blank or
/// malformed tokens is up to the caller.
pub async fn resolve(conn: &DbConnection, token: &str) -> Result<User> {
    if let Some(user) = find_by_token(conn, token).await? {
        return Ok(user);
    }
    create(conn, token).await
}

/// Inserts a user for `token`. Concurrent first calls for the same token race
/// on the UNIQUE constraint of `users.external_token`; the loser reads back
/// the winner's row.
async fn create(conn: &DbConnection, token: &str) -> Result<User> {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        external_token: token.to_string(),
        created_at: now,
        updated_at: now,
    };

    let inserted = conn.lock().await.execute(
        "INSERT INTO users (id, external_token, created_at, updated_at) VALUES (?, ?, ?, ?)",
        params![
            user.id.to_string(),
            user.external_token,
            format_timestamp(now),
            format_timestamp(now)
        ],
    );

    match inserted {
        Ok(_) => {
            tracing::info!(user_id = %user.id, "Created user for new identity token");
            Ok(user)
        }
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!("Identity token registered concurrently, reading winner");
            find_by_token(conn, token)
                .await?
                .ok_or(ShareError::Database(e))
        }
        Err(e) => Err(e.into()),
    }
}

async fn find_by_token(conn: &DbConnection, token: &str) -> Result<Option<User>> {
    let user = conn
        .lock()
        .await
        .query_row(
            &format!("SELECT {} FROM users WHERE external_token = ?", User::COLUMNS),
            [token],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn same_token_same_user() {
        let conn = open_in_memory().unwrap();
        let first = resolve(&conn, "client-a").await.unwrap();
        let second = resolve(&conn, "client-a").await.unwrap();
        assert_eq!(first.id, second.id);

        let other = resolve(&conn, "client-b").await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn losing_insert_returns_existing_user() {
        let conn = open_in_memory().unwrap();
        let winner = resolve(&conn, "late-token").await.unwrap();

        let loser = create(&conn, "late-token").await.unwrap();
        assert_eq!(loser.id, winner.id);
        assert_eq!(loser.external_token, "late-token");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_sight_yields_one_user() {
        let conn = open_in_memory().unwrap();
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let conn = conn.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    resolve(&conn, "racing-token").await.unwrap().id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let count: i64 = conn
            .lock()
            .await
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn tokens_are_matched_verbatim() {
        let conn = open_in_memory().unwrap();
        let plain = resolve(&conn, "alice").await.unwrap();
        let padded = resolve(&conn, " alice").await.unwrap();
        assert_ne!(plain.id, padded.id);
        assert_eq!(padded.external_token, " alice");
    }
}
