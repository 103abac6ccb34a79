//! Shared application state

use crate::config::Config;
use crate::content::ContentStore;
use crate::db::DbConnection;
use crate::delivery::Delivery;
use crate::shares::ShareRegistry;

#[derive(Clone)]
pub struct AppState {
    pub conn: DbConnection,
    pub contents: ContentStore,
    pub shares: ShareRegistry,
    pub delivery: Delivery,
}

impl AppState {
    pub fn new(conn: DbConnection, config: &Config) -> Self {
        let contents = ContentStore::new(
            conn.clone(),
            config.upload_dir.clone(),
            config.max_content_bytes,
        );
        let shares = ShareRegistry::new(conn.clone(), contents.clone());
        let delivery = Delivery::new(shares.clone(), config.stream_chunk_bytes);

        AppState {
            conn,
            contents,
            shares,
            delivery,
        }
    }
}
