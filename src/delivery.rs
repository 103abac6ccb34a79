//! Server side of share delivery
//!
//! The inline path hands back a chunked byte stream over the stored file;
//! the attachment path reads the whole file and is meant for downloads.

use std::io;

use axum::body::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::Result;
use crate::shares::ShareRegistry;

pub type ContentStream = BoxStream<'static, io::Result<Bytes>>;

pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct Delivery {
    registry: ShareRegistry,
    chunk_bytes: usize,
}

impl Delivery {
    pub fn new(registry: ShareRegistry, chunk_bytes: usize) -> Self {
        Self {
            registry,
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    pub fn registry(&self) -> &ShareRegistry {
        &self.registry
    }

    /// Resolves `share_code` and opens its content as a stream of chunks no
    /// larger than the configured chunk size.
    ///
    /// Errors before the first chunk come back as `Err`; errors after that
    /// surface as a failed stream item and end the transfer.
    pub async fn open_stream(&self, share_code: &str) -> Result<ContentStream> {
        let share = self.registry.resolve_active(share_code).await?;
        let file = self.registry.contents().open_read_stream(share.content_id).await?;
        let content_id = share.content_id;

        Ok(ReaderStream::with_capacity(file, self.chunk_bytes)
            .inspect_err(move |e| log_stream_failure(content_id, e))
            .boxed())
    }

    pub async fn attachment(&self, share_code: &str) -> Result<Attachment> {
        let share = self.registry.resolve_active(share_code).await?;
        let (content, bytes) = self.registry.contents().read_all(share.content_id).await?;

        Ok(Attachment {
            file_name: content.display_name,
            bytes,
        })
    }
}

fn log_stream_failure(content_id: Uuid, err: &io::Error) {
    tracing::error!(content_id = %content_id, error = %err, "Content stream failed mid-transfer");
}
