//! Document inbox source.

use async_trait::async_trait;

use docflow_engine::{FlowError, FlowResult};

use super::session::EmrSession;
use crate::queue::{Cursor, QueueItem, QueueKind};

/// Queue of documents awaiting intake.
///
/// Fetching never moves the cursor; the intake controller owns it.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Head-of-queue item the cursor admits, if any.
    async fn next_after(&self, queue: QueueKind, cursor: &Cursor) -> FlowResult<Option<QueueItem>>;

    /// Raw document bytes.
    async fn fetch(&self, item: &QueueItem) -> FlowResult<Vec<u8>>;

    /// Tag an item as permanently skipped.
    async fn mark_skipped(&self, item: &QueueItem) -> FlowResult<()>;
}

/// Inbox backed by the EMR document endpoints.
#[derive(Debug, Clone)]
pub struct HttpDocumentSource {
    session: EmrSession,
}

impl HttpDocumentSource {
    pub fn new(session: EmrSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn next_after(&self, queue: QueueKind, cursor: &Cursor) -> FlowResult<Option<QueueItem>> {
        let response = self
            .session
            .client()
            .get(self.session.url(&format!("dms/inbox/{}/items", queue)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FlowError::Transport(format!(
                "inbox listing failed with status {}",
                response.status()
            )));
        }

        let items: Vec<QueueItem> = response.json().await?;
        Ok(items.into_iter().find(|item| cursor.admits(item)))
    }

    async fn fetch(&self, item: &QueueItem) -> FlowResult<Vec<u8>> {
        let response = self
            .session
            .client()
            .get(
                self.session
                    .url(&format!("dms/documents/{}/content", item.document_id)),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FlowError::Transport(format!(
                "document fetch failed with status {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(FlowError::Data(format!(
                "document {} has no content",
                item.document_id
            )));
        }
        Ok(bytes.to_vec())
    }

    async fn mark_skipped(&self, item: &QueueItem) -> FlowResult<()> {
        let response = self
            .session
            .client()
            .post(
                self.session
                    .url(&format!("dms/documents/{}/skip", item.document_id)),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FlowError::Transport(format!(
                "skip tagging failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
