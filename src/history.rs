//! Conversation history loading.
//!
//! The history endpoint is fetched exactly once per session, before the live
//! stream is treated as authoritative for display.

use async_trait::async_trait;
use tracing::debug;

use crate::error::CourierError;
use crate::message::{ConversationId, Message};

/// Source of the one-shot historical message batch.
#[async_trait]
pub trait HistorySource: Send + Sync + 'static {
    /// Fetch the full ordered history for one conversation.
    async fn fetch(&self, conversation: &ConversationId) -> Result<Vec<Message>, CourierError>;
}

/// History over the marketplace HTTP API.
///
/// Pages through `GET {base}/conversations/{id}/messages` until a short page,
/// so the session-level contract stays a single fetch.
pub struct HttpHistorySource {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
}

impl HttpHistorySource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: 100,
        }
    }

    /// Override the page size used when walking the history.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn page_url(&self, conversation: &ConversationId, page: usize) -> String {
        format!(
            "{}/conversations/{}/messages?page={}&perPage={}",
            self.base_url, conversation, page, self.page_size
        )
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch(&self, conversation: &ConversationId) -> Result<Vec<Message>, CourierError> {
        let mut all = Vec::new();
        let mut page = 1usize;

        loop {
            let url = self.page_url(conversation, page);

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| CourierError::History(format!("Request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(CourierError::History(format!(
                    "History endpoint returned {}",
                    response.status()
                )));
            }

            let batch: Vec<Message> = response
                .json()
                .await
                .map_err(|e| CourierError::History(format!("Invalid history payload: {}", e)))?;

            let batch_len = batch.len();
            all.extend(batch);

            if batch_len < self.page_size {
                break;
            }
            page += 1;
        }

        debug!(conversation = %conversation, count = all.len(), "History fetched");
        Ok(all)
    }
}
