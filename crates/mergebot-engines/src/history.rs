use crate::client::JsonClient;
use crate::error::EngineError;
use mergebot_core::message::{HistoryEnvelope, HistoryQuery, HistoryRecord, BACKEND_OK};
use mergebot_core::HistorySource;
use std::time::Duration;

/// Reads mined history resolutions from the conflict metadata endpoint
/// (`GET /conflict/specified`).
pub struct HistoryClient {
    client: JsonClient,
}

impl HistoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: JsonClient::new("history", base_url, timeout)?,
        })
    }

    pub async fn fetch(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>, EngineError> {
        let envelope: HistoryEnvelope = self.client.get("/conflict/specified", query).await?;
        if envelope.code != BACKEND_OK {
            return Err(EngineError::rejected("history", envelope.msg));
        }
        Ok(envelope.info)
    }
}

#[async_trait::async_trait]
impl HistorySource for HistoryClient {
    async fn history(&self, query: &HistoryQuery) -> anyhow::Result<Vec<HistoryRecord>> {
        Ok(self.fetch(query).await?)
    }
}
