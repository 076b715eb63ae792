use crate::client::JsonClient;
use crate::error::EngineError;
use mergebot_core::message::ChoiceRecord;
use mergebot_core::AuditSink;
use std::time::Duration;

pub struct AuditClient {
    client: JsonClient,
}

impl AuditClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: JsonClient::new("audit", base_url, timeout)?,
        })
    }

    pub async fn save(&self, record: &ChoiceRecord) -> Result<(), EngineError> {
        self.client.send("/audit/choice/save", record).await
    }
}

#[async_trait::async_trait]
impl AuditSink for AuditClient {
    async fn record(&self, record: &ChoiceRecord) -> anyhow::Result<()> {
        Ok(self.save(record).await?)
    }
}
