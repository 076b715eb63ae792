use crate::client::JsonClient;
use crate::error::EngineError;
use merge_engine::HeuristicReport;
use mergebot_core::message::{HeuristicRequest, HeuristicResponse, ShaEnvelope, SA_OK};
use mergebot_core::HeuristicEngine;
use std::time::Duration;

/// Client for the static-analysis resolver (`POST /resolve`).
pub struct SaClient {
    client: JsonClient,
}

impl SaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: JsonClient::new("sa", base_url, timeout)?,
        })
    }

    pub async fn fetch(&self, request: &HeuristicRequest) -> Result<HeuristicReport, EngineError> {
        let envelope: ShaEnvelope<HeuristicResponse> = self.client.post("/resolve", request).await?;
        if envelope.code != SA_OK {
            return Err(EngineError::rejected(
                "sa",
                envelope
                    .msg
                    .unwrap_or_else(|| format!("unexpected code {}", envelope.code)),
            ));
        }
        let data = envelope
            .data
            .ok_or_else(|| EngineError::rejected("sa", "response carried no data"))?;
        Ok(data.into_report())
    }
}

#[async_trait::async_trait]
impl HeuristicEngine for SaClient {
    async fn resolve(&self, request: &HeuristicRequest) -> anyhow::Result<HeuristicReport> {
        Ok(self.fetch(request).await?)
    }
}
