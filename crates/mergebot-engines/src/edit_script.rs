use crate::client::JsonClient;
use crate::error::EngineError;
use merge_engine::DlOutcome;
use mergebot_core::message::{EditScriptRequest, EditScriptResponse};
use mergebot_core::EditScriptEngine;
use std::time::Duration;

/// Edit-script predictor (`POST /es_predict`). An unsuccessful answer is a
/// normal "unresolvable" outcome, not an error.
pub struct EditScriptClient {
    client: JsonClient,
}

impl EditScriptClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: JsonClient::new("edit_script", base_url, timeout)?,
        })
    }

    pub async fn fetch(&self, request: &EditScriptRequest) -> Result<DlOutcome, EngineError> {
        let response: EditScriptResponse = self.client.post("/es_predict", request).await?;
        Ok(response.into_outcome())
    }
}

#[async_trait::async_trait]
impl EditScriptEngine for EditScriptClient {
    async fn predict(&self, request: &EditScriptRequest) -> anyhow::Result<DlOutcome> {
        Ok(self.fetch(request).await?)
    }
}
