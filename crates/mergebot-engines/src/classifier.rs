use crate::client::JsonClient;
use crate::error::EngineError;
use mergebot_core::message::{
    ClassifierEnvelope, ClassifierPrediction, ClassifierRequest, CombineRequest, CombineResponse,
    BACKEND_OK,
};
use mergebot_core::{ClassifierEngine, CombinerEngine};
use std::time::Duration;

/// Strategy-label classifier (`POST /predict`).
pub struct ClassifierClient {
    client: JsonClient,
}

impl ClassifierClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: JsonClient::new("classifier", base_url, timeout)?,
        })
    }

    pub async fn fetch(
        &self,
        request: &ClassifierRequest,
    ) -> Result<Vec<ClassifierPrediction>, EngineError> {
        let envelope: ClassifierEnvelope = self.client.post("/predict", request).await?;
        if envelope.code != BACKEND_OK {
            return Err(EngineError::rejected("classifier", envelope.msg));
        }
        Ok(envelope.data)
    }
}

#[async_trait::async_trait]
impl ClassifierEngine for ClassifierClient {
    async fn predict(&self, request: &ClassifierRequest) -> anyhow::Result<Vec<ClassifierPrediction>> {
        Ok(self.fetch(request).await?)
    }
}

/// Combiner used for `CB` labels (`POST /combine`).
pub struct CombinerClient {
    client: JsonClient,
}

impl CombinerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: JsonClient::new("combiner", base_url, timeout)?,
        })
    }

    pub async fn fetch(&self, request: &CombineRequest) -> Result<String, EngineError> {
        let response: CombineResponse = self.client.post("/combine", request).await?;
        if !response.is_successful {
            return Err(EngineError::rejected("combiner", response.msg));
        }
        Ok(response.data.unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl CombinerEngine for CombinerClient {
    async fn combine(&self, request: &CombineRequest) -> anyhow::Result<String> {
        Ok(self.fetch(request).await?)
    }
}
