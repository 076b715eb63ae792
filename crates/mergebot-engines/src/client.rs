use crate::error::EngineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// JSON-over-HTTP plumbing shared by the engine clients.
#[derive(Debug, Clone)]
pub struct JsonClient {
    engine: &'static str,
    base_url: String,
    http: reqwest::Client,
}

impl JsonClient {
    pub fn new(engine: &'static str, base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            engine,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn engine(&self) -> &'static str {
        self.engine
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, EngineError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tracing::debug!(engine = self.engine, path, "POST");
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    pub async fn get<Q, R>(&self, path: &str, query: &Q) -> Result<R, EngineError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tracing::debug!(engine = self.engine, path, "GET");
        let response = self.http.get(self.url(path)).query(query).send().await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// POST where only the status matters.
    pub async fn send<B>(&self, path: &str, body: &B) -> Result<(), EngineError>
    where
        B: Serialize + ?Sized,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        self.check(response).await?;
        Ok(())
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::rejected(self.engine, format!("{}: {}", status, body)))
    }
}
