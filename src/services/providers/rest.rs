/// Typed REST fetch shared by the upstream service clients
///
/// Every upstream call has the same shape: build a GET request, run it with
/// a bounded timeout, reject non-2xx responses with the status code and body,
/// then decode the JSON payload. No retries and no caching.
use crate::error::{AppError, AppResult};
use crate::models::DataEnvelope;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Clone)]
pub struct RestClient {
    http_client: HttpClient,
    base_url: String,
    service: &'static str,
}

impl RestClient {
    pub fn new(service: &'static str, base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// GET `path` and decode the body as `T`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|source| AppError::Upstream {
                service: self.service,
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamStatus {
                service: self.service,
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|source| AppError::Upstream {
            service: self.service,
            source,
        })?;

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                service = self.service,
                url = %url,
                error = %e,
                "Failed to decode upstream response"
            );
            AppError::UpstreamDecode {
                service: self.service,
                message: e.to_string(),
            }
        })
    }

    /// GET `path` and unwrap a `{ "data": T }` envelope
    pub async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let envelope: DataEnvelope<T> = self.get_json(path, query).await?;
        Ok(envelope.data)
    }
}
