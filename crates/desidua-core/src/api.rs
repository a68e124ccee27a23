use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::errors::DesiduaError;

/// HTTP client for the clinic backend.
///
/// Every request goes through [`BackendClient::request`], which looks up the
/// current bearer credential right before sending. A missing credential is not
/// an error here: the request goes out unauthenticated and the server decides.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl BackendClient {
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, DesiduaError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DesiduaError::Network(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.endpoint(path);
        tracing::info!("{method} {url}");
        let builder = self.http.request(method, url);
        match self.credentials.current() {
            Some(token) => builder.bearer_auth(token),
            None => {
                tracing::debug!("no stored credential, sending unauthenticated request");
                builder
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DesiduaError> {
        let resp = Self::send(self.request(Method::GET, path)).await?;
        Self::decode(resp).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, DesiduaError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = Self::send(self.request(Method::POST, path).json(body)).await?;
        Self::decode(resp).await
    }

    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), DesiduaError> {
        self.send_json(Method::PATCH, path, body).await
    }

    /// Send a JSON body and ignore whatever the server answers with.
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), DesiduaError> {
        Self::send(self.request(method, path).json(body)).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<(), DesiduaError> {
        Self::send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    async fn send(builder: RequestBuilder) -> Result<Response, DesiduaError> {
        let resp = builder.send().await.map_err(DesiduaError::from_reqwest)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let detail = Self::server_message(resp).await;
        tracing::warn!("backend returned {status}: {detail}");
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DesiduaError::Unauthorized(detail),
            StatusCode::NOT_FOUND => DesiduaError::NotFound(detail),
            other => DesiduaError::Http {
                status: other.as_u16(),
            },
        })
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, DesiduaError> {
        let bytes = resp.bytes().await.map_err(DesiduaError::from_reqwest)?;
        serde_json::from_slice(&bytes).map_err(|e| DesiduaError::MalformedResponse(e.to_string()))
    }

    /// Best-effort extraction of `{"message": "..."}` from an error body.
    async fn server_message(resp: Response) -> String {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.to_string())
    }
}
