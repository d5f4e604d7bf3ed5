//! Authenticated REST plumbing.
//!
//! Thin wrapper over [`reqwest`] that injects the current bearer token
//! from the shared [`TokenProvider`] and retries exactly once with a
//! force-renewed token when the server answers 401. The retry covers
//! tokens that expire between the freshness check and the server's
//! validation; a second 401 means the credential itself is bad.

use std::sync::Arc;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::auth::TokenProvider;
use crate::error::Error;
use crate::transport::{http_base, join_path};

pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<TokenProvider>,
}

impl RestClient {
    pub fn new(
        http: reqwest::Client,
        server_url: &Url,
        tokens: Arc<TokenProvider>,
    ) -> Result<Self, Error> {
        Ok(Self {
            http,
            base: http_base(server_url)?,
            tokens,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Response, Error> {
        let url = join_path(&self.base, path)?;
        debug!("GET {}", url);
        self.execute(self.http.get(url), cancel).await
    }

    pub async fn get_json<T>(&self, path: &str, cancel: &CancellationToken) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let response = self.get(path, cancel).await?;
        Self::decode(response).await
    }

    pub async fn post_json<B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<Response, Error>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = join_path(&self.base, path)?;
        debug!("POST {}", url);
        self.execute(self.http.post(url).json(body), cancel).await
    }

    pub async fn post_json_as<B, T>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post_json(path, body, cancel).await?;
        Self::decode(response).await
    }

    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<Response, Error> {
        let url = join_path(&self.base, path)?;
        debug!("DELETE {}", url);
        self.execute(self.http.delete(url), cancel).await
    }

    /// Attach the current token and execute, retrying once on 401.
    async fn execute(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        let retryable = request.try_clone();

        let token = self.current_token(cancel).await;
        let response = Self::dispatch(request, token, cancel).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response.error_for_status()?);
        }

        let Some(retry) = retryable else {
            // Streaming bodies cannot be replayed.
            let reason = response.text().await.unwrap_or_default();
            return Err(Error::AuthFailure { reason });
        };

        debug!("401 response, retrying once with a renewed token");
        let renewed = self.tokens.force_renew(cancel).await?;
        let response = Self::dispatch(retry, Some(renewed), cancel).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let reason = response.text().await.unwrap_or_default();
            return Err(Error::AuthFailure { reason });
        }
        Ok(response.error_for_status()?)
    }

    /// Best-effort bearer: a provider failure downgrades the request to
    /// anonymous rather than blocking it.
    async fn current_token(&self, cancel: &CancellationToken) -> Option<String> {
        match self.tokens.get_or_update_token(cancel).await {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "proceeding without bearer token");
                None
            }
        }
    }

    async fn dispatch(
        request: RequestBuilder,
        token: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        let request = match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = request.send() => result.map_err(Error::Transport),
        }
    }

    async fn decode<T>(response: Response) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
