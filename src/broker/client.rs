//! Authenticated HTTP dispatcher for the broker REST API.
//!
//! Every call carries the current access token in `Authorization`
//! (verbatim, no scheme prefix). A 401 triggers exactly one recovery:
//! full re-login, then the same request once more. A second 401, or
//! any other non-success status, surfaces as `BrokerError::Api`.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::auth::TokenManager;
use crate::types::{BrokerError, BrokerResult};

/// Build the shared HTTP client used by the authenticator and dispatcher.
pub fn http_client(timeout: Duration) -> BrokerResult<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent("rebalance-bot/0.1.0")
        .build()?)
}

pub struct BrokerClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl BrokerClient {
    pub fn new(http: Client, base_url: &str, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Authenticated GET with query parameters, JSON response.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> BrokerResult<T> {
        debug!(path, ?query, "GET");
        let resp = self
            .dispatch(path, |req| req.query(query), Method::GET)
            .await?;
        Self::parse(resp, path).await
    }

    /// Authenticated POST with a JSON body, JSON response.
    pub async fn post<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> BrokerResult<T> {
        debug!(path, "POST");
        let resp = self
            .dispatch(path, |req| req.json(body), Method::POST)
            .await?;
        Self::parse(resp, path).await
    }

    /// Authenticated DELETE; the response body is ignored.
    pub async fn delete(&self, path: &str) -> BrokerResult<()> {
        debug!(path, "DELETE");
        self.dispatch(path, |req| req, Method::DELETE).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        token: &str,
        decorate: &(dyn Fn(RequestBuilder) -> RequestBuilder + Send + Sync),
    ) -> BrokerResult<Response> {
        let req = self
            .http
            .request(method.clone(), url)
            .header(reqwest::header::AUTHORIZATION, token);
        Ok(decorate(req).send().await?)
    }

    async fn dispatch<F>(&self, path: &str, decorate: F, method: Method) -> BrokerResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let url = format!("{}{}", self.base_url, path);

        let token = self.tokens.get_valid_token().await?;
        let mut resp = self.send(&method, &url, &token, &decorate).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            info!(path, "Got 401, re-authenticating and retrying once");
            let token = self.tokens.force_login().await?;
            resp = self.send(&method, &url, &token, &decorate).await?;
        }

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::Api { status, body });
        }

        Ok(resp)
    }

    async fn parse<T: DeserializeOwned>(resp: Response, path: &str) -> BrokerResult<T> {
        let bytes = resp.bytes().await?;
        // Some endpoints answer 200/204 with no body.
        let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(bytes)
            .map_err(|e| BrokerError::Data(format!("Failed to parse {path} response: {e}")))
    }
}
