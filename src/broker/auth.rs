//! Session authentication and token lifecycle.
//!
//! `Authenticator` talks to `/auth/login` and `/auth/refresh`.
//! `TokenManager` owns the current `Session` and decides before every
//! outbound call whether the token is fine, due for a proactive refresh,
//! or missing (full login). Tokens are short-lived (~15 minutes), so the
//! refresh happens on elapsed time, not on failure.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::totp;
use crate::config::Credentials;
use crate::types::{BrokerError, BrokerResult};

const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
const REFRESH_TOKEN_HEADER: &str = "X-Refresh-Token";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Access/refresh token pair plus the instant it was obtained.
///
/// Always replaced as a whole so readers never see a mixed pair.
#[derive(Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: Instant,
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            issued_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Source of new sessions. The HTTP implementation is `Authenticator`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Full credential login (with 2FA when required).
    async fn login(&self) -> BrokerResult<Session>;

    /// Exchange the refresh token for a new session.
    async fn refresh(&self, current: &Session) -> BrokerResult<Session>;
}

// ---------------------------------------------------------------------------
// HTTP authenticator
// ---------------------------------------------------------------------------

/// Token fields some login responses carry in the body instead of headers.
#[derive(Debug, Deserialize, Default)]
struct TokenBody {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Login/refresh against the broker's auth endpoints.
pub struct Authenticator {
    http: Client,
    base_url: String,
    email: String,
    password: SecretString,
    otp_secret: Option<SecretString>,
}

impl Authenticator {
    pub fn new(http: Client, base_url: &str, credentials: Credentials) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: credentials.email,
            password: credentials.password,
            otp_secret: credentials.otp_secret,
        }
    }

    async fn post_login(&self, otp: Option<&str>) -> BrokerResult<Response> {
        let mut payload = serde_json::json!({
            "email": self.email,
            "password": self.password.expose_secret(),
        });
        if let Some(code) = otp {
            payload["otp"] = serde_json::Value::String(code.to_string());
        }
        let resp = self
            .http
            .post(format!("{}/auth/login", self.base_url))
            .json(&payload)
            .send()
            .await?;
        Ok(resp)
    }

    fn header_token(resp: &Response, name: &str) -> Option<String> {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    async fn failure(resp: Response, what: &str) -> BrokerError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        BrokerError::Auth(format!("{what} failed with status {}: {body}", status.as_u16()))
    }
}

fn is_ok_status(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::CREATED
}

#[async_trait]
impl SessionProvider for Authenticator {
    async fn login(&self) -> BrokerResult<Session> {
        info!(email = %self.email, "Attempting login");
        let mut resp = self.post_login(None).await?;

        // 2FA accounts answer the first attempt with 401.
        if resp.status() == StatusCode::UNAUTHORIZED {
            if let Some(secret) = &self.otp_secret {
                let code = totp::current_code(secret.expose_secret())?;
                info!("2FA required, retrying with OTP");
                resp = self.post_login(Some(&code)).await?;
            }
        }

        if !is_ok_status(resp.status()) {
            return Err(Self::failure(resp, "Login").await);
        }

        let mut access = Self::header_token(&resp, ACCESS_TOKEN_HEADER);
        let mut refresh = Self::header_token(&resp, REFRESH_TOKEN_HEADER);

        if access.is_none() {
            let body: TokenBody = resp.json().await.unwrap_or_default();
            access = body.access_token.filter(|t| !t.is_empty());
            refresh = body.refresh_token;
        }

        let access = access.ok_or_else(|| {
            BrokerError::Auth("No access token received from login response".to_string())
        })?;

        info!("Login successful");
        Ok(Session::new(access, refresh.unwrap_or_default()))
    }

    async fn refresh(&self, current: &Session) -> BrokerResult<Session> {
        if current.refresh_token.is_empty() {
            return Err(BrokerError::Auth("No refresh token available".to_string()));
        }

        let resp = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&serde_json::json!({ "refresh_token": current.refresh_token }))
            .send()
            .await?;

        if !is_ok_status(resp.status()) {
            return Err(Self::failure(resp, "Token refresh").await);
        }

        let access = Self::header_token(&resp, ACCESS_TOKEN_HEADER)
            .unwrap_or_else(|| current.access_token.clone());
        let refresh = Self::header_token(&resp, REFRESH_TOKEN_HEADER)
            .unwrap_or_else(|| current.refresh_token.clone());

        info!("Token refreshed successfully");
        Ok(Session::new(access, refresh))
    }
}

// ---------------------------------------------------------------------------
// Token manager
// ---------------------------------------------------------------------------

/// Token lifetime policy.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub lifetime: Duration,
    pub refresh_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(900),
            refresh_margin: Duration::from_secs(120),
        }
    }
}

impl TokenPolicy {
    /// Age after which a proactive refresh is due.
    pub fn refresh_after(&self) -> Duration {
        self.lifetime.saturating_sub(self.refresh_margin)
    }
}

/// Owns the session; the lock is held across login/refresh so concurrent
/// callers wait for the new token instead of racing a second login.
pub struct TokenManager {
    provider: Box<dyn SessionProvider>,
    policy: TokenPolicy,
    session: Mutex<Option<Session>>,
}

impl TokenManager {
    pub fn new(provider: Box<dyn SessionProvider>, policy: TokenPolicy) -> Self {
        Self {
            provider,
            policy,
            session: Mutex::new(None),
        }
    }

    /// Current access token, logging in or refreshing first when needed.
    pub async fn get_valid_token(&self) -> BrokerResult<String> {
        let mut guard = self.session.lock().await;

        match guard.as_ref() {
            None => {
                *guard = Some(self.provider.login().await?);
            }
            Some(current) if current.age() > self.policy.refresh_after() => {
                debug!(age_secs = current.age().as_secs(), "Token due for refresh");
                match self.provider.refresh(current).await {
                    Ok(session) => {
                        info!("Token proactively refreshed");
                        *guard = Some(session);
                    }
                    Err(e) if e.is_auth() => {
                        warn!(error = %e, "Refresh failed, performing full re-login");
                        *guard = Some(self.provider.login().await?);
                    }
                    Err(e) => return Err(e),
                }
            }
            Some(_) => {}
        }

        guard
            .as_ref()
            .map(|s| s.access_token.clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BrokerError::Auth("Not authenticated".to_string()))
    }

    /// Unconditional full login.
    pub async fn ensure_authenticated(&self) -> BrokerResult<()> {
        self.force_login().await.map(|_| ())
    }

    /// Full login regardless of the current session; returns the new token.
    pub async fn force_login(&self) -> BrokerResult<String> {
        let mut guard = self.session.lock().await;
        let session = self.provider.login().await?;
        let token = session.access_token.clone();
        *guard = Some(session);
        Ok(token)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
