//! Session-aware client for the CSE portal API
//!
//! A [`SessionHandle`] owns one browser-like session: a cookie jar seeded by
//! navigating to the portal root and a fixed header set. [`SessionClient`]
//! issues calls on a handle with:
//!
//! - a hard minimum gap between requests, measured from the end of the
//!   previous request on the same handle, whatever the endpoint
//! - exponential retry backoff for transport failures and non-2xx responses
//! - one transparent session renewal when the portal stops accepting the
//!   session (HTML instead of JSON, 401/403)
//!
//! Cookie and header values are never logged.

use crate::constants::{HTTP_TIMEOUT_SECS, MAX_BACKOFF_SECS, PORTAL_ROOT_URL, SESSION_HEADERS, USER_AGENT};
use crate::error::{AppError, Result};
use crate::models::{Endpoint, PipelineConfig};
use crate::services::clock::{sleep_or_cancel, Clock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Raw HTTP response as seen by the session logic
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-level failure (connect, timeout, body read)
#[derive(Debug, Clone, ThisError)]
#[error("{0}")]
pub struct TransportError(pub String);

/// One HTTP session with its own cookie jar
#[async_trait]
pub trait Transport: Send + Sync {
    /// Plain navigation-style GET (used to obtain the session cookie)
    async fn navigate(&self, url: &str) -> std::result::Result<TransportResponse, TransportError>;

    /// Form-encoded POST
    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> std::result::Result<TransportResponse, TransportError>;

    /// Whether the jar holds a cookie for the portal
    fn has_session_cookie(&self) -> bool;
}

/// Creates fresh transports, each with an empty cookie jar
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> std::result::Result<Box<dyn Transport>, TransportError>;
}

/// `reqwest`-backed transport with a per-session cookie jar
pub struct ReqwestTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
    portal_url: reqwest::Url,
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn navigate(&self, url: &str) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| TransportError(format!("navigation failed: {}", e)))?;
        read_response(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| TransportError(format!("request failed: {}", e)))?;
        read_response(response).await
    }

    fn has_session_cookie(&self) -> bool {
        self.jar.cookies(&self.portal_url).is_some()
    }
}

async fn read_response(response: reqwest::Response) -> std::result::Result<TransportResponse, TransportError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| TransportError(format!("failed to read response body: {}", e)))?;
    Ok(TransportResponse { status, body })
}

/// Builds [`ReqwestTransport`]s carrying the portal's browser header set
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestTransportFactory;

impl TransportFactory for ReqwestTransportFactory {
    fn create(&self) -> std::result::Result<Box<dyn Transport>, TransportError> {
        let mut headers = HeaderMap::new();
        for &(name, value) in SESSION_HEADERS {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError(format!("invalid header name: {}", e)))?;
            headers.insert(name, HeaderValue::from_static(value));
        }

        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError(format!("failed to create HTTP client: {}", e)))?;

        let portal_url = reqwest::Url::parse(PORTAL_ROOT_URL)
            .map_err(|e| TransportError(format!("invalid portal URL: {}", e)))?;

        Ok(Box::new(ReqwestTransport { client, jar, portal_url }))
    }
}

/// Retry and pacing knobs of a [`SessionClient`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub request_delay: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub session_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            request_delay: config.request_delay,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff,
            session_attempts: config.session_attempts.max(1),
        }
    }

    /// Delay before retry `n` (1-based): `retry_backoff * 2^(n-1)`, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_backoff
            .saturating_mul(factor)
            .min(Duration::from_secs(MAX_BACKOFF_SECS))
    }
}

/// An established portal session
pub struct SessionHandle {
    transport: Box<dyn Transport>,
    last_request_end: Option<DateTime<Utc>>,
    established_at: DateTime<Utc>,
    renewals: u32,
    requests: u64,
}

impl SessionHandle {
    pub fn renewals(&self) -> u32 {
        self.renewals
    }

    /// Requests issued on this handle, navigation included
    pub fn requests(&self) -> u64 {
        self.requests
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Deliberately no cookie or header content
        f.debug_struct("SessionHandle")
            .field("established_at", &self.established_at)
            .field("renewals", &self.renewals)
            .field("requests", &self.requests)
            .finish()
    }
}

/// What one POST attempt produced
enum AttemptOutcome {
    Json(Value),
    /// Session no longer accepted by the portal
    SessionRejected(u16),
    Failed { status: Option<u16>, reason: String },
}

pub struct SessionClient {
    factory: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    cancel: CancellationToken,
}

impl SessionClient {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            clock,
            settings,
            cancel,
        }
    }

    /// Obtain a session cookie by navigating to the portal root
    pub async fn establish(&self) -> Result<SessionHandle> {
        let (transport, last_request_end) = self.open_transport(None).await?;
        let established_at = self.clock.now();
        info!("Session established");

        Ok(SessionHandle {
            transport,
            last_request_end: Some(last_request_end),
            established_at,
            renewals: 0,
            requests: 1,
        })
    }

    /// Replace the handle's session; the pacing floor carries over
    async fn renew(&self, handle: &mut SessionHandle) -> Result<()> {
        let (transport, last_request_end) = self.open_transport(handle.last_request_end).await?;
        handle.transport = transport;
        handle.last_request_end = Some(last_request_end);
        handle.established_at = self.clock.now();
        handle.renewals += 1;
        handle.requests += 1;
        info!(renewals = handle.renewals, "Session renewed");
        Ok(())
    }

    async fn open_transport(
        &self,
        previous_request_end: Option<DateTime<Utc>>,
    ) -> Result<(Box<dyn Transport>, DateTime<Utc>)> {
        let attempts = self.settings.session_attempts;
        let mut last_request_end = previous_request_end;
        let mut last_error = String::from("no session cookie received");

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.settings.backoff(attempt - 1);
                info!(
                    attempt = attempt,
                    max_attempts = attempts,
                    reason = %last_error,
                    wait_secs = delay.as_secs_f64(),
                    "Session retry backoff"
                );
                sleep_or_cancel(self.clock.as_ref(), delay, &self.cancel).await?;
            }

            let transport = self
                .factory
                .create()
                .map_err(|e| AppError::Session(format!("cannot create HTTP transport: {}", e)))?;

            self.wait_for_slot(last_request_end).await?;
            let response = transport.navigate(PORTAL_ROOT_URL).await;
            let finished = self.clock.now();
            last_request_end = Some(finished);

            match response {
                Ok(resp) if transport.has_session_cookie() => {
                    debug!(status = resp.status, attempt = attempt, "Portal navigation returned a session cookie");
                    return Ok((transport, finished));
                }
                Ok(resp) => {
                    last_error = format!("no session cookie (status {})", resp.status);
                    warn!(status = resp.status, attempt = attempt, "Portal navigation returned no session cookie");
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(error = %e, attempt = attempt, "Portal navigation failed");
                }
            }
        }

        Err(AppError::Session(format!(
            "could not establish a session after {} attempt(s): {}",
            attempts, last_error
        )))
    }

    /// Enforce the minimum gap since the previous request on the handle
    async fn wait_for_slot(&self, last_request_end: Option<DateTime<Utc>>) -> Result<()> {
        let Some(last_end) = last_request_end else {
            return Ok(());
        };

        let elapsed = (self.clock.now() - last_end).to_std().unwrap_or(Duration::ZERO);
        if elapsed < self.settings.request_delay {
            sleep_or_cancel(self.clock.as_ref(), self.settings.request_delay - elapsed, &self.cancel).await?;
        }
        Ok(())
    }

    async fn attempt(&self, handle: &mut SessionHandle, url: &str, form: &[(String, String)]) -> Result<AttemptOutcome> {
        self.wait_for_slot(handle.last_request_end).await?;
        let response = handle.transport.post_form(url, form).await;
        handle.last_request_end = Some(self.clock.now());
        handle.requests += 1;

        let outcome = match response {
            Ok(resp) if resp.is_success() => match serde_json::from_str::<Value>(&resp.body) {
                Ok(value) => AttemptOutcome::Json(value),
                // The portal answers an invalid session with its HTML page
                Err(_) => AttemptOutcome::SessionRejected(resp.status),
            },
            Ok(resp) if resp.status == 401 || resp.status == 403 => AttemptOutcome::SessionRejected(resp.status),
            Ok(resp) => AttemptOutcome::Failed {
                status: Some(resp.status),
                reason: format!("HTTP {}", resp.status),
            },
            Err(e) => AttemptOutcome::Failed {
                status: None,
                reason: e.to_string(),
            },
        };
        Ok(outcome)
    }

    /// POST `params` as form data to `endpoint` and return the parsed JSON
    pub async fn call(
        &self,
        handle: &mut SessionHandle,
        endpoint: Endpoint,
        params: &BTreeMap<String, String>,
    ) -> Result<Value> {
        let url = endpoint.url();
        let form: Vec<(String, String)> = params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let max_attempts = self.settings.max_attempts;

        let mut failed_attempts = 0u32;
        let mut last_status: Option<u16> = None;
        let mut renewed = false;

        loop {
            debug!(endpoint = %endpoint, attempt = failed_attempts + 1, "Calling endpoint");

            let reason = match self.attempt(handle, &url, &form).await? {
                AttemptOutcome::Json(value) => return Ok(value),
                AttemptOutcome::SessionRejected(status) if !renewed => {
                    warn!(endpoint = %endpoint, status = status, "Session rejected by portal, renewing");
                    self.renew(handle).await?;
                    renewed = true;
                    continue;
                }
                AttemptOutcome::SessionRejected(status) => {
                    last_status = Some(status);
                    format!("session still rejected after renewal (status {})", status)
                }
                AttemptOutcome::Failed { status, reason } => {
                    last_status = status.or(last_status);
                    reason
                }
            };

            failed_attempts += 1;
            if failed_attempts >= max_attempts {
                warn!(
                    endpoint = %endpoint,
                    attempts = failed_attempts,
                    reason = %reason,
                    "Endpoint retry budget exhausted"
                );
                return Err(AppError::Endpoint {
                    endpoint: endpoint.as_str().to_string(),
                    status: last_status,
                    attempts: failed_attempts,
                });
            }

            let delay = self.settings.backoff(failed_attempts);
            info!(
                endpoint = %endpoint,
                attempt = failed_attempts + 1,
                max_attempts = max_attempts,
                reason = %reason,
                wait_secs = delay.as_secs_f64(),
                "Endpoint retry backoff"
            );
            sleep_or_cancel(self.clock.as_ref(), delay, &self.cancel).await?;
        }
    }
}
