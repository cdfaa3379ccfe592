//! Scripted in-memory transport used by unit tests

use crate::constants::API_BASE_URL;
use crate::models::Endpoint;
use crate::services::clock::{Clock, ManualClock};
use crate::services::session::{Transport, TransportError, TransportFactory, TransportResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One canned reply
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(TransportResponse),
    Error(String),
}

impl Scripted {
    pub fn json(value: Value) -> Self {
        Self::body(200, &value.to_string())
    }

    pub fn status(status: u16) -> Self {
        Self::body(status, "")
    }

    pub fn body(status: u16, body: &str) -> Self {
        Scripted::Reply(TransportResponse {
            status,
            body: body.to_string(),
        })
    }

    pub fn transport_error() -> Self {
        Scripted::Error("connection reset".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PostRecord {
    pub endpoint: String,
    pub form: Vec<(String, String)>,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct ScriptState {
    queues: HashMap<String, VecDeque<Scripted>>,
    defaults: HashMap<String, Scripted>,
    posts: Vec<PostRecord>,
    request_starts: Vec<DateTime<Utc>>,
    transports_created: usize,
    no_cookie: bool,
    latency: Duration,
    cancel_on: Option<(String, CancellationToken)>,
}

/// Factory whose transports share one script and one request log
pub struct ScriptedFactory {
    clock: Arc<ManualClock>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedFactory {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    /// Queue a reply for the next call to `endpoint`
    pub fn push(&self, endpoint: Endpoint, reply: Scripted) {
        let mut state = self.state.lock().unwrap();
        state.queues.entry(endpoint.as_str().to_string()).or_default().push_back(reply);
    }

    /// Reply used whenever the queue for `endpoint` is empty
    pub fn set_default(&self, endpoint: Endpoint, reply: Scripted) {
        let mut state = self.state.lock().unwrap();
        state.defaults.insert(endpoint.as_str().to_string(), reply);
    }

    pub fn set_cookie_on_navigate(&self, enabled: bool) {
        self.state.lock().unwrap().no_cookie = !enabled;
    }

    /// Simulated duration of every request
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Cancel `token` as soon as `endpoint` is posted
    pub fn cancel_on(&self, endpoint: Endpoint, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on = Some((endpoint.as_str().to_string(), token));
    }

    pub fn transports_created(&self) -> usize {
        self.state.lock().unwrap().transports_created
    }

    pub fn posts(&self) -> Vec<PostRecord> {
        self.state.lock().unwrap().posts.clone()
    }

    /// Endpoint names of all posts, in call order
    pub fn posted_endpoints(&self) -> Vec<String> {
        self.posts().into_iter().map(|p| p.endpoint).collect()
    }

    /// Start instants of every request, navigations included
    pub fn request_starts(&self) -> Vec<DateTime<Utc>> {
        self.state.lock().unwrap().request_starts.clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self) -> Result<Box<dyn Transport>, TransportError> {
        self.state.lock().unwrap().transports_created += 1;
        Ok(Box::new(ScriptedTransport {
            clock: self.clock.clone(),
            state: self.state.clone(),
            has_cookie: Mutex::new(false),
        }))
    }
}

struct ScriptedTransport {
    clock: Arc<ManualClock>,
    state: Arc<Mutex<ScriptState>>,
    has_cookie: Mutex<bool>,
}

impl ScriptedTransport {
    fn begin(&self) -> Duration {
        let mut state = self.state.lock().unwrap();
        state.request_starts.push(self.clock.now());
        state.latency
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn navigate(&self, _url: &str) -> Result<TransportResponse, TransportError> {
        let latency = self.begin();
        self.clock.advance(latency);
        let grant = !self.state.lock().unwrap().no_cookie;
        *self.has_cookie.lock().unwrap() = grant;
        Ok(TransportResponse {
            status: 200,
            body: "<html>portal</html>".to_string(),
        })
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<TransportResponse, TransportError> {
        let latency = self.begin();
        let endpoint = url.strip_prefix(API_BASE_URL).unwrap_or(url).to_string();

        let reply = {
            let mut state = self.state.lock().unwrap();
            state.posts.push(PostRecord {
                endpoint: endpoint.clone(),
                form: form.to_vec(),
                at: self.clock.now(),
            });
            if let Some((trigger, token)) = &state.cancel_on {
                if *trigger == endpoint {
                    token.cancel();
                }
            }
            let queued = state.queues.get_mut(&endpoint).and_then(|q| q.pop_front());
            queued
                .or_else(|| state.defaults.get(&endpoint).cloned())
                .unwrap_or_else(|| Scripted::status(404))
        };

        self.clock.advance(latency);
        match reply {
            Scripted::Reply(response) => Ok(response),
            Scripted::Error(message) => Err(TransportError(message)),
        }
    }

    fn has_session_cookie(&self) -> bool {
        *self.has_cookie.lock().unwrap()
    }
}

/// Wall time derived from tokio's timer, for tests on a paused runtime
///
/// Unlike [`ManualClock`], concurrent sleeps race by deadline.
pub struct TokioClock {
    start: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            origin: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.start + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Transport that is never called
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn navigate(&self, _url: &str) -> Result<TransportResponse, TransportError> {
        Err(TransportError("null transport".to_string()))
    }

    async fn post_form(&self, _url: &str, _form: &[(String, String)]) -> Result<TransportResponse, TransportError> {
        Err(TransportError("null transport".to_string()))
    }

    fn has_session_cookie(&self) -> bool {
        false
    }
}
