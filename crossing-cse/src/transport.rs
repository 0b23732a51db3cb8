use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{Span, field, instrument, warn};

use crate::config::CseConfig;
use crate::util::crypto::{ALPHA_NUM, pseudorandom_string};
use crate::util::http::Uri;

/// Number of connection attempts before a request is given up
pub const MAX_ATTEMPTS: u32 = 3;

/// oneM2M release version indicator sent with every request
const RELEASE_VERSION: &str = "3";

#[derive(Debug, Error)]
pub enum TransportError {
    /// The CSE could not be reached, even after reconnecting
    #[error("CSE unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// The request failed for a reason that reconnecting will not fix
    #[error("request failed: {0}")]
    Request(String),
}

/// A single oneM2M request to the CSE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the CSE host, without the leading `/`
    pub path: String,
    pub query: Option<String>,
    /// Resource type code for create requests (`Content-Type: ...;ty=N`)
    pub resource_type: Option<u16>,
    /// Request identifier (`X-M2M-RI`)
    pub request_id: String,
    pub body: Option<Vec<u8>>,
    /// Overrides the transport default timeout
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path: String = path.into();
        Self {
            method,
            path: path.trim_start_matches('/').to_owned(),
            query: None,
            resource_type: None,
            request_id: pseudorandom_string(ALPHA_NUM, 12),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(self, query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..self
        }
    }

    pub fn with_body(self, body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            ..self
        }
    }

    pub fn with_resource_type(self, resource_type: u16) -> Self {
        Self {
            resource_type: Some(resource_type),
            ..self
        }
    }

    pub fn with_request_id(self, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    fn content_type(&self) -> String {
        match self.resource_type {
            Some(ty) => format!("application/json;ty={ty}"),
            None => "application/json".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Request/response exchange with the CSE host.
///
/// Implementations own a single connection and handle one request at a
/// time, reconnecting internally up to [`MAX_ATTEMPTS`] times on
/// connection-level failures.
#[async_trait]
pub trait Transport: Send {
    async fn request(&mut self, request: Request) -> Result<Response, TransportError>;
}

/// Outcome of a single connection attempt
#[derive(Debug)]
pub enum AttemptError {
    /// Connection reset, timeout or not connected; worth reconnecting
    Reconnect(String),
    /// Anything else; surfaced immediately
    Fatal(String),
}

/// Run `attempt` until it succeeds, fails with a non-reconnectable error, or
/// `max_attempts` is exhausted.
///
/// Returns the value together with the number of reconnects it took.
pub async fn with_reconnect<F, Fut, T>(
    max_attempts: u32,
    mut attempt: F,
) -> Result<(T, u32), TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut last_reason = String::new();
    for n in 0..max_attempts {
        match attempt(n).await {
            Ok(value) => return Ok((value, n)),
            Err(AttemptError::Fatal(reason)) => return Err(TransportError::Request(reason)),
            Err(AttemptError::Reconnect(reason)) => {
                warn!("attempt {} of {max_attempts} failed: {reason}", n + 1);
                last_reason = reason;
            }
        }
    }

    Err(TransportError::Unavailable {
        attempts: max_attempts,
        reason: last_reason,
    })
}

/// Counters for requests performed through an [`HttpTransport`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Requests that got a response, whatever the status
    pub success_count: u64,
    /// Requests that ended in a transport error
    pub error_count: u64,
    /// Reconnects performed, including those of successful requests
    pub reconnect_count: u64,
}

/// HTTP binding of the oneM2M protocol over [reqwest]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Uri,
    originator: String,
    timeout: Duration,
    max_attempts: u32,
    metrics: TransportMetrics,
}

impl HttpTransport {
    pub fn new(config: &CseConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            originator: config.originator.clone(),
            timeout: config.request.timeout,
            max_attempts: MAX_ATTEMPTS,
            metrics: TransportMetrics::default(),
        }
    }

    pub fn metrics(&self) -> TransportMetrics {
        self.metrics
    }
}

/// Connection-level failures that a fresh connection may fix
fn is_reconnectable(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
            );
        }
        source = cause.source();
    }
    false
}

fn classify(err: reqwest::Error) -> AttemptError {
    if is_reconnectable(&err) {
        AttemptError::Reconnect(err.to_string())
    } else {
        AttemptError::Fatal(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip_all, fields(method = %request.method, path = %request.path, status = field::Empty), err(level = "warn"))]
    async fn request(&mut self, request: Request) -> Result<Response, TransportError> {
        let uri = Uri::from_parts(
            self.endpoint.clone(),
            &request.path,
            request.query.as_deref(),
        )
        .map_err(|e| TransportError::Request(e.to_string()))?
        .to_string();
        let timeout = request.timeout.unwrap_or(self.timeout);

        let client = &self.client;
        let originator = &self.originator;
        let result = with_reconnect(self.max_attempts, |_| {
            let mut builder = client
                .request(request.method.clone(), &uri)
                .timeout(timeout)
                .header("Accept", "application/json")
                .header("Content-Type", request.content_type())
                .header("X-M2M-Origin", originator)
                .header("X-M2M-RI", &request.request_id)
                .header("X-M2M-RVI", RELEASE_VERSION);
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            async move {
                let response = builder.send().await.map_err(classify)?;
                let status = response.status();
                let body = response.bytes().await.map_err(classify)?;
                Ok::<_, AttemptError>(Response::new(status, body.to_vec()))
            }
        })
        .await;

        match result {
            Ok((response, reconnects)) => {
                self.metrics.success_count += 1;
                self.metrics.reconnect_count += reconnects as u64;
                Span::current().record("status", field::display(response.status));
                Ok(response)
            }
            Err(err) => {
                self.metrics.error_count += 1;
                if let TransportError::Unavailable { attempts, .. } = &err {
                    self.metrics.reconnect_count += (*attempts as u64).saturating_sub(1);
                }
                Err(err)
            }
        }
    }
}

/// Shared handle to the single CSE transport.
///
/// The mutex is the transport lock: whoever holds the guard owns the
/// connection from request construction until the response is fully
/// decoded. Retry loops above the transport must re-acquire per attempt.
pub struct Cse<T> {
    transport: Arc<Mutex<T>>,
    config: Arc<CseConfig>,
}

impl<T> Clone for Cse<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Transport> Cse<T> {
    pub fn new(transport: T, config: CseConfig) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CseConfig {
        &self.config
    }

    /// Acquire the transport lock
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.transport.lock().await
    }
}
