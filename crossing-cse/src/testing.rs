//! In-memory CSE for exercising the protocol without a network
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::{Value, json};

use crate::config::{CseConfig, RequestConfig};
use crate::record::LightState;
use crate::relay::Relay;
use crate::resource::ResourceKind;
use crate::transport::{Request, Response, Transport, TransportError};
use crate::util::http::Uri;

pub fn test_config() -> CseConfig {
    CseConfig {
        endpoint: Uri::from_static("http://cse.test:8080"),
        cse_base: "id-in".to_owned(),
        originator: "CtrafficLightA".to_owned(),
        application: "intersectionA".to_owned(),
        dashboard_originator: "Cdashboard".to_owned(),
        request: RequestConfig {
            timeout: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            reprovision_interval: Duration::from_millis(50),
        },
    }
}

fn kind_of(resource_type: u16) -> Option<ResourceKind> {
    ResourceKind::PROVISIONING_ORDER
        .into_iter()
        .find(|k| k.resource_type() == resource_type)
}

#[derive(Debug, Clone)]
struct Resource {
    kind: ResourceKind,
    identifier: String,
    name: String,
    parent: String,
}

#[derive(Default)]
struct State {
    resources: Vec<Resource>,
    requests: Vec<Request>,
    notifications: VecDeque<Vec<u8>>,
    next_id: u32,
    creates: usize,
    fail_next: u32,
    fail_creates: bool,
    reject_creates: Option<StatusCode>,
    reject_deletes: Option<StatusCode>,
}

/// Fake CSE keeping its resources in memory.
///
/// Clones share the same state so tests can inspect the requests a
/// component made after handing it the transport.
#[derive(Clone, Default)]
pub struct FakeCse {
    state: Arc<Mutex<State>>,
}

impl FakeCse {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Every request received so far, failed ones included
    pub fn requests(&self) -> Vec<Request> {
        self.with_state(|s| s.requests.clone())
    }

    pub fn requests_with(&self, method: Method) -> Vec<Request> {
        self.with_state(|s| {
            s.requests
                .iter()
                .filter(|r| r.method == method)
                .cloned()
                .collect()
        })
    }

    /// Number of successful creations
    pub fn creates(&self) -> usize {
        self.with_state(|s| s.creates)
    }

    pub fn resource_count(&self) -> usize {
        self.with_state(|s| s.resources.len())
    }

    /// Make the next `n` requests fail as if the CSE was unreachable
    pub fn fail_next(&self, n: u32) {
        self.with_state(|s| s.fail_next = n);
    }

    /// Make every creation fail as if the CSE was unreachable
    pub fn fail_creates(&self, fail: bool) {
        self.with_state(|s| s.fail_creates = fail);
    }

    pub fn reject_creates(&self, status: Option<StatusCode>) {
        self.with_state(|s| s.reject_creates = status);
    }

    pub fn reject_deletes(&self, status: Option<StatusCode>) {
        self.with_state(|s| s.reject_deletes = status);
    }

    /// Queue a raw notification for the next poll of the channel
    pub fn push_notification(&self, body: impl Into<Vec<u8>>) {
        self.with_state(|s| s.notifications.push_back(body.into()));
    }

    /// Queue an update notification for the container
    pub fn notify_update(&self, request_id: &str, rep: Value) {
        let body = json!({
            "m2m:rqp": {
                "op": 5,
                "fr": "/id-in",
                "rqi": request_id,
                "pc": {"m2m:sgn": {"nev": {"rep": {"traffic:trfint": rep}, "net": 1}}}
            }
        });
        self.push_notification(serde_json::to_vec(&body).unwrap());
    }

    fn unavailable() -> TransportError {
        TransportError::Unavailable {
            attempts: 3,
            reason: "connection reset".to_owned(),
        }
    }
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

impl State {
    fn discover(&self, query: &str) -> Response {
        let ty = query_param(query, "ty").and_then(|t| t.parse::<u16>().ok());
        let rn = query_param(query, "rn");
        let pi = query_param(query, "pi");

        let found: Vec<Value> = self
            .resources
            .iter()
            .filter(|r| Some(r.kind.resource_type()) == ty)
            .filter(|r| rn.is_none_or(|rn| r.name == rn))
            .filter(|r| pi.is_none_or(|pi| r.parent == pi))
            .map(|r| Value::String(format!("id-in/{}", r.identifier)))
            .collect();

        Response::new(
            StatusCode::OK,
            serde_json::to_vec(&json!({ "m2m:uril": found })).unwrap(),
        )
    }

    fn create(&mut self, request: &Request, resource_type: u16) -> Result<Response, TransportError> {
        if self.fail_creates {
            return Err(FakeCse::unavailable());
        }
        if let Some(status) = self.reject_creates {
            return Ok(Response::new(status, br#"{"m2m:dbg":"rejected"}"#.to_vec()));
        }
        let Some(kind) = kind_of(resource_type) else {
            return Ok(Response::new(StatusCode::BAD_REQUEST, Vec::new()));
        };

        let body: Value = serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
        let name = body[kind.envelope()]["rn"]
            .as_str()
            .unwrap_or_default()
            .to_owned();

        self.next_id += 1;
        let prefix = kind.envelope().rsplit(':').next().unwrap_or_default();
        let identifier = format!("c{prefix}{}", self.next_id);
        self.resources.push(Resource {
            kind,
            identifier: identifier.clone(),
            name: name.clone(),
            parent: request.path.clone(),
        });
        self.creates += 1;

        let response = json!({ kind.envelope(): {
            kind.id_field(): identifier,
            "rn": name,
            "pi": request.path,
            "ty": resource_type,
        }});
        Ok(Response::new(StatusCode::CREATED, serde_json::to_vec(&response).unwrap()))
    }

    fn handle(&mut self, request: &Request) -> Result<Response, TransportError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(FakeCse::unavailable());
        }

        let is_channel = request.path.ends_with("/pcu");
        let method = &request.method;
        let response = if *method == Method::GET && is_channel {
            match self.notifications.pop_front() {
                Some(body) => Response::new(StatusCode::OK, body),
                None => Response::new(StatusCode::GATEWAY_TIMEOUT, Vec::new()),
            }
        } else if *method == Method::GET {
            match &request.query {
                Some(query) => self.discover(query),
                None => Response::new(StatusCode::NOT_FOUND, Vec::new()),
            }
        } else if *method == Method::POST {
            match request.resource_type {
                Some(ty) => return self.create(request, ty),
                None if is_channel => Response::new(StatusCode::OK, Vec::new()),
                None => Response::new(StatusCode::BAD_REQUEST, Vec::new()),
            }
        } else if *method == Method::PUT {
            if self.resources.iter().any(|r| r.identifier == request.path) {
                Response::new(StatusCode::OK, request.body.clone().unwrap_or_default())
            } else {
                Response::new(StatusCode::NOT_FOUND, Vec::new())
            }
        } else if *method == Method::DELETE {
            if let Some(status) = self.reject_deletes {
                return Ok(Response::new(status, br#"{"m2m:dbg":"rejected"}"#.to_vec()));
            }
            let before = self.resources.len();
            self.resources.retain(|r| r.identifier != request.path);
            if self.resources.len() < before {
                Response::new(StatusCode::OK, Vec::new())
            } else {
                Response::new(StatusCode::NOT_FOUND, Vec::new())
            }
        } else {
            Response::new(StatusCode::METHOD_NOT_ALLOWED, Vec::new())
        };
        Ok(response)
    }
}

/// How long an empty polling channel holds a poll before answering 504
const HOLD_WINDOW: Duration = Duration::from_millis(5);

#[async_trait]
impl Transport for FakeCse {
    async fn request(&mut self, request: Request) -> Result<Response, TransportError> {
        let held = self.with_state(|s| {
            request.method == Method::GET
                && request.path.ends_with("/pcu")
                && s.notifications.is_empty()
                && s.fail_next == 0
        });
        if held {
            tokio::time::sleep(HOLD_WINDOW).await;
        }

        self.with_state(|s| {
            s.requests.push(request.clone());
            s.handle(&request)
        })
    }
}

/// Relay remembering every rendered pair of states
#[derive(Clone, Default)]
pub struct RecordingRelay {
    rendered: Arc<Mutex<Vec<(LightState, LightState)>>>,
}

impl RecordingRelay {
    pub fn rendered(&self) -> Vec<(LightState, LightState)> {
        self.rendered.lock().unwrap().clone()
    }
}

impl Relay for RecordingRelay {
    fn relay(&self, light1: LightState, light2: LightState) {
        self.rendered.lock().unwrap().push((light1, light2));
    }
}
