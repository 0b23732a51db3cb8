use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::{self, Acknowledgement, DecodeError};
use crate::record::{FlexContainerRecord, FlexFragment};
use crate::relay::Relay;
use crate::resource::{Handles, ResourceKind};
use crate::sync::SyncEngine;
use crate::transport::{Cse, Request, Transport, TransportError};

/// Where the notification loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingNotification,
    Relaying,
    Acknowledging,
}

/// Update of the FlexContainer delivered through the polling channel
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub request_id: String,
    /// Primitive content (`pc`) as received, echoed in the acknowledgement
    pub content: Value,
    pub fragment: FlexFragment,
}

impl Notification {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let rqp = codec::decode(body)?.object("m2m:rqp")?;
        let request_id = rqp.string("rqi")?.to_owned();
        let content = rqp
            .value("pc")
            .cloned()
            .ok_or_else(|| DecodeError::FieldMissing("pc".to_owned()))?;
        let fragment = rqp
            .path(&["pc", "m2m:sgn", "nev", "rep", "traffic:trfint"])?
            .parse()?;

        Ok(Self {
            request_id,
            content,
            fragment,
        })
    }
}

/// Result of a single poll of the channel
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The polling channel is not known yet
    NotProvisioned,
    /// The CSE hold window elapsed without a notification
    Timeout,
    /// The CSE answered the poll with an error status
    Rejected(StatusCode),
    /// Something arrived that was not a container notification. It is not
    /// acknowledged.
    Discarded(DecodeError),
    Delivered {
        request_id: String,
        record: FlexContainerRecord,
        acknowledged: bool,
    },
}

/// Exponential back-off between `min_interval` and `max_backoff`
#[derive(Debug, Clone)]
struct Backoff {
    min_interval: Duration,
    max_backoff: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min_interval: Duration, max_backoff: Duration) -> Self {
        Self {
            min_interval,
            max_backoff,
            current: min_interval,
        }
    }

    fn reset(&mut self) {
        self.current = self.min_interval;
    }

    fn next_wait(&mut self) -> Duration {
        self.current = std::cmp::min(self.current * 2, self.max_backoff);
        self.current
    }
}

/// Long-polls the device's polling channel and applies the container
/// updates it delivers
pub struct NotificationLoop<T, R> {
    cse: Cse<T>,
    sync: Arc<SyncEngine<T>>,
    handles: watch::Receiver<Handles>,
    relay: R,
    state: watch::Sender<LoopState>,
}

impl<T: Transport, R: Relay> NotificationLoop<T, R> {
    pub fn new(
        cse: Cse<T>,
        sync: Arc<SyncEngine<T>>,
        handles: watch::Receiver<Handles>,
        relay: R,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            cse,
            sync,
            handles,
            relay,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LoopState) {
        trace!("notification loop {state:?}");
        self.state.send_replace(state);
    }

    /// Wait for one notification and handle it.
    ///
    /// The transport stays locked from the poll until the acknowledgement is
    /// sent, so local pushes never interleave with applying a notification.
    #[instrument(level = "debug", skip_all, err(level = "warn"))]
    pub async fn poll_once(&self) -> Result<PollOutcome, TransportError> {
        let Some(channel) = self
            .handles
            .borrow()
            .id(ResourceKind::PollingChannel)
            .map(str::to_owned)
        else {
            self.set_state(LoopState::Idle);
            return Ok(PollOutcome::NotProvisioned);
        };
        let path = format!("{channel}/pcu");

        self.set_state(LoopState::AwaitingNotification);
        let mut transport = self.cse.lock().await;
        let poll = Request::get(path.clone()).with_timeout(self.cse.config().request.poll_timeout);
        let response = match transport.request(poll).await {
            Ok(response) => response,
            Err(e) => {
                self.set_state(LoopState::Idle);
                return Err(e);
            }
        };

        if response.status == StatusCode::GATEWAY_TIMEOUT {
            return Ok(PollOutcome::Timeout);
        }
        if !response.status.is_success() {
            return Ok(PollOutcome::Rejected(response.status));
        }

        let notification = match Notification::decode(&response.body) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("discarding notification: {e}");
                return Ok(PollOutcome::Discarded(e));
            }
        };

        self.set_state(LoopState::Relaying);
        let record = self.sync.apply_notification(&notification.fragment);
        info!(
            "notification {}: light1={} light2={} connectivity={}",
            notification.request_id, record.light1, record.light2, record.connectivity
        );
        self.relay.relay(record.light1, record.light2);

        self.set_state(LoopState::Acknowledging);
        let acknowledged = self.acknowledge(&mut transport, &path, &notification).await;
        self.set_state(LoopState::AwaitingNotification);

        Ok(PollOutcome::Delivered {
            request_id: notification.request_id,
            record,
            acknowledged,
        })
    }

    /// Echo the notification back to the CSE. Failures are only logged.
    async fn acknowledge(&self, transport: &mut T, path: &str, notification: &Notification) -> bool {
        let body = match Acknowledgement::new(&notification.request_id, notification.content.clone())
            .encode()
        {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to encode acknowledgement: {e}");
                return false;
            }
        };

        let request = Request::post(path, body).with_request_id(notification.request_id.clone());
        match transport.request(request).await {
            Ok(response) if response.status.is_success() => {
                debug!("acknowledged {}", notification.request_id);
                true
            }
            Ok(response) => {
                warn!(
                    "acknowledgement of {} rejected: {}",
                    notification.request_id, response.status
                );
                false
            }
            Err(e) => {
                warn!("failed to acknowledge {}: {e}", notification.request_id);
                false
            }
        }
    }

    /// Poll forever, backing off while the CSE cannot be reached
    pub async fn run(self) {
        let config = &self.cse.config().request;
        let mut backoff = Backoff::new(config.min_interval, config.max_backoff);

        loop {
            let wait = match self.poll_once().await {
                Ok(PollOutcome::Timeout | PollOutcome::Delivered { .. } | PollOutcome::Discarded(_)) => {
                    backoff.reset();
                    None
                }
                Ok(PollOutcome::NotProvisioned) => Some(backoff.next_wait()),
                Ok(PollOutcome::Rejected(status)) => {
                    warn!("polling channel returned {status}");
                    Some(backoff.next_wait())
                }
                // already logged by poll_once
                Err(_) => Some(backoff.next_wait()),
            };

            if let Some(wait) = wait {
                self.set_state(LoopState::Idle);
                debug!("next poll in {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Spawn the notification loop
pub fn start_notifications<T, R>(notifications: NotificationLoop<T, R>) -> JoinHandle<()>
where
    T: Transport + 'static,
    R: Relay + 'static,
{
    tokio::spawn(notifications.run())
}
