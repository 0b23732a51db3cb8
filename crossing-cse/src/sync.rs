use http::StatusCode;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::codec::{self, EncodeError};
use crate::record::{FlexContainerRecord, FlexFragment, Light, LightState};
use crate::resource::{Handles, ResourceKind};
use crate::transport::{Cse, Request, Transport, TransportError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("the flex container has not been provisioned yet")]
    NotProvisioned,

    #[error(transparent)]
    Unavailable(#[from] TransportError),

    #[error("CSE rejected the update: {0}")]
    Rejected(StatusCode),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Owner of the local copy of the shared FlexContainer
pub struct SyncEngine<T> {
    cse: Cse<T>,
    handles: watch::Receiver<Handles>,
    record: watch::Sender<FlexContainerRecord>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(cse: Cse<T>, handles: watch::Receiver<Handles>) -> Self {
        let (record, _) = watch::channel(FlexContainerRecord::default());
        Self {
            cse,
            handles,
            record,
        }
    }

    pub fn record(&self) -> FlexContainerRecord {
        self.record.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlexContainerRecord> {
        self.record.subscribe()
    }

    pub fn is_provisioned(&self) -> bool {
        self.handles.borrow().is_complete()
    }

    /// Change a light locally. Returns true if the state changed.
    pub fn set_light(&self, target: Light, state: LightState) -> bool {
        self.record.send_if_modified(|record| {
            if state.is_none() || record.light(target) == state {
                return false;
            }
            record.set_light(target, state);
            true
        })
    }

    /// Change the connectivity tag locally. Returns true if it changed.
    pub fn set_connectivity(&self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        self.record.send_if_modified(|record| {
            if record.connectivity == tag {
                return false;
            }
            record.connectivity = tag;
            true
        })
    }

    /// Switch both lights to red
    pub fn fail_safe(&self) -> bool {
        self.record.send_if_modified(|record| {
            let changed = record.light1 != LightState::Red || record.light2 != LightState::Red;
            record.light1 = LightState::Red;
            record.light2 = LightState::Red;
            changed
        })
    }

    /// Merge an update received from the CSE into the local record
    pub fn apply_notification(&self, fragment: &FlexFragment) -> FlexContainerRecord {
        self.record.send_if_modified(|record| record.apply(fragment));
        self.record()
    }

    /// PUT `record` while the caller holds the transport lock
    pub(crate) async fn push_locked(
        &self,
        transport: &mut T,
        record: &FlexContainerRecord,
    ) -> Result<(), SyncError> {
        let flex = self
            .handles
            .borrow()
            .id(ResourceKind::FlexContainer)
            .map(str::to_owned)
            .ok_or(SyncError::NotProvisioned)?;

        let body = codec::encode(ResourceKind::FlexContainer, record)?;
        let response = transport.request(Request::put(flex, body)).await?;
        if !response.status.is_success() {
            return Err(SyncError::Rejected(response.status));
        }
        debug!("pushed {record:?}");
        Ok(())
    }

    /// Replace the FlexContainer content with `record`
    #[instrument(skip_all, err(level = "warn"))]
    pub async fn push(&self, record: &FlexContainerRecord) -> Result<(), SyncError> {
        let mut transport = self.cse.lock().await;
        self.push_locked(&mut transport, record).await
    }

    /// Push the local record as it is once the transport is ours
    #[instrument(skip_all, err(level = "warn"))]
    pub async fn sync(&self) -> Result<(), SyncError> {
        let mut transport = self.cse.lock().await;
        let record = self.record();
        self.push_locked(&mut transport, &record).await
    }
}
