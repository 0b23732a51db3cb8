/*
This crate is home to everything related to the oneM2M CSE that manages the
traffic lights of this intersection.

It provides the transport used to reach the CSE, the codec for its resource
documents, idempotent provisioning of the resources the device needs, and
the two directions of light state synchronization: pushing local changes
to the FlexContainer and receiving notifications through the polling channel.
*/

mod codec;
mod config;
mod directory;
mod notify;
mod record;
mod relay;
mod resource;
mod session;
mod sync;
mod transport;

#[cfg(test)]
mod testing;

pub use codec::{DecodeError, EncodeError, Fields, MAX_BODY_SIZE, decode, encode};
pub use config::{CseConfig, RequestConfig};
pub use directory::{Directory, ProvisionError, Provisioned};
pub use notify::{LoopState, Notification, NotificationLoop, PollOutcome, start_notifications};
pub use record::{FlexContainerRecord, FlexFragment, Light, LightState};
pub use relay::{LocalEvent, PeerLink, Relay};
pub use resource::{Handles, ResourceHandle, ResourceKind};
pub use session::{LinkEvent, Session, start_session};
pub use sync::{SyncEngine, SyncError};
pub use transport::{
    Cse, HttpTransport, Request, Response, Transport, TransportError, TransportMetrics,
};

use crossing_util as util;
