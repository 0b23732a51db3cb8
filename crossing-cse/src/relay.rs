use std::sync::Arc;

use crate::record::{Light, LightState};

/// Renders light state on the local hardware
pub trait Relay: Send + Sync {
    /// Show the given states. [`LightState::None`] leaves a light as is.
    fn relay(&self, light1: LightState, light2: LightState);
}

impl<R: Relay + ?Sized> Relay for Arc<R> {
    fn relay(&self, light1: LightState, light2: LightState) {
        (**self).relay(light1, light2)
    }
}

/// Link status of the peer board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLink {
    Connected,
    Disconnected,
}

/// Event raised by the local hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEvent {
    /// Someone at the intersection changed a light
    Override { target: Light, state: LightState },
    /// The peer board connected or went away
    Peer(PeerLink),
}
