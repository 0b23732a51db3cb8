use std::io;

use crossing_cse::{Light, LightState, LocalEvent, PeerLink};
use thiserror::Error;
use tracing::debug;

/// Longest command accepted between `!` and `;`
pub const MAX_COMMAND_LEN: usize = 30;

const START: u8 = b'!';
const END: u8 = b';';

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("command longer than {MAX_COMMAND_LEN} bytes dropped")]
    Oversized,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Frame telling the peer board to show `state` on `light`.
///
/// [`LightState::None`] has no frame.
pub fn encode_frame(light: Light, state: LightState) -> Option<Vec<u8>> {
    if state.is_none() {
        return None;
    }
    let index = match light {
        Light::Light1 => 1,
        Light::Light2 => 2,
    };
    Some(format!("!{}{index};", state.as_str()).into_bytes())
}

/// Frames rendering both lights, light 1 first
pub fn render_frames(light1: LightState, light2: LightState) -> Vec<u8> {
    [(Light::Light1, light1), (Light::Light2, light2)]
        .into_iter()
        .filter_map(|(light, state)| encode_frame(light, state))
        .flatten()
        .collect()
}

fn parse_command(command: &str) -> Result<Option<LocalEvent>, RelayError> {
    match command {
        "C" => return Ok(Some(LocalEvent::Peer(PeerLink::Connected))),
        "D" => return Ok(Some(LocalEvent::Peer(PeerLink::Disconnected))),
        "SCAN_START" | "SCAN_STOP" => {
            debug!("peer board reports {command}");
            return Ok(None);
        }
        _ => {}
    }

    let unknown = || RelayError::UnknownCommand(command.to_owned());
    let (name, index) = command.split_at_checked(command.len().saturating_sub(1)).ok_or_else(unknown)?;
    let target = match index {
        "1" => Light::Light1,
        "2" => Light::Light2,
        _ => return Err(unknown()),
    };
    let state = LightState::from(name);
    if state.is_none() {
        return Err(unknown());
    }

    Ok(Some(LocalEvent::Override { target, state }))
}

/// Incremental parser for inbound frames.
///
/// Bytes outside of a frame are ignored.
#[derive(Debug, Default)]
pub struct FrameParser {
    command: Vec<u8>,
    started: bool,
    overrun: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single byte, returning the event of a completed frame
    pub fn push(&mut self, byte: u8) -> Result<Option<LocalEvent>, RelayError> {
        if !self.started {
            if byte == START {
                self.started = true;
                self.overrun = false;
                self.command.clear();
            }
            return Ok(None);
        }

        if byte != END {
            if self.command.len() < MAX_COMMAND_LEN {
                self.command.push(byte);
            } else {
                self.overrun = true;
            }
            return Ok(None);
        }

        self.started = false;
        if self.overrun {
            return Err(RelayError::Oversized);
        }
        let command = String::from_utf8_lossy(&self.command).into_owned();
        parse_command(&command)
    }
}
