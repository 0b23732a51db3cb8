//! Byte-stream link to the board driving the light heads.
//!
//! Commands in both directions are framed as `!<command>;`.

mod frame;
mod relay;

pub use frame::{FrameParser, MAX_COMMAND_LEN, RelayError, encode_frame, render_frames};
pub use relay::{RelayHandle, start_relay};
