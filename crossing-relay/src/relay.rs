use crossing_cse::{LightState, LocalEvent, Relay};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::frame::{FrameParser, RelayError, render_frames};

/// Sending side of the relay, handed to the session and notification loop
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<(LightState, LightState)>,
}

impl RelayHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(LightState, LightState)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Relay for RelayHandle {
    fn relay(&self, light1: LightState, light2: LightState) {
        if self.tx.send((light1, light2)).is_err() {
            warn!("relay stopped, cannot show {light1}/{light2}");
        }
    }
}

/// Exchange frames with the peer board over `reader`/`writer`.
///
/// Rendered states arriving on `renders` are written out; frames read from
/// the board are forwarded to `events`. Returns once `renders` closes or
/// writing fails.
pub async fn start_relay<Rd, Wr>(
    mut reader: Rd,
    mut writer: Wr,
    mut renders: mpsc::UnboundedReceiver<(LightState, LightState)>,
    events: mpsc::Sender<LocalEvent>,
) -> Result<(), RelayError>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut parser = FrameParser::new();
    let mut buf = [0u8; 64];
    let mut reading = true;

    loop {
        tokio::select! {
            render = renders.recv() => {
                let Some((light1, light2)) = render else {
                    break;
                };
                let frames = render_frames(light1, light2);
                if frames.is_empty() {
                    continue;
                }
                debug!("showing {light1}/{light2}");
                writer.write_all(&frames).await?;
                writer.flush().await?;
            }
            read = reader.read(&mut buf), if reading => {
                let n = match read {
                    Ok(0) => {
                        info!("peer board stream closed");
                        reading = false;
                        continue;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("failed to read from peer board: {e}");
                        reading = false;
                        continue;
                    }
                };

                for byte in &buf[..n] {
                    match parser.push(*byte) {
                        Ok(Some(event)) => {
                            if events.send(event).await.is_err() {
                                debug!("nobody listens for local events");
                                reading = false;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("dropping frame: {e}"),
                    }
                }
            }
        }
    }

    Ok(())
}
