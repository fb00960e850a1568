// Cosmos device app functional test harness
//
// Copyright (C) 2024 Alekos Filini
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use model::apdu::{ApduCommand, ApduResponse};
use model::emulator::{
    frame_apdu, parse_reply_header, REPLY_HEADER_LEN, TAG_CLEAR, TAG_FRAME, TAG_TEXT,
};
use model::FrameError;

use crate::utils::snapshot::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("protocol integrity fault: {0}")]
    Frame(#[from] FrameError),
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait ReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ReadWrite for T {}

async fn read_full<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<(), LinkError> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = stream.read(&mut buf[filled..]).await?;
        if read == 0 {
            return Err(LinkError::ShortRead {
                expected: buf.len(),
                got: filled,
            });
        }
        filled += read;
    }

    Ok(())
}

/// Request/response channel to the app.
///
/// Only one exchange is in flight at any time: the stream is locked for the
/// whole round trip, or for all the frames of a chunked command.
pub struct ApduLink {
    stream: Mutex<Box<dyn ReadWrite>>,
}

impl ApduLink {
    pub fn new<S: ReadWrite + 'static>(stream: S) -> Self {
        ApduLink {
            stream: Mutex::new(Box::new(stream)),
        }
    }

    async fn round_trip(
        stream: &mut Box<dyn ReadWrite>,
        command: &ApduCommand,
    ) -> Result<ApduResponse, LinkError> {
        let apdu = command.serialize();
        log::trace!("> {:02X?}", apdu);
        stream.write_all(&frame_apdu(&apdu)).await?;
        stream.flush().await?;

        let mut header = [0u8; REPLY_HEADER_LEN];
        read_full(stream, &mut header).await?;
        let (ins, remaining) = parse_reply_header(header)?;

        // Data followed by the status word
        let mut raw = vec![0u8; remaining];
        read_full(stream, &mut raw).await?;
        log::trace!("< {:02X} {:02X?}", ins, raw);

        if ins != command.ins {
            return Err(FrameError::InstructionMismatch {
                expected: command.ins,
                got: ins,
            }
            .into());
        }

        Ok(ApduResponse::from_raw(ins, &raw)?)
    }

    /// Exactly one round trip
    pub async fn exchange(&self, command: &ApduCommand) -> Result<ApduResponse, LinkError> {
        let mut stream = self.stream.lock().await;
        Self::round_trip(&mut stream, command).await
    }

    /// Send all the frames of a command in order, keeping the link for the
    /// whole sequence. Stops early if the device refuses one of the frames.
    pub async fn exchange_all(&self, frames: &[ApduCommand]) -> Result<ApduResponse, LinkError> {
        let mut stream = self.stream.lock().await;

        let mut last = None;
        for (i, frame) in frames.iter().enumerate() {
            let response = Self::round_trip(&mut stream, frame).await?;
            if !response.status.is_success() && i + 1 < frames.len() {
                log::debug!("Frame {} refused: {}", i, response.status);
                return Ok(response);
            }
            last = Some(response);
        }

        last.ok_or_else(|| LinkError::Frame(FrameError::ShortFrame(0)))
    }
}

/// Decoder for the screen channel
pub struct ScreenStream<R>(pub R);

impl<R: AsyncRead + Unpin> ScreenStream<R> {
    /// Read one message and apply it to `screen`. Returns whether the screen
    /// visibly changed.
    pub async fn update_screen(&mut self, screen: &Arc<Mutex<Snapshot>>) -> std::io::Result<bool> {
        let tag = self.0.read_u8().await?;
        match tag {
            TAG_FRAME => {
                let width = self.0.read_u16().await?;
                let height = self.0.read_u16().await?;
                let len = self.0.read_u32().await? as usize;
                if len != width as usize * height as usize {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("{} pixels for a {}x{} frame", len, width, height),
                    ));
                }

                let mut pixels = vec![0u8; len];
                self.0.read_exact(&mut pixels).await?;
                log::trace!("< Frame({}x{})", width, height);

                let mut screen = screen.lock().await;
                screen.width = width;
                screen.height = height;
                screen.pixels = pixels;
                Ok(true)
            }
            TAG_TEXT => {
                let len = self.0.read_u16().await? as usize;
                let mut text = vec![0u8; len];
                self.0.read_exact(&mut text).await?;
                let text = String::from_utf8_lossy(&text).to_string();
                log::trace!("< Text({:?})", text);

                screen.lock().await.texts.push(text);
                Ok(false)
            }
            TAG_CLEAR => {
                log::trace!("< Clear");
                screen.lock().await.texts.clear();
                Ok(false)
            }
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown screen message {:02X}", other),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ReadWrite;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Device side of a link: answers every frame with `replies`, in order, and
    /// hands back the frames it received
    pub async fn fake_device<S: ReadWrite>(
        mut stream: S,
        replies: Vec<Vec<u8>>,
    ) -> Vec<Vec<u8>> {
        let mut received = vec![];
        for reply in replies {
            let mut len = [0u8; 4];
            if stream.read_exact(&mut len).await.is_err() {
                break;
            }
            let mut apdu = vec![0u8; u32::from_be_bytes(len) as usize];
            stream.read_exact(&mut apdu).await.unwrap();
            received.push(apdu.clone());

            let (data, sw) = reply.split_at(reply.len() - 2);
            stream
                .write_all(&(data.len() as u32).to_be_bytes())
                .await
                .unwrap();
            // Echo the instruction
            stream.write_all(&apdu[1..2]).await.unwrap();
            stream.write_all(data).await.unwrap();
            stream.write_all(sw).await.unwrap();
        }
        received
    }
}
