// Peer wire: length-prefixed frames over TCP —
//   [4 bytes LE length][payload]
// where payload is a codec::Message (3-byte tag + canonical map).
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec::Message;

const MAX_FRAME: usize = 3 * 1024 * 1024;

pub struct FramedStream {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl FramedStream {
    pub fn new(stream: TcpStream) -> Self {
        FramedStream { stream, buf: Vec::new() }
    }

    pub async fn send(&mut self, msg: &Message) -> std::io::Result<()> {
        let payload = msg.encode();
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        self.stream.write_all(&frame).await
    }

    /// Reads one frame and decodes it. Returns `Ok(None)` on a clean
    /// EOF between frames.
    pub async fn recv(&mut self) -> crate::error::Result<Option<Message>> {
        loop {
            if self.buf.len() >= 4 {
                let len = u32::from_le_bytes(self.buf[..4].try_into().unwrap()) as usize;
                if len > MAX_FRAME {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large").into());
                }
                let frame_len = 4 + len;
                if self.buf.len() >= frame_len {
                    let payload = self.buf[4..frame_len].to_vec();
                    self.buf.drain(..frame_len);
                    return Ok(Some(Message::decode(&payload)?));
                }
            }

            let mut tmp = vec![0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed mid-frame").into())
                };
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }
}
