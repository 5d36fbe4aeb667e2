//! RFC 6455 frame codec (C8): parse loop over a connection's read half and
//! the mirrored serializer, per spec.md §4.7.

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CloseCode, WsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_u8(b: u8) -> Result<Self, WsError> {
        match b {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(WsError::Protocol(format!("unknown opcode {other:#x}"))),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary | Opcode::Continuation)
    }
}

/// A single decoded frame. `mask` is only meaningful for frames read off
/// the wire (client→server); frames built for sending are always
/// server→client and therefore unmasked.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

const MAX_CONTROL_PAYLOAD: usize = 125;

impl Frame {
    pub fn data(fin: bool, opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { fin, rsv1: false, opcode, payload }
    }

    pub fn text(payload: Vec<u8>) -> Self {
        Self { fin: true, rsv1: false, opcode: Opcode::Text, payload }
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Self { fin: true, rsv1: false, opcode: Opcode::Binary, payload }
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Self { fin: true, rsv1: false, opcode: Opcode::Ping, payload }
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self { fin: true, rsv1: false, opcode: Opcode::Pong, payload }
    }

    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = (code as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        Self { fin: true, rsv1: false, opcode: Opcode::Close, payload }
    }

    pub fn with_rsv1(mut self, rsv1: bool) -> Self {
        self.rsv1 = rsv1;
        self
    }

    /// Parse one frame off `reader`. Per spec.md §4.7: client frames MUST
    /// be masked (unmasked ⇒ protocol error), control frames MUST be
    /// unfragmented and ≤125 bytes, RSV2/RSV3 MUST always be 0.
    pub async fn read<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Frame, WsError> {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await.map_err(|e| WsError::Protocol(e.to_string()))?;

        let fin = head[0] & 0x80 != 0;
        let rsv1 = head[0] & 0x40 != 0;
        let rsv2 = head[0] & 0x20 != 0;
        let rsv3 = head[0] & 0x10 != 0;
        let opcode = Opcode::from_u8(head[0] & 0x0F)?;

        if rsv2 || rsv3 {
            return Err(WsError::Protocol("RSV2/RSV3 must be zero".into()));
        }

        let masked = head[1] & 0x80 != 0;
        if !masked {
            return Err(WsError::Protocol("client frames must be masked".into()));
        }

        let mut len = (head[1] & 0x7F) as u64;
        if len == 126 {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await.map_err(|e| WsError::Protocol(e.to_string()))?;
            len = u16::from_be_bytes(ext) as u64;
        } else if len == 127 {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await.map_err(|e| WsError::Protocol(e.to_string()))?;
            len = u64::from_be_bytes(ext);
        }

        if opcode.is_control() && (!fin || len > MAX_CONTROL_PAYLOAD as u64) {
            return Err(WsError::Protocol("control frame must be final and <=125 bytes".into()));
        }

        let mut mask_key = [0u8; 4];
        reader.read_exact(&mut mask_key).await.map_err(|e| WsError::Protocol(e.to_string()))?;

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await.map_err(|e| WsError::Protocol(e.to_string()))?;
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask_key[i % 4];
        }

        Ok(Frame { fin, rsv1, opcode, payload })
    }

    /// Serialize for sending to the client. Server-to-client frames are
    /// always unmasked (spec.md §4.7).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 10);
        let mut first = self.opcode.to_u8();
        if self.fin {
            first |= 0x80;
        }
        if self.rsv1 {
            first |= 0x40;
        }
        out.push(first);

        let len = self.payload.len();
        if len < 126 {
            out.push(len as u8);
        } else if len <= u16::MAX as usize {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        out.extend_from_slice(&self.payload);
        out
    }

    pub fn close_code_and_reason(&self) -> (Option<u16>, String) {
        if self.payload.len() < 2 {
            return (None, String::new());
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        (Some(code), reason)
    }
}

/// Build a client-style masked frame, used only by tests exercising the
/// read path (a real client masks; the server only ever reads masked
/// frames and writes unmasked ones).
#[cfg(test)]
pub fn mask_frame_bytes(fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut first = opcode.to_u8();
    if fin {
        first |= 0x80;
    }
    out.push(first);

    let mut mask_key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask_key);

    let len = payload.len();
    if len < 126 {
        out.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(0x80 | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x80 | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(&mask_key);
    let mut masked_payload = payload.to_vec();
    for (i, byte) in masked_payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
    out.extend_from_slice(&masked_payload);
    out
}
