//! Frame layout (network byte order):
//!
//! ```text
//! byte 0: FIN | RSV1 | RSV2 | RSV3 | opcode(4)
//! byte 1: MASK | len(7)   len 126 => u16 follows, 127 => u64 follows
//! [mask key: 4 bytes, when MASK is set]
//! payload (XORed with the mask key, cycling every 4 bytes)
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{random_bytes, WebSocketError};

/// Largest payload accepted from the peer.
pub const MAX_PAYLOAD_LEN: u64 = 64 * 1024 * 1024;

const FIN_BIT: u8 = 0x80;
const RSV1_BIT: u8 = 0x40;
const RSV2_BIT: u8 = 0x20;
const RSV3_BIT: u8 = 0x10;
const OPCODE_MASK: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_MASK: u8 = 0x7F;
const LEN_U16: u8 = 126;
const LEN_U64: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = WebSocketError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::from_u8(byte).ok_or(WebSocketError::UnknownOpcode(byte))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unreserved frame.
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload,
        }
    }

    /// Build a frame from a raw opcode; anything outside the known set is rejected.
    pub fn from_raw(
        fin: bool,
        rsv: (bool, bool, bool),
        opcode: u8,
        payload: Vec<u8>,
    ) -> Result<Self, WebSocketError> {
        Ok(Self {
            fin,
            rsv1: rsv.0,
            rsv2: rsv.1,
            rsv3: rsv.2,
            opcode: Opcode::try_from(opcode)?,
            payload,
        })
    }

    pub fn text(text: &str) -> Self {
        Self::new(Opcode::Text, text.as_bytes().to_vec())
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Close frame carrying a status code and UTF-8 reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        Self::new(Opcode::Close, payload)
    }

    /// Encode the frame, masking the payload with a fresh random key when `masked`.
    pub fn serialize(&self, masked: bool) -> Result<Vec<u8>, WebSocketError> {
        let key = if masked { Some(random_bytes::<4>()?) } else { None };
        Ok(self.serialize_with_mask(key))
    }

    /// Encode the frame with an explicit mask key (or none).
    pub fn serialize_with_mask(&self, mask_key: Option<[u8; 4]>) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);

        let mut b0 = self.opcode.as_u8();
        if self.fin {
            b0 |= FIN_BIT;
        }
        if self.rsv1 {
            b0 |= RSV1_BIT;
        }
        if self.rsv2 {
            b0 |= RSV2_BIT;
        }
        if self.rsv3 {
            b0 |= RSV3_BIT;
        }
        out.push(b0);

        let mask_bit = if mask_key.is_some() { MASK_BIT } else { 0 };
        if len < LEN_U16 as usize {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | LEN_U16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | LEN_U64);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match mask_key {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }

    /// Read one frame. `Ok(None)` when the stream ends before a frame header starts.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Frame>, WebSocketError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 2];
        let first = reader.read(&mut header[..1]).await?;
        if first == 0 {
            return Ok(None);
        }
        reader.read_exact(&mut header[1..]).await?;

        let b0 = header[0];
        let b1 = header[1];
        let opcode = Opcode::try_from(b0 & OPCODE_MASK)?;

        let len = match b1 & LEN_MASK {
            LEN_U16 => reader.read_u16().await? as u64,
            LEN_U64 => reader.read_u64().await?,
            n => n as u64,
        };
        if len > MAX_PAYLOAD_LEN {
            return Err(WebSocketError::PayloadTooLarge(len));
        }

        let mask_key = if b1 & MASK_BIT != 0 {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin: b0 & FIN_BIT != 0,
            rsv1: b0 & RSV1_BIT != 0,
            rsv2: b0 & RSV2_BIT != 0,
            rsv3: b0 & RSV3_BIT != 0,
            opcode,
            payload,
        }))
    }
}

/// XOR `data` in place with `key`, cycling every 4 bytes. Applying it twice restores the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(bytes: &[u8]) -> Frame {
        let mut reader = bytes;
        Frame::read_from(&mut reader).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn round_trips_every_opcode_and_length_tier() {
        let opcodes = [
            Opcode::Continuation,
            Opcode::Text,
            Opcode::Binary,
            Opcode::Close,
            Opcode::Ping,
            Opcode::Pong,
        ];
        for opcode in opcodes {
            for len in [0usize, 5, 125, 126, 65_535, 65_536] {
                for masked in [false, true] {
                    let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                    let mut frame = Frame::new(opcode, payload);
                    frame.fin = len % 2 == 0;
                    frame.rsv2 = masked;
                    let raw = frame.serialize(masked).unwrap();
                    assert_eq!(raw[1] & MASK_BIT != 0, masked);
                    assert_eq!(parse(&raw).await, frame);
                }
            }
        }
    }

    #[test]
    fn length_tiers_use_extended_fields() {
        let short = Frame::new(Opcode::Binary, vec![0; 125]).serialize_with_mask(None);
        assert_eq!(short[1], 125);
        assert_eq!(short.len(), 2 + 125);

        let medium = Frame::new(Opcode::Binary, vec![0; 126]).serialize_with_mask(None);
        assert_eq!(medium[1], 126);
        assert_eq!(&medium[2..4], &126u16.to_be_bytes());

        let long = Frame::new(Opcode::Binary, vec![0; 70_000]).serialize_with_mask(None);
        assert_eq!(long[1], 127);
        assert_eq!(&long[2..10], &70_000u64.to_be_bytes());
    }

    #[test]
    fn masked_text_frame_layout() {
        let raw = Frame::text("Hello").serialize_with_mask(Some([0x37, 0xfa, 0x21, 0x3d]));
        // Example from RFC6455 section 5.7.
        assert_eq!(
            raw,
            [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn masking_is_an_involution() {
        for len in [0usize, 1, 3, 4, 7, 1000] {
            let original: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let key = [0xde, 0xad, 0xbe, 0xef];
            let mut data = original.clone();
            apply_mask(&mut data, key);
            apply_mask(&mut data, key);
            assert_eq!(data, original);
        }
    }

    #[tokio::test]
    async fn unknown_opcode_is_rejected() {
        let mut reader: &[u8] = &[0x83, 0x00];
        let err = Frame::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, WebSocketError::UnknownOpcode(0x3)));
        assert!(matches!(
            Frame::from_raw(true, (false, false, false), 0xB, Vec::new()),
            Err(WebSocketError::UnknownOpcode(0xB))
        ));
    }

    #[tokio::test]
    async fn empty_stream_yields_no_frame() {
        let mut reader: &[u8] = &[];
        assert!(Frame::read_from(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_eof_error() {
        let mut reader: &[u8] = &[0x81, 0x05, b'h', b'i'];
        let err = Frame::read_from(&mut reader).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn pong_uses_opcode_ten() {
        let raw = Frame::pong(b"p".to_vec()).serialize_with_mask(None);
        assert_eq!(raw[0], 0x8A);
    }
}
