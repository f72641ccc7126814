//! Close frame status codes (RFC6455 section 7.4.1).

use std::fmt;

/// Human-readable meaning of a close status code.
pub fn status_text(code: u16) -> &'static str {
    match code {
        1000 => "normal closure",
        1001 => "endpoint going away",
        1002 => "protocol error",
        1003 => "unsupported data type",
        1005 => "no status code present",
        1006 => "closed abnormally",
        1007 => "invalid payload data",
        1008 => "policy violation",
        1009 => "message too big",
        1010 => "expected extension not negotiated",
        1011 => "unexpected server condition",
        1015 => "tls handshake failure",
        4000..=4999 => "application-defined status",
        _ => "unknown status",
    }
}

/// Status carried by a received close frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseStatus {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseStatus {
    /// Decode a close payload: optional big-endian code followed by a UTF-8 reason.
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload {
            [hi, lo, reason @ ..] => Self {
                code: Some(u16::from_be_bytes([*hi, *lo])),
                reason: String::from_utf8_lossy(reason).into_owned(),
            },
            _ => Self::default(),
        }
    }

    pub fn description(&self) -> &'static str {
        status_text(self.code.unwrap_or(1005))
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", code, self.description())?,
            None => write!(f, "{}", self.description())?,
        }
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}
