//! HTTP response parsing.

use serde::de::DeserializeOwned;

use super::{find_subsequence, Headers, HttpError, HEADER_BOUNDARY};

/// A complete HTTP/1.1 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Parse a full response. The body is whatever follows the header block,
    /// truncated to `Content-Length` when present and dropped for 204.
    pub fn parse(raw: &[u8]) -> Result<Self, HttpError> {
        let boundary = find_subsequence(raw, HEADER_BOUNDARY).ok_or_else(|| {
            HttpError::MalformedResponse("missing header terminator".to_string())
        })?;
        let (head, body) = (&raw[..boundary], &raw[boundary + HEADER_BOUNDARY.len()..]);
        let (status_code, reason, headers) = parse_head(head)?;

        let body = if status_code == 204 {
            Vec::new()
        } else {
            match content_length(&headers) {
                Some(len) if len < body.len() => body[..len].to_vec(),
                _ => body.to_vec(),
            }
        };

        Ok(Self {
            status_code,
            reason,
            headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON. `None` for 204 No Content or an empty body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<Option<T>, HttpError> {
        if self.status_code == 204 || self.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.body)?))
    }
}

/// Status line and header block (without the trailing blank line).
pub(crate) fn parse_head(head: &[u8]) -> Result<(u16, String, Headers), HttpError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HttpError::MalformedResponse(format!(
            "bad status line: {:?}",
            status_line
        )));
    }
    let status_code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            HttpError::MalformedResponse(format!("bad status code: {:?}", status_line))
        })?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Headers::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            HttpError::MalformedResponse(format!("header line without colon: {:?}", line))
        })?;
        headers.append(name.trim(), value.trim());
    }

    Ok((status_code, reason, headers))
}

pub(crate) fn content_length(headers: &Headers) -> Option<usize> {
    headers
        .get("content-length")
        .and_then(|value| value.trim().parse().ok())
}

pub(crate) fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all("transfer-encoding")
        .iter()
        .any(|value| value.to_ascii_lowercase().contains("chunked"))
}
