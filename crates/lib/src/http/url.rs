//! URL model for the fixed grammar `scheme://domain[:port][/path][?query]`.

use std::fmt;
use std::str::FromStr;

use super::HttpError;

/// A parsed URL. Only produced by [`Url::parse`], so `domain` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: String,
    pub domain: String,
    /// Path component including the leading `/`; empty when the URL has none.
    pub route: String,
    pub port: Option<u16>,
    pub query_params: QueryParams,
}

/// Query parameters in the order they first appeared. Keys are unique; a repeated
/// key replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

fn is_scheme_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '+' | '.' | '-')
}

fn is_domain_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-')
}

impl Url {
    pub fn parse(text: &str) -> Result<Self, HttpError> {
        let malformed = |why: &str| HttpError::MalformedUrl(format!("{} ({})", text, why));

        let (scheme, rest) = text
            .split_once("://")
            .ok_or_else(|| malformed("missing scheme separator"))?;
        if scheme.is_empty() || !scheme.chars().all(is_scheme_char) {
            return Err(malformed("invalid scheme"));
        }

        let domain_end = rest
            .find(|c: char| !is_domain_char(c))
            .unwrap_or(rest.len());
        let (domain, mut rest) = rest.split_at(domain_end);
        if domain.is_empty() {
            return Err(malformed("domain is required"));
        }

        let mut port = None;
        if let Some(after_colon) = rest.strip_prefix(':') {
            let digits_end = after_colon
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_colon.len());
            let (digits, tail) = after_colon.split_at(digits_end);
            let parsed = digits
                .parse::<u16>()
                .map_err(|_| malformed("invalid port"))?;
            port = Some(parsed);
            rest = tail;
        }

        // Fragments never reach the wire.
        let rest = rest.split('#').next().unwrap_or_default();
        if !rest.is_empty() && !rest.starts_with('/') && !rest.starts_with('?') {
            return Err(malformed("unexpected characters after authority"));
        }

        let (route, query) = match rest.split_once('?') {
            Some((route, query)) => (route, query),
            None => (rest, ""),
        };

        let query_params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        Ok(Self {
            scheme: scheme.to_string(),
            domain: domain.to_string(),
            route: route.to_string(),
            port,
            query_params,
        })
    }

    /// True when the scheme requires a TLS-wrapped socket.
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }

    /// Well-known port for the scheme (80 for http/ws, 443 for https/wss).
    pub fn default_port(&self) -> Option<u16> {
        match self.scheme.as_str() {
            "http" | "ws" => Some(80),
            "https" | "wss" => Some(443),
            _ => None,
        }
    }

    /// Explicit port, falling back to the scheme's default.
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| self.default_port())
    }

    /// Request target: the route (or `/`) followed by the query string, if any.
    pub fn route_for_send(&self) -> String {
        let mut target = if self.route.is_empty() {
            "/".to_string()
        } else {
            self.route.clone()
        };
        if !self.query_params.is_empty() {
            let query = self
                .query_params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            target.push('?');
            target.push_str(&query);
        }
        target
    }

    /// Value for the Host header: the domain, plus the port when it is not the scheme default.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if Some(port) != self.default_port() => format!("{}:{}", self.domain, port),
            _ => self.domain.clone(),
        }
    }
}

impl FromStr for Url {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.domain)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.route_for_send())
    }
}
