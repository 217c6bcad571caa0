//! HTTP transport to the board.
//!
//! - Blocking client using `ureq` (no async).
//! - One connection per request: idle connections are never kept.
//! - Status codes are returned as-is; the client decides what they mean.

use base64::prelude::*;
use http::{Method, StatusCode};
use log::trace;

#[derive(Debug)]
pub enum TransportError {
    Connection(String),
    Body(String),
    UnsupportedMethod(Method),
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Connection(s) => write!(f, "connection failed: {}", s),
            TransportError::Body(s) => write!(f, "reading response body failed: {}", s),
            TransportError::UnsupportedMethod(m) => write!(f, "unsupported method {}", m),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Response {
            status,
            body: body.into(),
        }
    }

    /// Body decoded leniently; the board firmware does not declare a charset.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A way of asking the board for a page.
pub trait Transport {
    fn request(&self, method: Method, path: &str) -> Result<Response, TransportError>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both parts must be non-empty, otherwise requests go out unauthenticated.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Credentials {
                username: u,
                password: p,
            }),
            _ => None,
        }
    }

    fn header_value(&self) -> String {
        let token = BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: String,
    authorization: Option<String>,
}

impl HttpTransport {
    /// `host` may carry a port (`192.168.1.20:8080`).
    pub fn new(host: &str, credentials: Option<&Credentials>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_idle_connections(0)
            .build();

        HttpTransport {
            agent: ureq::Agent::new_with_config(config),
            base_url: format!("http://{}", host.trim_end_matches('/')),
            authorization: credentials.map(Credentials::header_value),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl Transport for HttpTransport {
    fn request(&self, method: Method, path: &str) -> Result<Response, TransportError> {
        let url = self.url(path);
        let mut req = if method == Method::GET {
            self.agent.get(&url)
        } else if method == Method::HEAD {
            self.agent.head(&url)
        } else {
            return Err(TransportError::UnsupportedMethod(method));
        };
        if let Some(auth) = &self.authorization {
            req = req.header("Authorization", auth.as_str());
        }

        let mut res = req.call().map_err(|e| TransportError::Connection(e.to_string()))?;
        let status = res.status();
        let body = res
            .body_mut()
            .read_to_vec()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        trace!("{} {} -> {} ({} bytes)", method, url, status, body.len());

        Ok(Response { status, body })
    }
}
