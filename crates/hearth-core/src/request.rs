//! Call-level request, built from the four raw ABI strings.
//!
//! Headers arrive as newline-delimited `name: value` lines (the fixed
//! serialized representation of the ABI surface); the body is opaque bytes
//! interpreted by whichever handler the request routes to.

use crate::error::ServerError;

/// One dispatched call. Immutable once constructed; never outlives the call
/// that created it — handlers copy what they need into longer-lived work.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build a request from raw ABI inputs, parsing the header block.
    pub fn from_raw(
        method: &str,
        path: &str,
        headers: &str,
        body: &str,
    ) -> Result<Self, ServerError> {
        if method.is_empty() {
            return Err(ServerError::InvalidRequest("method must not be empty".into()));
        }
        if path.is_empty() {
            return Err(ServerError::InvalidRequest("path must not be empty".into()));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: parse_headers(headers)?,
            body: body.as_bytes().to_vec(),
        })
    }

    /// Case-insensitive header lookup; first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request body as UTF-8 text, for JSON handlers.
    pub fn body_text(&self) -> Result<&str, ServerError> {
        std::str::from_utf8(&self.body)
            .map_err(|_| ServerError::InvalidRequest("body is not valid UTF-8".into()))
    }
}

/// Parse newline-delimited `name: value` header lines. Blank lines are
/// skipped; a non-blank line without a colon is a malformed request.
fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, ServerError> {
    let mut headers = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            ServerError::InvalidRequest(format!("malformed header line '{}'", line))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ServerError::InvalidRequest(format!(
                "malformed header line '{}'",
                line
            )));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}
