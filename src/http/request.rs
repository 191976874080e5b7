use std::collections::HashMap;
use std::fmt;
use std::io::{ self, Read };

use crate::error::{ FeedError, ParseError, ProtocolError };
use crate::http::chunked::{ self, find, TERMINATOR };

/// Slack allowed for the request line and headers on top of the body limit.
const HEADER_ALLOWANCE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "DELETE" => Some(Method::DELETE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Incomplete,
    Complete,
}

/// One HTTP request, accumulated across however many reads it takes.
///
/// The request owns its raw buffer, so reassembly of a chunked body never
/// touches another connection's state.
#[derive(Debug, Default)]
pub struct Request {
    pub method: String,
    /// Path part of the target, trailing slash stripped unless it is `/`.
    pub uri: String,
    /// Request target exactly as sent, query string included.
    pub target: String,
    pub query: Option<String>,
    pub version: String,
    pub first_line: String,
    pub raw: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub boundary: String,
    pub content_length: Option<usize>,
    pub filename: String,
    pub host: String,
    pub body: Vec<u8>,
    pub chunked: bool,
    pub complete: bool,
    header_end: Option<usize>,
    body_limit: Option<usize>,
    oversized: bool,
    body_error: Option<ParseError>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request that stops accumulating once its declared or received body
    /// exceeds `limit` bytes.
    pub fn with_body_limit(limit: usize) -> Self {
        Self {
            body_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn state(&self) -> RequestState {
        if self.complete { RequestState::Complete } else { RequestState::Incomplete }
    }

    /// Drains `reader` until it would block, reaches end of stream, or the
    /// request is complete.
    pub fn feed<R: Read>(&mut self, reader: &mut R) -> Result<RequestState, FeedError> {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    return if self.complete { Ok(RequestState::Complete) } else { Err(FeedError::Closed) };
                }
                Ok(n) => {
                    if self.ingest(&buf[..n]) == RequestState::Complete {
                        return Ok(RequestState::Complete);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(self.state());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FeedError::Io(e)),
            }
        }
    }

    /// Appends freshly read bytes and re-evaluates completeness.
    pub fn ingest(&mut self, bytes: &[u8]) -> RequestState {
        if self.complete {
            return RequestState::Complete;
        }
        self.raw.extend_from_slice(bytes);

        if self.first_line.is_empty() {
            if let Some(pos) = find(&self.raw, b"\r\n") {
                self.first_line = String::from_utf8_lossy(&self.raw[..pos]).into_owned();
            }
        }

        if self.header_end.is_none() {
            match find(&self.raw, b"\r\n\r\n") {
                Some(pos) => {
                    self.header_end = Some(pos + 4);
                    self.parse_head(pos);
                }
                None => {
                    if self.exceeds_buffer_limit() {
                        self.oversized = true;
                        self.finish();
                    }
                    return self.state();
                }
            }
        }

        if self.is_complete_now() {
            self.finish();
        }
        self.state()
    }

    fn exceeds_buffer_limit(&self) -> bool {
        match self.body_limit {
            Some(limit) => self.raw.len() > limit.saturating_add(HEADER_ALLOWANCE),
            None => false,
        }
    }

    fn is_complete_now(&mut self) -> bool {
        let Some(header_end) = self.header_end else {
            return false;
        };

        if let (Some(limit), Some(length)) = (self.body_limit, self.content_length) {
            if length > limit {
                self.oversized = true;
                return true;
            }
        }
        if self.exceeds_buffer_limit() {
            self.oversized = true;
            return true;
        }

        if self.chunked {
            // the terminator may reuse the CRLF of the header end
            return find(&self.raw[header_end - 2..], TERMINATOR).is_some();
        }
        self.raw.len() - header_end >= self.content_length.unwrap_or(0)
    }

    fn parse_head(&mut self, head_len: usize) {
        let head = String::from_utf8_lossy(&self.raw[..head_len]).into_owned();
        let mut lines = head.split("\r\n");

        let request_line = lines.next().unwrap_or("");
        let mut parts = request_line.split_whitespace();
        self.method = parts.next().unwrap_or("").to_string();
        self.target = parts.next().unwrap_or("").to_string();
        self.version = parts.next().unwrap_or("").to_string();

        let (path, query) = match self.target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (self.target.clone(), None),
        };
        self.uri = normalize_uri(&path);
        self.query = query;

        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                self.headers
                    .entry(key.trim().to_lowercase())
                    .or_insert_with(|| clean_value(value));
            }
        }

        self.content_length = self.header("content-length").and_then(|v| v.parse().ok());
        let transfer_chunked = self
            .header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        let post_without_length = self.method == "POST" && self.header("content-length").is_none();
        self.chunked = transfer_chunked || post_without_length;
    }

    fn finish(&mut self) {
        self.complete = true;
        self.host = self.header("host").unwrap_or("").to_string();
        self.content_type = self.header("content-type").unwrap_or("").to_string();
        self.boundary = parse_boundary(&self.content_type);
        self.filename = self.find_filename();

        if self.oversized {
            return;
        }
        let Some(header_end) = self.header_end else {
            return;
        };

        let result = if self.chunked {
            chunked::decode(&self.raw[header_end..])
        } else {
            self.extract_body(header_end)
        };
        match result {
            Ok(body) => self.body = body,
            Err(e) => self.body_error = Some(e),
        }
    }

    fn extract_body(&self, header_end: usize) -> Result<Vec<u8>, ParseError> {
        let declared = self.content_length.unwrap_or(0);
        let end = self.raw.len().min(header_end + declared);
        let payload = &self.raw[header_end..end];

        if self.boundary.is_empty() || !self.content_type.contains("multipart/form-data") {
            return Ok(payload.to_vec());
        }

        let Some(marker) = find(payload, b"Content-Disposition:") else {
            return Ok(payload.to_vec());
        };
        let start = find(&payload[marker..], b"\r\n\r\n")
            .map(|offset| marker + offset + 4)
            .ok_or(ParseError::MissingFinalBoundary)?;
        let final_boundary = format!("--{}--", self.boundary);
        let stop = find(&payload[start..], final_boundary.as_bytes())
            .map(|offset| start + offset)
            .ok_or(ParseError::MissingFinalBoundary)?;

        let mut content = &payload[start..stop];
        if content.ends_with(b"\r\n") {
            content = &content[..content.len() - 2];
        }
        Ok(content.to_vec())
    }

    /// Looks for a `Content-Disposition` filename anywhere in the request,
    /// multipart part headers included.
    fn find_filename(&self) -> String {
        let text = String::from_utf8_lossy(&self.raw);
        for line in text.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("content-disposition") {
                return parse_filename(value);
            }
        }
        String::new()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Error hit while decoding the body, if any.
    pub fn body_error(&self) -> Option<&ParseError> {
        self.body_error.as_ref()
    }

    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    /// Checks the request line and the Host header.
    pub fn validate(&self) -> Result<Method, ProtocolError> {
        if self.method.is_empty() || self.target.is_empty() || self.version.is_empty() {
            return Err(ProtocolError::MalformedRequestLine);
        }
        if self.version != "HTTP/1.1" {
            return Err(ProtocolError::UnsupportedVersion(self.version.clone()));
        }
        let method = Method::from_str(&self.method)
            .ok_or_else(|| ProtocolError::UnsupportedMethod(self.method.clone()))?;
        if self.host.is_empty() {
            return Err(ProtocolError::MissingHost);
        }
        Ok(method)
    }

    pub fn check_body_size(&self, limit: usize) -> Result<(), ProtocolError> {
        let declared = self.content_length.unwrap_or(0);
        let size = declared.max(self.body.len());
        if self.oversized || size > limit {
            return Err(ProtocolError::PayloadTooLarge(size));
        }
        Ok(())
    }

    /// Host header without its port.
    pub fn host_name(&self) -> &str {
        self.host.split(':').next().unwrap_or("")
    }

    pub fn keep_alive(&self) -> bool {
        !self
            .header("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    /// Extension of the last path segment, dot included.
    pub fn extension(&self) -> Option<&str> {
        uri_extension(&self.uri)
    }

    /// Clears the request for the next exchange on the same connection.
    pub fn reset(&mut self) {
        *self = Self {
            body_limit: self.body_limit,
            ..Self::default()
        };
    }
}

/// Strips a single trailing slash, except from `/` itself.
pub fn normalize_uri(uri: &str) -> String {
    if uri.len() > 1 && uri.ends_with('/') {
        uri[..uri.len() - 1].to_string()
    } else {
        uri.to_string()
    }
}

pub fn uri_extension(uri: &str) -> Option<&str> {
    let segment = uri.rsplit('/').next().unwrap_or(uri);
    segment.rfind('.').map(|pos| &segment[pos..])
}

fn clean_value(value: &str) -> String {
    value.trim_start_matches(' ').replace(['\r', '\n'], "").trim().to_string()
}

fn parse_boundary(content_type: &str) -> String {
    let Some((_, params)) = content_type.split_once(';') else {
        return String::new();
    };
    match params.split_once('=') {
        Some((_, boundary)) => boundary.trim().trim_matches('"').to_string(),
        None => String::new(),
    }
}

fn parse_filename(disposition: &str) -> String {
    let Some(pos) = disposition.find("filename=") else {
        return String::new();
    };
    let rest = &disposition[pos + "filename=".len()..];
    let rest = rest.split(';').next().unwrap_or("").trim();
    rest.trim_matches('"').to_string()
}
