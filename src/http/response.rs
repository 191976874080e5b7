use std::fs;
use std::path::{ Path, PathBuf };

use tracing::{ debug, warn };

use crate::config::ServerConfig;
use crate::http::status::reason_phrase;

const DEFAULT_ERROR_PAGE: &str = "DefaultErrorPage.html";

/// An outgoing response, serialised in one piece by [`Response::to_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            headers: Vec::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    pub fn ok(body: Vec<u8>, content_type: &str) -> Self {
        Self::new(200).with_body(body, content_type)
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = body;
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn redirect(location: &str, status: u16) -> Self {
        Self::new(status).with_header("Location", location)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    /// Wraps CGI stdout as an HTML page.
    pub fn from_cgi(output: Vec<u8>) -> Self {
        Self::ok(output, "text/html")
    }

    /// Error response with the server's page for `status`: a configured
    /// page, then `errors/DefaultErrorPage.html` under the root, then a
    /// built-in page.
    pub fn error(status: u16, server: Option<&ServerConfig>, base_dir: &Path) -> Self {
        let body = server
            .and_then(|server| load_error_page(status, server, base_dir))
            .unwrap_or_else(|| builtin_error_page(status).into_bytes());
        let mut response = Self::new(status).with_body(body, "text/html");
        response.keep_alive = false;
        response
    }

    pub fn close(mut self) -> Self {
        self.keep_alive = false;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        if self.status != 204 {
            if let Some(content_type) = &self.content_type {
                head.push_str(&format!("Content-Type: {}\r\n", content_type));
            }
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("Cache-Control: no-cache, private\r\n");
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        head.push_str(&format!("Connection: {}\r\n\r\n", connection));

        let mut out = head.into_bytes();
        if self.status != 204 {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

/// Expands `40x.html` / `4xx.html` style names to the concrete code.
pub fn expand_template(path: &str, status: u16) -> String {
    let (dir, name) = match path.rfind('/') {
        Some(pos) => path.split_at(pos + 1),
        None => ("", path),
    };
    let Some(stem) = name.strip_suffix(".html") else {
        return path.to_string();
    };
    let code = status.to_string();
    let is_template = stem.len() == code.len()
        && stem.contains('x')
        && stem
            .chars()
            .zip(code.chars())
            .all(|(t, c)| t == 'x' || t == c);
    if is_template { format!("{}{}.html", dir, code) } else { path.to_string() }
}

fn errors_dir(server: &ServerConfig, base_dir: &Path) -> PathBuf {
    base_dir.join(&server.root).join("errors")
}

fn load_error_page(status: u16, server: &ServerConfig, base_dir: &Path) -> Option<Vec<u8>> {
    let errors = errors_dir(server, base_dir);

    if let Some(configured) = server.error_pages.get(&status) {
        let page = errors.join(expand_template(configured, status).trim_start_matches('/'));
        match fs::read(&page) {
            Ok(content) => return Some(content),
            Err(e) => {
                warn!(status, page = %page.display(), error = %e, "custom error page unreadable");
            }
        }
    }

    let fallback = errors.join(DEFAULT_ERROR_PAGE);
    match fs::read(&fallback) {
        Ok(content) => Some(content),
        Err(_) => {
            debug!(status, "no error page on disk, using built-in page");
            None
        }
    }
}

pub fn builtin_error_page(status: u16) -> String {
    let reason = reason_phrase(status);
    format!(
        "<html><head><title>{} {}</title></head>\
         <body style='font-family:sans-serif; text-align:center; padding-top:50px;'>\
         <h1>{} {}</h1><hr><p>webserv</p></body></html>",
        status, reason, status, reason
    )
}
