use std::path::{ Path, PathBuf };

use crate::config::ServerConfig;
use crate::http::request::{ uri_extension, Method, Request };
use crate::routing::RoutingDecision;

/// A script chosen to handle the request, with the CGI path variables
/// derived from the request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiTarget {
    /// File handed to the interpreter.
    pub script: PathBuf,
    pub script_name: String,
    pub path_info: String,
    pub path_translated: String,
    pub query: String,
}

/// Decides whether the request goes to a CGI script.
///
/// Scripts are found through the matching file location's `cgi_pass`,
/// under `base`; `root` is the server root used for PATH_TRANSLATED.
/// `None` means the request is not CGI and continues to static handling.
pub fn route(
    req: &Request,
    method: Method,
    server: &ServerConfig,
    base: &Path,
    root: &Path
) -> Option<RoutingDecision> {
    match method {
        Method::DELETE => by_extension(req, method, server, base),
        Method::POST => {
            if req.body.is_empty() {
                return Some(RoutingDecision::NoContent);
            }
            by_extension(req, method, server, base)
        }
        Method::GET => by_query(req, method, server, base, root),
    }
}

/// Where a `cgi_pass` value points on disk.
pub fn script_path(base: &Path, cgi_pass: &str) -> PathBuf {
    let relative = cgi_pass.strip_prefix('.').unwrap_or(cgi_pass);
    base.join(relative.trim_start_matches('/'))
}

fn by_extension(req: &Request, method: Method, server: &ServerConfig, base: &Path) -> Option<RoutingDecision> {
    let ext = req.extension()?;
    let file = server
        .file_locations()
        .find(|file| file.matches_extension(ext) && file.cgi_pass.contains(req.uri.as_str()))?;

    if !file.allows(method) {
        return Some(RoutingDecision::Error(405));
    }
    Some(RoutingDecision::Cgi(CgiTarget {
        script: script_path(base, &file.cgi_pass),
        script_name: req.uri.clone(),
        path_info: String::new(),
        path_translated: String::new(),
        query: req.query.clone().unwrap_or_default(),
    }))
}

/// `GET /dir/script.py/extra/path?query`: the script path runs up to the
/// first `.py` that does not name a directory under the root.
fn by_query(
    req: &Request,
    method: Method,
    server: &ServerConfig,
    base: &Path,
    root: &Path
) -> Option<RoutingDecision> {
    if req.target.matches('?').count() != 1 {
        return None;
    }
    let path = req.target.split('?').next().unwrap_or("");
    let Some(script_name) = split_script(path, root) else {
        return Some(RoutingDecision::Error(404));
    };
    let path_info = path[script_name.len()..].to_string();
    let path_translated = if path_info.is_empty() {
        String::new()
    } else {
        root.join(path_info.trim_start_matches('/')).to_string_lossy().into_owned()
    };

    let ext = uri_extension(&script_name).unwrap_or("");
    let Some(file) = server
        .file_locations()
        .find(|file| file.matches_extension(ext) && file.cgi_pass.contains(script_name.as_str()))
    else {
        return Some(RoutingDecision::Error(404));
    };
    if !file.allows(method) {
        return Some(RoutingDecision::Error(405));
    }

    Some(RoutingDecision::Cgi(CgiTarget {
        script: script_path(base, &file.cgi_pass),
        path_info,
        path_translated,
        query: req.query.clone().unwrap_or_default(),
        script_name,
    }))
}

fn split_script(path: &str, root: &Path) -> Option<String> {
    let mut end = path.find(".py")? + 3;
    while root.join(path[..end].trim_start_matches('/')).is_dir() {
        let next = path[end..].find(".py")?;
        end += next + 3;
    }
    Some(path[..end].to_string())
}
