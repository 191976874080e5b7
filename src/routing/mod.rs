pub mod cgi;

use std::path::{ Path, PathBuf };

use crate::config::{ DirectoryLocation, ServerConfig };
use crate::error::ProtocolError;
use crate::http::request::{ uri_extension, Method, Request };

pub use cgi::CgiTarget;

/// What the engine should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    Serve(PathBuf, u16),
    Redirect(String, u16),
    List(PathBuf),
    Cgi(CgiTarget),
    Delete(PathBuf),
    NoContent,
    Error(u16),
}

/// Maps requests onto the filesystem. Relative roots in the configuration
/// are taken relative to `base_dir`.
#[derive(Debug, Clone)]
pub struct Resolver {
    base_dir: PathBuf,
}

/// The directory a request landed in, before index or file selection.
struct Located<'a> {
    location: Option<&'a DirectoryLocation>,
    /// Path below the location, empty when the location itself was asked for.
    rest: String,
}

impl Resolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn server_root(&self, server: &ServerConfig) -> PathBuf {
        self.base_dir.join(&server.root)
    }

    pub fn resolve(&self, req: &Request, server: &ServerConfig) -> RoutingDecision {
        let Some(method) = Method::from_str(&req.method) else {
            return RoutingDecision::Error(400);
        };
        if req.uri.split('/').any(|segment| segment == "..") {
            return RoutingDecision::Error(403);
        }
        if let Err(status) = authorize(&req.uri, method, server) {
            return RoutingDecision::Error(status);
        }

        let root = self.server_root(server);
        if let Some(decision) = cgi::route(req, method, server, &self.base_dir, &root) {
            return decision;
        }

        let Some(located) = locate(&req.uri, server) else {
            return RoutingDecision::Error(404);
        };
        let bases = match self.location_bases(located.location, &root) {
            Ok(bases) => bases,
            Err(decision) => return decision,
        };

        if method == Method::DELETE {
            return delete_target(&bases, &located.rest);
        }
        select(&bases, &located, server)
    }

    /// Directories to probe for the location, in order: the alias, root or
    /// server root first, then `<server root><location name>` after an alias.
    fn location_bases(&self, location: Option<&DirectoryLocation>, root: &Path) -> Result<Vec<PathBuf>, RoutingDecision> {
        let Some(location) = location else {
            return Ok(vec![root.to_path_buf()]);
        };
        if let Some(alias) = &location.alias {
            let fallback = root.join(location.name.trim_start_matches('/'));
            return Ok(vec![root.join(strip_relative(alias)), fallback]);
        }
        if let Some(dir) = &location.root {
            return Ok(vec![root.join(strip_relative(dir))]);
        }
        if let Some(redirect) = &location.redirect {
            return Err(match redirect_target(redirect) {
                Some(target) => RoutingDecision::Redirect(target, 302),
                None => RoutingDecision::Error(400),
            });
        }
        Err(RoutingDecision::Error(404))
    }
}

/// Checks the request method against the most specific matching location.
///
/// Returns the status to answer with when the request may not proceed.
pub fn authorize(uri: &str, method: Method, server: &ServerConfig) -> Result<(), u16> {
    let allowed = |ok: bool| if ok { Ok(()) } else { Err(405) };
    let has_root_location = server.directory("/").is_some();

    if server.locations.is_empty() || (uri == "/" && !has_root_location) {
        return allowed(server.allows(method));
    }
    if let Some(dir) = server.directory(uri) {
        return allowed(dir.allows(method));
    }
    if let Some(ext) = uri_extension(uri) {
        if let Some(file) = server.file_locations().find(|file| file.matches_extension(ext)) {
            return allowed(file.allows(method));
        }
    }
    if let Some(dir) = longest_prefix(uri, server) {
        return allowed(dir.allows(method));
    }
    if !has_root_location && uri.rfind('/') == Some(0) {
        return allowed(server.allows(method));
    }
    Err(404)
}

/// Picks the server block for a `Host` header among those sharing a
/// listener. `localhost` and `127.0.0.1` select the group's first block.
pub fn select_server(servers: &[ServerConfig], group: &[usize], host: &str) -> Result<usize, ProtocolError> {
    let name = host.split(':').next().unwrap_or("");
    if let Some(&idx) = group.iter().find(|&&idx| servers[idx].server_name == name) {
        return Ok(idx);
    }
    match group.first() {
        Some(&idx) if name == "localhost" || name == "127.0.0.1" => Ok(idx),
        _ => Err(ProtocolError::UnknownHost(name.to_string())),
    }
}

/// `localhost[:port]/path` becomes a local path with a trailing slash;
/// `http...` is used as is. Anything else is not a valid redirect.
pub fn redirect_target(value: &str) -> Option<String> {
    if value.starts_with("localhost") {
        let mut path = match value.find('/') {
            Some(pos) => value[pos..].to_string(),
            None => "/".to_string(),
        };
        if !path.ends_with('/') {
            path.push('/');
        }
        Some(path)
    } else if value.starts_with("http") {
        Some(value.to_string())
    } else {
        None
    }
}

/// Drops a leading `.` and/or `/` so the value joins under the server root.
fn strip_relative(value: &str) -> &str {
    let value = value.strip_prefix('.').unwrap_or(value);
    value.strip_prefix('/').unwrap_or(value)
}

fn longest_prefix<'a>(uri: &str, server: &'a ServerConfig) -> Option<&'a DirectoryLocation> {
    server
        .directories()
        .filter(|dir| dir.is_prefix_of(uri))
        .max_by_key(|dir| dir.name.len())
}

fn locate<'a>(uri: &str, server: &'a ServerConfig) -> Option<Located<'a>> {
    if let Some(dir) = server.directory(uri) {
        return Some(Located { location: Some(dir), rest: String::new() });
    }
    if let Some(dir) = longest_prefix(uri, server) {
        let rest = uri[dir.name.len()..].trim_start_matches('/').to_string();
        return Some(Located { location: Some(dir), rest });
    }
    // no `/` location: the server root answers for everything else
    if server.directory("/").is_none() {
        return Some(Located { location: None, rest: uri.trim_start_matches('/').to_string() });
    }
    None
}

fn index_candidates<'a>(location: Option<&'a DirectoryLocation>, server: &'a ServerConfig) -> &'a [String] {
    match location {
        Some(dir) if !dir.index.is_empty() => &dir.index,
        _ => &server.index,
    }
}

fn find_index(dirs: &[PathBuf], names: &[String]) -> Option<PathBuf> {
    names
        .iter()
        .flat_map(|name| dirs.iter().map(move |dir| dir.join(name)))
        .find(|path| path.is_file())
}

fn select(bases: &[PathBuf], located: &Located<'_>, server: &ServerConfig) -> RoutingDecision {
    let autoindex = located.location.map(|dir| dir.autoindex).unwrap_or(false);
    let names = index_candidates(located.location, server);

    if located.rest.is_empty() {
        let own_index = located.location.map(|dir| !dir.index.is_empty()).unwrap_or(false);
        if autoindex && !own_index {
            return match bases.iter().find(|base| base.is_dir()) {
                Some(base) => RoutingDecision::List(base.clone()),
                None => RoutingDecision::Error(404),
            };
        }
        return match find_index(bases, names) {
            Some(path) => RoutingDecision::Serve(path, 200),
            None => RoutingDecision::Error(404),
        };
    }

    for base in bases {
        let path = base.join(&located.rest);
        if path.is_file() {
            return RoutingDecision::Serve(path, 200);
        }
        if path.is_dir() {
            if autoindex {
                return RoutingDecision::List(path);
            }
            if let Some(index) = find_index(std::slice::from_ref(&path), names) {
                return RoutingDecision::Serve(index, 200);
            }
        }
    }
    RoutingDecision::Error(404)
}

fn delete_target(bases: &[PathBuf], rest: &str) -> RoutingDecision {
    if rest.is_empty() {
        return RoutingDecision::Error(403);
    }
    match bases.iter().map(|base| base.join(rest)).find(|path| path.is_file()) {
        Some(path) => RoutingDecision::Delete(path),
        None => RoutingDecision::Error(404),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ FileLocation, ListenSpec, LocationNode };
    use std::fs;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn server_at(root: &Path) -> ServerConfig {
        let mut server = ServerConfig::new(ListenSpec { host: Ipv4Addr::LOCALHOST, port: 8080 });
        server.server_name = "example".to_string();
        server.root = format!("{}/", root.display());
        server.allow_methods = vec![Method::GET];
        server
    }

    fn dir(name: &str, methods: &[Method]) -> DirectoryLocation {
        DirectoryLocation {
            name: name.to_string(),
            allow_methods: methods.to_vec(),
            ..Default::default()
        }
    }

    fn request(raw: &str) -> Request {
        let mut req = Request::new();
        req.ingest(raw.as_bytes());
        req
    }

    fn get(uri: &str) -> Request {
        request(&format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", uri))
    }

    #[test]
    fn no_locations_uses_server_methods() {
        let server = server_at(Path::new("/srv"));
        assert_eq!(authorize("/anything", Method::GET, &server), Ok(()));
        assert_eq!(authorize("/anything", Method::POST, &server), Err(405));
    }

    #[test]
    fn file_location_beats_directory_prefix() {
        let mut server = server_at(Path::new("/srv"));
        server.locations.push(LocationNode::Directory(dir("/cgi-bin", &[Method::GET])));
        server.locations.push(
            LocationNode::File(FileLocation {
                name: "*.py".to_string(),
                cgi_pass: "/cgi-bin/a.py".to_string(),
                allow_methods: vec![Method::POST],
            })
        );
        assert_eq!(authorize("/cgi-bin/a.py", Method::POST, &server), Ok(()));
        assert_eq!(authorize("/cgi-bin/a.py", Method::GET, &server), Err(405));
        assert_eq!(authorize("/cgi-bin/readme.txt", Method::GET, &server), Ok(()));
    }

    #[test]
    fn longest_prefix_decides() {
        let mut server = server_at(Path::new("/srv"));
        server.locations.push(LocationNode::Directory(dir("/", &[Method::GET])));
        server.locations.push(LocationNode::Directory(dir("/uploads", &[Method::DELETE])));
        assert_eq!(authorize("/uploads/x.bin", Method::DELETE, &server), Ok(()));
        assert_eq!(authorize("/uploads/x.bin", Method::GET, &server), Err(405));
        assert_eq!(authorize("/other/page", Method::GET, &server), Ok(()));
        assert_eq!(authorize("/uploadsx", Method::DELETE, &server), Err(405));
    }

    #[test]
    fn unmatched_nested_path_is_not_found() {
        let mut server = server_at(Path::new("/srv"));
        server.locations.push(LocationNode::Directory(dir("/images", &[Method::GET])));
        assert_eq!(authorize("/docs/a/b", Method::GET, &server), Err(404));
        assert_eq!(authorize("/page.html", Method::GET, &server), Ok(()));
    }

    #[test]
    fn redirect_targets() {
        assert_eq!(redirect_target("localhost:8080/images").as_deref(), Some("/images/"));
        assert_eq!(redirect_target("localhost").as_deref(), Some("/"));
        assert_eq!(redirect_target("https://example.com/x").as_deref(), Some("https://example.com/x"));
        assert_eq!(redirect_target("ftp://example.com"), None);
    }

    #[test]
    fn alias_wins_over_redirect_and_redirect_is_returned() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("img")).unwrap();
        fs::write(tmp.path().join("img/a.png"), "png").unwrap();

        let mut server = server_at(tmp.path());
        let mut images = dir("/images", &[Method::GET]);
        images.alias = Some("./img".to_string());
        images.redirect = Some("localhost/elsewhere".to_string());
        let mut old = dir("/old", &[Method::GET]);
        old.redirect = Some("http://example.com".to_string());
        let mut bad = dir("/bad", &[Method::GET]);
        bad.redirect = Some("example.com".to_string());
        for d in [images, old, bad] {
            server.locations.push(LocationNode::Directory(d));
        }

        let resolver = Resolver::new(".");
        assert_eq!(
            resolver.resolve(&get("/images/a.png"), &server),
            RoutingDecision::Serve(tmp.path().join("img/a.png"), 200)
        );
        assert_eq!(
            resolver.resolve(&get("/old"), &server),
            RoutingDecision::Redirect("http://example.com".to_string(), 302)
        );
        assert_eq!(resolver.resolve(&get("/bad"), &server), RoutingDecision::Error(400));
    }

    #[test]
    fn alias_miss_falls_back_to_location_name() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("img")).unwrap();
        fs::create_dir(tmp.path().join("images")).unwrap();
        fs::write(tmp.path().join("images/b.png"), "png").unwrap();

        let mut server = server_at(tmp.path());
        let mut images = dir("/images", &[Method::GET]);
        images.alias = Some("/img/".to_string());
        server.locations.push(LocationNode::Directory(images));

        assert_eq!(
            Resolver::new(".").resolve(&get("/images/b.png"), &server),
            RoutingDecision::Serve(tmp.path().join("images/b.png"), 200)
        );
    }

    #[test]
    fn location_without_target_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_at(tmp.path());
        server.locations.push(LocationNode::Directory(dir("/empty", &[Method::GET])));
        assert_eq!(Resolver::new(".").resolve(&get("/empty"), &server), RoutingDecision::Error(404));
    }

    #[test]
    fn index_probe_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.html"), "home").unwrap();
        let server = server_at(tmp.path());
        assert_eq!(
            Resolver::new(".").resolve(&get("/"), &server),
            RoutingDecision::Serve(tmp.path().join("index.html"), 200)
        );

        fs::write(tmp.path().join("index.htm"), "first").unwrap();
        assert_eq!(
            Resolver::new(".").resolve(&get("/"), &server),
            RoutingDecision::Serve(tmp.path().join("index.htm"), 200)
        );
    }

    #[test]
    fn autoindex_without_index_lists() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("files/sub")).unwrap();
        fs::write(tmp.path().join("files/index.html"), "ignored").unwrap();

        let mut server = server_at(tmp.path());
        let mut files = dir("/files", &[Method::GET]);
        files.root = Some("./files".to_string());
        files.autoindex = true;
        server.locations.push(LocationNode::Directory(files));

        let resolver = Resolver::new(".");
        assert_eq!(resolver.resolve(&get("/files/"), &server), RoutingDecision::List(tmp.path().join("files")));
        assert_eq!(resolver.resolve(&get("/files/sub"), &server), RoutingDecision::List(tmp.path().join("files/sub")));
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let server = server_at(tmp.path());
        assert_eq!(Resolver::new(".").resolve(&get("/missing.html"), &server), RoutingDecision::Error(404));
    }

    #[test]
    fn dot_dot_is_forbidden() {
        let server = server_at(Path::new("/srv"));
        assert_eq!(Resolver::new(".").resolve(&get("/../etc/passwd"), &server), RoutingDecision::Error(403));
    }

    #[test]
    fn delete_existing_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("uploads")).unwrap();
        fs::write(tmp.path().join("uploads/x.txt"), "x").unwrap();

        let mut server = server_at(tmp.path());
        let mut uploads = dir("/uploads", &[Method::DELETE]);
        uploads.root = Some("uploads".to_string());
        server.locations.push(LocationNode::Directory(uploads));

        let delete = |uri: &str| request(&format!("DELETE {} HTTP/1.1\r\nHost: a\r\n\r\n", uri));
        let resolver = Resolver::new(".");
        assert_eq!(
            resolver.resolve(&delete("/uploads/x.txt"), &server),
            RoutingDecision::Delete(tmp.path().join("uploads/x.txt"))
        );
        assert_eq!(resolver.resolve(&delete("/uploads/gone.txt"), &server), RoutingDecision::Error(404));
    }

    #[test]
    fn host_selection_within_group() {
        let tmp = TempDir::new().unwrap();
        let first = server_at(tmp.path());
        let mut second = server_at(tmp.path());
        second.server_name = "other".to_string();
        let servers = vec![first, second];

        assert_eq!(select_server(&servers, &[0, 1], "other:8080"), Ok(1));
        assert_eq!(select_server(&servers, &[0, 1], "localhost:8080"), Ok(0));
        assert_eq!(select_server(&servers, &[0, 1], "127.0.0.1"), Ok(0));
        assert_eq!(select_server(&servers, &[0, 1], "example"), Ok(0));
        assert_eq!(
            select_server(&servers, &[0, 1], "evil.com").unwrap_err().status(),
            400
        );
    }
}
