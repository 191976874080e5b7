//! Request resolution against a server block, end to end through dispatch

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use tempfile::TempDir;
use webserv::config::{ DirectoryLocation, FileLocation, ListenSpec, LocationNode, ServerConfig };
use webserv::http::{ Method, Request, Response };
use webserv::routing::{ Resolver, RoutingDecision };
use webserv::server::dispatch::{ respond, Context };

fn site(root: &Path) -> ServerConfig {
    let mut server = ServerConfig::new(ListenSpec { host: Ipv4Addr::LOCALHOST, port: 8080 });
    server.server_name = "example".to_string();
    server.root = format!("{}/", root.display());
    server.allow_methods = vec![Method::GET, Method::POST];
    server
}

fn parse(raw: &str) -> Request {
    let mut req = Request::with_body_limit(1024 * 1024);
    req.ingest(raw.as_bytes());
    req
}

fn answer(server: &ServerConfig, raw: &str) -> Response {
    answer_in(Path::new("."), server, raw)
}

/// Answers with CGI scripts and relative roots found under `base`.
fn answer_in(base: &Path, server: &ServerConfig, raw: &str) -> Response {
    let servers = std::slice::from_ref(server);
    let resolver = Resolver::new(base);
    let ctx = Context { servers, group: &[0], resolver: &resolver, peer: None };
    respond(&parse(raw), &ctx)
}

#[test]
fn test_index_served_at_root() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>welcome</h1>").unwrap();
    let server = site(dir.path());

    let response = answer(&server, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"<h1>welcome</h1>");

    let wire = String::from_utf8(response.to_bytes()).unwrap();
    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(wire.contains("Content-Length: 16\r\n"));
    assert!(wire.contains("Cache-Control: no-cache, private\r\n"));
}

#[test]
fn test_empty_post_skips_cgi() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    fs::write(dir.path().join("upload.sh"), format!("touch {}\n", marker.display())).unwrap();

    let mut server = site(dir.path());
    server.locations.push(LocationNode::File(FileLocation {
        name: "*.sh".to_string(),
        cgi_pass: "/upload.sh".to_string(),
        allow_methods: vec![Method::POST],
    }));

    let response = answer_in(dir.path(), &server, "POST /upload.sh HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");
    assert_eq!(response.status, 204);
    assert!(response.body.is_empty());
    assert!(!marker.exists());
}

#[test]
fn test_post_with_body_runs_cgi() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("echo.sh"), "printf 'got:'\ncat\n").unwrap();

    let mut server = site(dir.path());
    server.locations.push(LocationNode::File(FileLocation {
        name: "*.sh".to_string(),
        cgi_pass: "/echo.sh".to_string(),
        allow_methods: vec![Method::POST],
    }));

    let response = answer_in(dir.path(), &server, "POST /echo.sh HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\n\r\nping");
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("text/html"));
    assert_eq!(response.body, b"got:ping");
}

#[test]
fn test_cgi_bin_beside_a_relative_root() {
    let base = TempDir::new().unwrap();
    fs::create_dir_all(base.path().join("var/www/html")).unwrap();
    fs::create_dir(base.path().join("cgi-bin")).unwrap();
    fs::write(base.path().join("cgi-bin/upload.sh"), "printf 'stored:'\ncat\n").unwrap();

    let mut server = site(base.path());
    server.root = "./var/www/html/".to_string();
    server.locations.push(LocationNode::File(FileLocation {
        name: "*.sh".to_string(),
        cgi_pass: "/cgi-bin/upload.sh".to_string(),
        allow_methods: vec![Method::POST],
    }));

    let response = answer_in(
        base.path(),
        &server,
        "POST /upload.sh HTTP/1.1\r\nHost: localhost\r\nContent-Length: 3\r\n\r\nabc"
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"stored:abc");
}

#[test]
fn test_missing_page_uses_error_pages() {
    let dir = TempDir::new().unwrap();
    let mut server = site(dir.path());
    server.error_pages.insert(404, "/4xx.html".to_string());
    let request = "GET /missing.html HTTP/1.1\r\nHost: localhost\r\n\r\n";

    let builtin = answer(&server, request);
    assert_eq!(builtin.status, 404);
    assert!(String::from_utf8_lossy(&builtin.body).contains("404 Not Found"));

    fs::create_dir(dir.path().join("errors")).unwrap();
    fs::write(dir.path().join("errors/DefaultErrorPage.html"), "fallback").unwrap();
    assert_eq!(answer(&server, request).body, b"fallback");

    fs::write(dir.path().join("errors/404.html"), "custom missing page").unwrap();
    let custom = answer(&server, request);
    assert_eq!(custom.status, 404);
    assert_eq!(custom.body, b"custom missing page");
    assert!(!custom.keep_alive);
}

#[test]
fn test_autoindex_lists_directory() {
    let dir = TempDir::new().unwrap();
    let files = dir.path().join("files");
    fs::create_dir_all(files.join("nested")).unwrap();
    fs::write(files.join("a.txt"), "a").unwrap();
    fs::write(files.join("b.txt"), "b").unwrap();

    let mut server = site(dir.path());
    server.locations.push(LocationNode::Directory(DirectoryLocation {
        name: "/files".to_string(),
        root: Some("./files".to_string()),
        autoindex: true,
        allow_methods: vec![Method::GET],
        ..Default::default()
    }));

    let resolver = Resolver::new(".");
    assert_eq!(
        resolver.resolve(&parse("GET /files HTTP/1.1\r\nHost: localhost\r\n\r\n"), &server),
        RoutingDecision::List(files.clone())
    );

    let response = answer(&server, "GET /files/ HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(response.status, 200);
    let html = String::from_utf8(response.body).unwrap();
    for entry in ["a.txt", "b.txt", "nested"] {
        assert_eq!(html.matches(&format!("href=\"/files/{}\"", entry)).count(), 1, "{}", entry);
    }
    assert!(!html.contains("/files/.\""));
    assert!(!html.contains("/files/..\""));
}

#[test]
fn test_method_not_allowed_by_location() {
    let dir = TempDir::new().unwrap();
    let mut server = site(dir.path());
    server.locations.push(LocationNode::Directory(DirectoryLocation {
        name: "/".to_string(),
        root: Some("./".to_string()),
        allow_methods: vec![Method::GET],
        ..Default::default()
    }));

    let response = answer(&server, "DELETE /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(response.status, 405);
}

#[test]
fn test_redirect_response() {
    let dir = TempDir::new().unwrap();
    let mut server = site(dir.path());
    server.locations.push(LocationNode::Directory(DirectoryLocation {
        name: "/old".to_string(),
        redirect: Some("localhost:8080/new".to_string()),
        allow_methods: vec![Method::GET],
        ..Default::default()
    }));

    let response = answer(&server, "GET /old HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(response.status, 302);
    assert!(response.headers.contains(&("Location".to_string(), "/new/".to_string())));
}
