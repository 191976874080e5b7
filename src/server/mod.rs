pub mod connection;
pub mod dispatch;

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::{ Duration, Instant };

use mio::net::TcpListener;
use mio::{ Events, Interest, Poll, Token };
use tracing::{ debug, error, info, warn };

use crate::config::{ RouteTree, ServerConfig };
use crate::error::{ FeedError, ServerError };
use crate::http::request::RequestState;
use crate::logs::AccessLog;
use crate::routing::Resolver;
use crate::server::connection::{ Connection, ConnectionState };
use crate::server::dispatch::{ respond, Context };

/// Listener tokens live below this value, connection tokens above it.
const SERVER_TOKEN_MAX: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub idle_timeout: Duration,
    pub poll_timeout: Duration,
    pub max_events: usize,
    /// Where the request and location logs go; `None` disables them.
    pub log_dir: Option<PathBuf>,
    /// Relative roots in the configuration resolve against this directory.
    pub base_dir: PathBuf,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            poll_timeout: Duration::from_secs(5),
            max_events: 1024,
            log_dir: Some(PathBuf::from("logs")),
            base_dir: PathBuf::from("."),
        }
    }
}

pub struct Server {
    poll: Poll,
    events: Events,
    listeners: HashMap<Token, ListenerEntry>,
    connections: HashMap<Token, Connection>,
    servers: Vec<ServerConfig>,
    resolver: Resolver,
    access_log: Option<AccessLog>,
    options: ServerOptions,
    shutdown: Arc<AtomicBool>,
    next_token: usize,
}

struct ListenerEntry {
    listener: TcpListener,
    addr: SocketAddr,
    /// Indices into `servers` of every block sharing this address.
    group: Vec<usize>,
    body_limit: usize,
}

/// Readiness of one token, copied out of the event batch.
#[derive(Debug, Clone, Copy)]
struct Ready {
    token: Token,
    readable: bool,
    writable: bool,
}

impl Server {
    pub fn new(tree: RouteTree, options: ServerOptions) -> Result<Self, ServerError> {
        let poll = Poll::new().map_err(ServerError::Poll)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(options.max_events),
            listeners: HashMap::new(),
            connections: HashMap::new(),
            servers: tree.servers,
            resolver: Resolver::new(options.base_dir.clone()),
            access_log: options.log_dir.clone().map(AccessLog::new),
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
            next_token: SERVER_TOKEN_MAX,
        })
    }

    /// Flag that stops [`Server::run`] once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Binds one listener per distinct `listen` address. Addresses that
    /// fail are logged and skipped; at least one must succeed.
    pub fn bind(&mut self) -> Result<(), ServerError> {
        let mut groups: Vec<(SocketAddr, Vec<usize>)> = Vec::new();
        for (idx, server) in self.servers.iter().enumerate() {
            let addr = server.listen.socket_addr();
            match groups.iter_mut().find(|(bound, _)| *bound == addr) {
                Some((_, group)) => group.push(idx),
                None => groups.push((addr, vec![idx])),
            }
        }

        for (idx, (addr, group)) in groups.into_iter().enumerate() {
            if idx >= SERVER_TOKEN_MAX {
                warn!(%addr, "too many listen addresses, skipping");
                continue;
            }
            let token = Token(idx);
            let mut listener = match TcpListener::bind(addr) {
                Ok(listener) => listener,
                Err(source) => {
                    let err = ServerError::Bind { addr, source };
                    error!(error = %err, "listener skipped");
                    continue;
                }
            };
            if let Err(source) = self.poll.registry().register(&mut listener, token, Interest::READABLE) {
                let err = ServerError::Register { addr, source };
                error!(error = %err, "listener skipped");
                continue;
            }

            let local = listener.local_addr().unwrap_or(addr);
            for &server_idx in &group {
                let server = &self.servers[server_idx];
                info!(server_name = %server.server_name, addr = %local, "bound to http://{}", local);
                if let Some(log) = &self.access_log {
                    if let Err(e) = log.log_server(server) {
                        warn!(error = %e, dir = %log.dir().display(), "location log unavailable");
                    }
                }
            }
            let body_limit = group
                .iter()
                .map(|&i| self.servers[i].max_body_bytes())
                .max()
                .unwrap_or(0);
            self.listeners.insert(token, ListenerEntry { listener, addr: local, group, body_limit });
        }

        if self.listeners.is_empty() {
            return Err(ServerError::NoListeners);
        }
        Ok(())
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<(Token, SocketAddr)> = self.listeners
            .iter()
            .map(|(&token, entry)| (token, entry.addr))
            .collect();
        addrs.sort_by_key(|(token, _)| token.0);
        addrs.into_iter().map(|(_, addr)| addr).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs the event loop until the shutdown flag is raised.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(listeners = self.listeners.len(), "event loop started");
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll_once(Some(self.options.poll_timeout)) {
                error!(error = %e, "poll failed");
            }
        }
        info!(connections = self.connections.len(), "shutting down");
        self.connections.clear();
        self.listeners.clear();
        Ok(())
    }

    /// Waits for one batch of events, handles it, then sweeps idle
    /// connections. Returns the number of events handled.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        let mut events = mem::replace(&mut self.events, Events::with_capacity(0));
        let polled = self.poll.poll(&mut events, timeout);
        let ready: Vec<Ready> = events
            .iter()
            .filter(|event| event.is_readable() || event.is_writable())
            .map(|event| Ready {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
            })
            .collect();
        self.events = events;

        match polled {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(ServerError::Poll(e)),
        }

        for event in &ready {
            if self.listeners.contains_key(&event.token) {
                self.accept_connections(event.token);
                continue;
            }
            if event.readable {
                self.read_from_client(event.token);
            }
            if event.writable {
                self.write_to_client(event.token);
            }
        }

        self.sweep_idle(Instant::now());
        Ok(ready.len())
    }

    /// Closes every connection idle for longer than the configured timeout.
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let timeout = self.options.idle_timeout;
        let expired: Vec<Token> = self.connections
            .iter()
            .filter(|(_, conn)| conn.is_idle(now, timeout))
            .map(|(&token, _)| token)
            .collect();

        for &token in &expired {
            debug!(token = token.0, "idle timeout");
            self.close_connection(token);
        }
        expired.len()
    }

    fn accept_connections(&mut self, listener_token: Token) {
        loop {
            let Some(entry) = self.listeners.get(&listener_token) else {
                return;
            };
            let (mut stream, peer) = match entry.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, addr = %entry.addr, "accept failed");
                    return;
                }
            };
            let body_limit = entry.body_limit;

            let token = Token(self.next_token);
            self.next_token += 1;
            let interest = Interest::READABLE | Interest::WRITABLE;
            if let Err(e) = self.poll.registry().register(&mut stream, token, interest) {
                warn!(error = %e, %peer, "failed to register connection");
                continue;
            }

            debug!(token = token.0, %peer, "new connection");
            self.connections.insert(token, Connection::new(stream, peer, listener_token, body_limit));
        }
    }

    fn read_from_client(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if conn.state == ConnectionState::WriteResponse {
            return;
        }

        let before = conn.request.raw.len();
        let fed = conn.request.feed(&mut conn.stream);
        if conn.request.raw.len() > before {
            conn.touch();
        }

        match fed {
            Ok(RequestState::Complete) => self.process_request(token),
            Ok(RequestState::Incomplete) => {}
            Err(FeedError::Closed) => {
                debug!(token = token.0, "peer closed connection");
                self.close_connection(token);
            }
            Err(FeedError::Io(e)) => {
                debug!(token = token.0, error = %e, "read failed");
                self.close_connection(token);
            }
        }
    }

    fn process_request(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let Some(entry) = self.listeners.get(&conn.listener) else {
            return;
        };

        let ctx = Context {
            servers: &self.servers,
            group: &entry.group,
            resolver: &self.resolver,
            peer: Some(conn.peer),
        };
        let response = respond(&conn.request, &ctx);

        info!(
            token = token.0,
            method = %conn.request.method,
            uri = %conn.request.uri,
            status = response.status,
            "request served"
        );
        if let Some(log) = &self.access_log {
            if let Err(e) = log.log_request(&conn.request, response.status) {
                warn!(error = %e, "request log unavailable");
            }
        }

        conn.queue_response(response.to_bytes(), response.keep_alive);
        self.write_to_client(token);
    }

    fn write_to_client(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if conn.state != ConnectionState::WriteResponse {
            return;
        }

        match conn.flush() {
            Ok(true) => {
                debug!(token = token.0, bytes = conn.bytes_written, "response sent");
                if conn.keep_alive {
                    conn.reset_for_next_request();
                    // the next request may already be waiting on the socket
                    self.read_from_client(token);
                } else {
                    self.close_connection(token);
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(token = token.0, error = %e, "write failed");
                self.close_connection(token);
            }
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(token = token.0, peer = %conn.peer, "connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenSpec;
    use crate::http::request::Method;
    use std::io::{ Read, Write };
    use std::net::{ Ipv4Addr, TcpStream };
    use tempfile::TempDir;

    fn tree_at(root: &std::path::Path) -> RouteTree {
        let mut server = ServerConfig::new(ListenSpec { host: Ipv4Addr::LOCALHOST, port: 0 });
        server.server_name = "example".to_string();
        server.root = format!("{}/", root.display());
        server.allow_methods = vec![Method::GET];
        RouteTree { servers: vec![server], rejected: Vec::new() }
    }

    fn options(idle: Duration) -> ServerOptions {
        ServerOptions { idle_timeout: idle, log_dir: None, ..ServerOptions::default() }
    }

    fn pump_until(server: &mut Server, mut done: impl FnMut(&Server) -> bool) {
        for _ in 0..50 {
            server.poll_once(Some(Duration::from_millis(20))).unwrap();
            if done(server) {
                return;
            }
        }
        panic!("condition not reached");
    }

    #[test]
    fn shared_listen_address_binds_once() {
        let tmp = TempDir::new().unwrap();
        let mut tree = tree_at(tmp.path());
        let mut second = tree.servers[0].clone();
        second.server_name = "other".to_string();
        second.listen.port = 0;
        tree.servers.push(second);

        let mut server = Server::new(tree, options(Duration::from_secs(60))).unwrap();
        server.bind().unwrap();
        assert_eq!(server.local_addrs().len(), 1);
    }

    #[test]
    fn idle_connection_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let mut server = Server::new(tree_at(tmp.path()), options(Duration::from_secs(60))).unwrap();
        server.bind().unwrap();
        let addr = server.local_addrs()[0];

        let _client = TcpStream::connect(addr).unwrap();
        pump_until(&mut server, |s| s.connection_count() == 1);

        assert_eq!(server.sweep_idle(Instant::now()), 0);
        assert_eq!(server.sweep_idle(Instant::now() + Duration::from_secs(61)), 1);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn keep_alive_serves_two_requests() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "first").unwrap();
        let mut server = Server::new(tree_at(tmp.path()), options(Duration::from_secs(60))).unwrap();
        server.bind().unwrap();
        let addr = server.local_addrs()[0];

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut received = Vec::new();
        let read_some = |client: &mut TcpStream, received: &mut Vec<u8>| {
            let mut buf = [0u8; 1024];
            if let Ok(n) = client.read(&mut buf) {
                received.extend_from_slice(&buf[..n]);
            }
        };

        for _ in 0..2 {
            client.write_all(b"GET /a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
            received.clear();
            for _ in 0..50 {
                server.poll_once(Some(Duration::from_millis(20))).unwrap();
                read_some(&mut client, &mut received);
                if received.ends_with(b"first") {
                    break;
                }
            }
            let text = String::from_utf8_lossy(&received);
            assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got {:?}", text);
            assert!(text.contains("Connection: keep-alive"));
        }
        assert_eq!(server.connection_count(), 1);
    }
}
