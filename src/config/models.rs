use std::collections::HashMap;
use std::net::{ Ipv4Addr, SocketAddr, SocketAddrV4 };

use crate::error::ConfigError;
use crate::http::request::Method;

pub const DEFAULT_ROOT: &str = "./var/www/html/";
pub const DEFAULT_INDEX: [&str; 3] = ["index.htm", "index.html", "index.php"];
pub const DEFAULT_MAX_BODY_MB: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenSpec {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl ListenSpec {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }
}

/// A `location *.py { ... }` block: a CGI binding for a file extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLocation {
    pub name: String,
    pub cgi_pass: String,
    pub allow_methods: Vec<Method>,
}

impl FileLocation {
    /// The `.ext` part of the pattern, e.g. `.py` for `*.py`.
    pub fn extension(&self) -> Option<&str> {
        self.name.rfind('.').map(|pos| &self.name[pos..])
    }

    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extension() == Some(ext)
    }

    pub fn allows(&self, method: Method) -> bool {
        self.allow_methods.contains(&method)
    }

    /// True when a file location would not survive loading.
    pub fn is_incomplete(&self) -> bool {
        self.cgi_pass.is_empty() || self.allow_methods.is_empty()
    }
}

/// A `location /path { ... }` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub name: String,
    pub alias: Option<String>,
    pub redirect: Option<String>,
    pub root: Option<String>,
    pub autoindex: bool,
    pub index: Vec<String>,
    pub allow_methods: Vec<Method>,
    pub files: Vec<FileLocation>,
}

impl DirectoryLocation {
    pub fn allows(&self, method: Method) -> bool {
        self.allow_methods.contains(&method)
    }

    /// Whether `uri` lies under this location on a path-segment boundary.
    pub fn is_prefix_of(&self, uri: &str) -> bool {
        if self.name == "/" {
            return uri.starts_with('/');
        }
        match uri.strip_prefix(self.name.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationNode {
    Directory(DirectoryLocation),
    File(FileLocation),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: ListenSpec,
    pub server_name: String,
    pub root: String,
    pub index: Vec<String>,
    pub allow_methods: Vec<Method>,
    pub error_pages: HashMap<u16, String>,
    /// Megabytes.
    pub client_max_body_size: usize,
    pub locations: Vec<LocationNode>,
}

impl ServerConfig {
    pub fn new(listen: ListenSpec) -> Self {
        Self {
            listen,
            server_name: String::new(),
            root: DEFAULT_ROOT.to_string(),
            index: DEFAULT_INDEX.iter().map(|s| s.to_string()).collect(),
            allow_methods: Vec::new(),
            error_pages: HashMap::new(),
            client_max_body_size: DEFAULT_MAX_BODY_MB,
            locations: Vec::new(),
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.client_max_body_size * 1024 * 1024
    }

    pub fn allows(&self, method: Method) -> bool {
        self.allow_methods.contains(&method)
    }

    pub fn directories(&self) -> impl Iterator<Item = &DirectoryLocation> {
        self.locations.iter().filter_map(|node| match node {
            LocationNode::Directory(dir) => Some(dir),
            LocationNode::File(_) => None,
        })
    }

    pub fn directory(&self, name: &str) -> Option<&DirectoryLocation> {
        self.directories().find(|dir| dir.name == name)
    }

    /// Every file location, top-level ones first, then those nested in
    /// directory blocks in declaration order.
    pub fn file_locations(&self) -> impl Iterator<Item = &FileLocation> {
        let top = self.locations.iter().filter_map(|node| match node {
            LocationNode::File(file) => Some(file),
            LocationNode::Directory(_) => None,
        });
        top.chain(self.directories().flat_map(|dir| dir.files.iter()))
    }
}

/// Every server block accepted from one configuration file.
#[derive(Debug, Default)]
pub struct RouteTree {
    pub servers: Vec<ServerConfig>,
    /// Blocks that failed to load, by position in the file.
    pub rejected: Vec<(usize, ConfigError)>,
}

impl RouteTree {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
