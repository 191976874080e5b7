use std::fs::{ self, OpenOptions };
use std::io::{ self, Write };
use std::path::{ Path, PathBuf };

use chrono::Local;

use crate::config::{ LocationNode, ServerConfig };
use crate::http::request::Request;

const REQUEST_LOG: &str = "requests/requestlogs.log";
const LOCATION_LOG: &str = "locales/localgen.txt";
const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only request and location logs under one directory.
#[derive(Debug, Clone)]
pub struct AccessLog {
    dir: PathBuf,
}

impl AccessLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn request_log_path(&self) -> PathBuf {
        self.dir.join(REQUEST_LOG)
    }

    pub fn location_log_path(&self) -> PathBuf {
        self.dir.join(LOCATION_LOG)
    }

    /// Records one completed request: its request line and headers.
    pub fn log_request(&self, req: &Request, status: u16) -> io::Result<()> {
        let mut entry = format!("[{}] {} -> {}\n", timestamp(), req.first_line, status);
        let mut headers: Vec<_> = req.headers.iter().collect();
        headers.sort();
        for (name, value) in headers {
            entry.push_str(&format!("    {}: {}\n", name, value));
        }
        append(&self.request_log_path(), &entry)
    }

    /// Records a loaded server block and every location it declares.
    pub fn log_server(&self, server: &ServerConfig) -> io::Result<()> {
        let mut entry = format!(
            "[{}] server {} listening on {} root {}\n",
            timestamp(),
            server.server_name,
            server.listen.socket_addr(),
            server.root
        );
        for node in &server.locations {
            match node {
                LocationNode::Directory(dir) => {
                    entry.push_str(&format!(
                        "    directory {} methods {:?} autoindex {}\n",
                        dir.name,
                        dir.allow_methods,
                        dir.autoindex
                    ));
                    for file in &dir.files {
                        entry.push_str(&format!("        file {} cgi_pass {}\n", file.name, file.cgi_pass));
                    }
                }
                LocationNode::File(file) => {
                    entry.push_str(&format!("    file {} cgi_pass {}\n", file.name, file.cgi_pass));
                }
            }
        }
        append(&self.location_log_path(), &entry)
    }
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP).to_string()
}

fn append(path: &Path, entry: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(entry.as_bytes())
}
