use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::process::{ Command, ExitStatus, Stdio };
use std::thread;

use tracing::{ debug, warn };

use crate::config::ServerConfig;
use crate::error::CgiError;
use crate::http::request::Request;
use crate::routing::CgiTarget;

/// What a finished script left behind.
#[derive(Debug)]
pub struct CgiOutput {
    pub stdout: Vec<u8>,
    pub status: ExitStatus,
}

/// Interpreter for a script, picked by extension. `None` runs the script
/// itself.
pub fn interpreter_for(script: &Path) -> Option<&'static str> {
    match script.extension().and_then(|ext| ext.to_str()) {
        Some("py") => Some("python3"),
        Some("php") => Some("php-cgi"),
        Some("sh") => Some("sh"),
        _ => None,
    }
}

pub fn build_env(
    target: &CgiTarget,
    req: &Request,
    server: &ServerConfig,
    peer: Option<SocketAddr>
) -> HashMap<String, String> {
    let content_length = req
        .content_length
        .unwrap_or(req.body.len())
        .to_string();
    let remote_addr = peer.map(|addr| addr.ip().to_string()).unwrap_or_default();

    let vars = [
        ("AUTH_TYPE", String::new()),
        ("CONTENT_LENGTH", content_length),
        ("CONTENT_TYPE", req.content_type.clone()),
        ("GATEWAY_INTERFACE", "CGI/1.1".to_string()),
        ("PATH_INFO", target.path_info.clone()),
        ("PATH_TRANSLATED", target.path_translated.clone()),
        ("QUERY_STRING", target.query.clone()),
        ("REMOTE_ADDR", remote_addr),
        ("REMOTE_HOST", String::new()),
        ("REMOTE_IDENT", String::new()),
        ("REMOTE_USER", String::new()),
        ("REQUEST_METHOD", req.method.clone()),
        ("SCRIPT_NAME", target.script_name.clone()),
        ("SERVER_NAME", server.server_name.clone()),
        ("SERVER_PORT", server.listen.port.to_string()),
        ("SERVER_PROTOCOL", req.version.clone()),
        ("SERVER_SOFTWARE", format!("webserv/{}", env!("CARGO_PKG_VERSION"))),
        ("FILENAME", req.filename.clone()),
    ];
    vars.into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Runs the script to completion with `body` on stdin and a clean
/// environment made of `env_vars`.
///
/// The child starts in the script's directory, so the script is resolved
/// to an absolute path first.
pub fn run_script(script: &Path, body: &[u8], env_vars: HashMap<String, String>) -> Result<CgiOutput, CgiError> {
    let spawn_error = |source| CgiError::Spawn {
        script: script.display().to_string(),
        source,
    };
    let script = script.canonicalize().map_err(spawn_error)?;

    let mut command = match interpreter_for(&script) {
        Some(interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.arg(&script);
            cmd
        }
        None => Command::new(&script),
    };
    if let Some(dir) = script.parent() {
        command.current_dir(dir);
    }

    let mut child = command
        .env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .envs(env_vars)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(spawn_error)?;

    let stdin = child.stdin.take();
    // stdout is drained while the body is still being written
    let output = thread::scope(|scope| {
        if let Some(mut stdin) = stdin {
            scope.spawn(move || {
                if body.is_empty() {
                    return;
                }
                // a script that never reads its input closes the pipe early
                if let Err(e) = stdin.write_all(body) {
                    debug!(error = %e, "CGI stdin closed early");
                }
            });
        }
        child.wait_with_output()
    })?;

    Ok(CgiOutput {
        stdout: output.stdout,
        status: output.status,
    })
}

/// Executes a routed CGI request and returns the page it produced.
pub fn execute(
    target: &CgiTarget,
    req: &Request,
    server: &ServerConfig,
    peer: Option<SocketAddr>
) -> Result<Vec<u8>, CgiError> {
    let env_vars = build_env(target, req, server, peer);
    let output = run_script(&target.script, &req.body, env_vars)?;

    if !output.status.success() {
        warn!(script = %target.script.display(), status = %output.status, "CGI exited unsuccessfully");
        if output.stdout.is_empty() {
            return Err(CgiError::Failed(target.script_name.clone()));
        }
    }
    Ok(output.stdout)
}
