use std::io;
use std::net::SocketAddr;

use tracing::{ error, warn };

use crate::config::ServerConfig;
use crate::handlers::{ cgi, files, listing };
use crate::http::request::Request;
use crate::http::response::Response;
use crate::routing::{ select_server, Resolver, RoutingDecision };

/// Everything a completed request is answered against.
pub struct Context<'a> {
    pub servers: &'a [ServerConfig],
    /// Server blocks sharing the listener the request arrived on.
    pub group: &'a [usize],
    pub resolver: &'a Resolver,
    pub peer: Option<SocketAddr>,
}

impl Context<'_> {
    fn error(&self, status: u16, server: Option<&ServerConfig>) -> Response {
        Response::error(status, server, self.resolver.base_dir())
    }
}

/// Builds the response for a completed request.
pub fn respond(req: &Request, ctx: &Context<'_>) -> Response {
    let default = ctx.group.first().map(|&idx| &ctx.servers[idx]);

    if req.is_oversized() && req.host.is_empty() {
        warn!(received = req.raw.len(), "request exceeds the buffer limit");
        return ctx.error(413, default);
    }
    if let Err(e) = req.validate() {
        warn!(error = %e, line = %req.first_line, "request rejected");
        return ctx.error(e.status(), default);
    }
    let server = match select_server(ctx.servers, ctx.group, &req.host) {
        Ok(idx) => &ctx.servers[idx],
        Err(e) => {
            warn!(error = %e, "request rejected");
            return ctx.error(e.status(), default);
        }
    };
    if let Err(e) = req.check_body_size(server.max_body_bytes()) {
        warn!(error = %e, limit_mb = server.client_max_body_size, "request rejected");
        return ctx.error(e.status(), Some(server));
    }
    if let Some(e) = req.body_error() {
        warn!(error = %e, "malformed request body");
        return ctx.error(400, Some(server));
    }

    let response = execute(ctx.resolver.resolve(req, server), req, server, ctx);
    if response.status >= 400 || !req.keep_alive() { response.close() } else { response }
}

fn execute(decision: RoutingDecision, req: &Request, server: &ServerConfig, ctx: &Context<'_>) -> Response {
    match decision {
        RoutingDecision::Serve(path, status) => match files::read_file(&path) {
            Ok((content, mime)) => Response::new(status).with_body(content, mime),
            Err(e) => ctx.error(io_status(&e), Some(server)),
        },
        RoutingDecision::Redirect(location, status) => Response::redirect(&location, status),
        RoutingDecision::List(dir) => match listing::render(&dir, &req.uri) {
            Ok(html) => Response::ok(html.into_bytes(), "text/html"),
            Err(e) => ctx.error(io_status(&e), Some(server)),
        },
        RoutingDecision::Cgi(target) => match cgi::execute(&target, req, server, ctx.peer) {
            Ok(output) => Response::from_cgi(output),
            Err(e) => {
                error!(error = %e, script = %target.script_name, "CGI failed");
                ctx.error(500, Some(server))
            }
        },
        RoutingDecision::Delete(path) => match files::delete_file(&path) {
            Ok(()) => Response::no_content(),
            Err(e) => ctx.error(io_status(&e), Some(server)),
        },
        RoutingDecision::NoContent => Response::no_content(),
        RoutingDecision::Error(status) => ctx.error(status, Some(server)),
    }
}

fn io_status(e: &io::Error) -> u16 {
    match e.kind() {
        io::ErrorKind::NotFound => 404,
        io::ErrorKind::PermissionDenied => 403,
        _ => 500,
    }
}
