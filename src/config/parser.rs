use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use tracing::{ error, info };

use crate::config::location::parse_location;
use crate::config::models::{ ListenSpec, LocationNode, RouteTree, ServerConfig };
use crate::config::tokens::{
    check_duplicates,
    check_semicolons,
    parse_statements,
    split_server_blocks,
    tokenize,
    Statement,
};
use crate::error::ConfigError;
use crate::http::request::Method;

/// Loads every server block of a configuration file.
///
/// Only an unreadable file fails the whole load; a malformed block is
/// logged, recorded in [`RouteTree::rejected`] and skipped.
pub fn load(path: impl AsRef<Path>) -> Result<RouteTree, ConfigError> {
    load_in(path, ".")
}

/// Like [`load`], with relative roots checked against `base_dir`.
pub fn load_in(path: impl AsRef<Path>, base_dir: impl AsRef<Path>) -> Result<RouteTree, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(parse_str_in(&content, base_dir.as_ref()))
}

pub fn parse_str(content: &str) -> RouteTree {
    parse_str_in(content, Path::new("."))
}

pub fn parse_str_in(content: &str, base_dir: &Path) -> RouteTree {
    let mut tree = RouteTree::default();

    for (idx, block) in split_server_blocks(content).iter().enumerate() {
        match parse_server_block(block, base_dir) {
            Ok(server) => {
                info!(
                    block = idx + 1,
                    server_name = %server.server_name,
                    listen = %server.listen.socket_addr(),
                    locations = server.locations.len(),
                    "server block loaded"
                );
                tree.servers.push(server);
            }
            Err(e) => {
                error!(block = idx + 1, error = %e, "server block rejected");
                tree.rejected.push((idx, e));
            }
        }
    }
    tree
}

/// Parses one `server { ... }` block. `root` must name an existing
/// directory once joined onto `base_dir`.
pub fn parse_server_block(block: &str, base_dir: &Path) -> Result<ServerConfig, ConfigError> {
    let tokens = tokenize(block);
    check_semicolons(&tokens)?;
    check_duplicates(&tokens)?;
    let body = parse_statements(&tokens)?;

    let listen = parse_listen(&body)?;
    let mut server = ServerConfig::new(listen);
    server.server_name = parse_server_name(&body)?;

    for statement in &body {
        match statement {
            Statement::Directive { name, args } => match name.as_str() {
                "listen" | "server_name" => {}
                "root" => server.root = parse_root(args)?,
                "index" => {
                    if args.is_empty() {
                        return Err(ConfigError::MissingValue(name.clone()));
                    }
                    server.index = args.clone();
                }
                "allow_methods" => server.allow_methods = parse_methods(args)?,
                "error_page" => {
                    let (codes, path) = parse_error_page(args)?;
                    for code in codes {
                        server.error_pages.insert(code, path.clone());
                    }
                }
                "client_max_body_size" => {
                    server.client_max_body_size = parse_body_size(args)?;
                }
                _ => {
                    return Err(ConfigError::UnknownDirective(name.clone()));
                }
            },
            Statement::Block { name, .. } if name != "location" => {
                return Err(ConfigError::UnknownDirective(name.clone()));
            }
            Statement::Block { .. } => {}
        }
    }

    if !base_dir.join(&server.root).exists() {
        return Err(ConfigError::RootNotFound(server.root));
    }

    server.locations = parse_locations(&body)?;
    Ok(server)
}

fn parse_listen(body: &[Statement]) -> Result<ListenSpec, ConfigError> {
    let mut listens = body.iter().filter_map(|statement| match statement {
        Statement::Directive { name, args } if name == "listen" => Some(args),
        _ => None,
    });

    let args = listens.next().ok_or(ConfigError::MissingListen)?;
    if listens.next().is_some() {
        return Err(ConfigError::DuplicateDirective("listen".to_string()));
    }
    let address = match args.as_slice() {
        [address] => address.as_str(),
        _ => return Err(ConfigError::InvalidListen(args.join(" "))),
    };

    let (host, port) = match address.split_once(':') {
        Some((host, port)) => (parse_host(host)?, port),
        None => (Ipv4Addr::UNSPECIFIED, address),
    };

    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidListen(address.to_string()));
    }
    let port = match port.parse::<u32>() {
        Ok(p) if p > 0 && p < 65535 => p as u16,
        _ => return Err(ConfigError::PortOutOfRange(port.to_string())),
    };
    Ok(ListenSpec { host, port })
}

fn parse_host(host: &str) -> Result<Ipv4Addr, ConfigError> {
    match host {
        "localhost" => Ok(Ipv4Addr::LOCALHOST),
        _ => host.parse().map_err(|_| ConfigError::InvalidListen(host.to_string())),
    }
}

fn parse_server_name(body: &[Statement]) -> Result<String, ConfigError> {
    let args = body
        .iter()
        .find_map(|statement| match statement {
            Statement::Directive { name, args } if name == "server_name" => Some(args),
            _ => None,
        })
        .ok_or(ConfigError::MissingServerName)?;

    match args.as_slice() {
        [name] => Ok(name.clone()),
        [] => Err(ConfigError::MissingServerName),
        _ => Err(ConfigError::MultipleServerNames),
    }
}

fn parse_root(args: &[String]) -> Result<String, ConfigError> {
    let mut root = match args {
        [root] => root.clone(),
        [] => return Err(ConfigError::MissingValue("root".to_string())),
        _ => return Err(ConfigError::UnexpectedValue("root".to_string())),
    };
    if !root.ends_with('/') {
        root.push('/');
    }
    Ok(root)
}

pub(crate) fn parse_methods(args: &[String]) -> Result<Vec<Method>, ConfigError> {
    if args.is_empty() {
        return Err(ConfigError::MissingValue("allow_methods".to_string()));
    }
    let mut methods = Vec::with_capacity(args.len());
    for token in args {
        let method = Method::from_str(token).ok_or_else(|| ConfigError::InvalidMethod(token.clone()))?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}

fn parse_error_page(args: &[String]) -> Result<(Vec<u16>, String), ConfigError> {
    let Some((path, codes)) = args.split_last() else {
        return Err(ConfigError::MissingValue("error_page".to_string()));
    };
    if codes.is_empty() || !path.starts_with('/') {
        return Err(ConfigError::InvalidErrorPage(args.join(" ")));
    }

    let codes = codes
        .iter()
        .map(|code| match code.parse::<u16>() {
            Ok(c) if (300..=599).contains(&c) => Ok(c),
            _ => Err(ConfigError::InvalidErrorPage(code.clone())),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((codes, path.clone()))
}

fn parse_body_size(args: &[String]) -> Result<usize, ConfigError> {
    let value = match args {
        [value] => value,
        [] => return Err(ConfigError::MissingValue("client_max_body_size".to_string())),
        _ => return Err(ConfigError::InvalidBodySize(args.join(" "))),
    };
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidBodySize(value.clone()));
    }
    match value.parse::<usize>() {
        Ok(size) if (1..=1024).contains(&size) => Ok(size),
        _ => Err(ConfigError::InvalidBodySize(value.clone())),
    }
}

fn parse_locations(body: &[Statement]) -> Result<Vec<LocationNode>, ConfigError> {
    let mut locations = Vec::new();
    let mut seen = HashSet::new();

    for statement in body {
        let Statement::Block { name, args, body } = statement else {
            continue;
        };
        if name != "location" {
            continue;
        }
        let Some(node) = parse_location(args, body)? else {
            continue;
        };
        if let LocationNode::Directory(dir) = &node {
            if !seen.insert(dir.name.clone()) {
                return Err(ConfigError::DuplicateLocation(dir.name.clone()));
            }
        }
        locations.push(node);
    }
    Ok(locations)
}
