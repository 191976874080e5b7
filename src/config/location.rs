use tracing::warn;

use crate::config::models::{ DirectoryLocation, FileLocation, LocationNode };
use crate::config::parser::parse_methods;
use crate::config::tokens::Statement;
use crate::error::ConfigError;

#[derive(Debug, PartialEq, Eq)]
enum LocationKind {
    Directory,
    File,
}

fn classify(name: &str) -> Option<LocationKind> {
    if name.contains('/') {
        Some(LocationKind::Directory)
    } else if name.contains('*') || name.contains('.') {
        Some(LocationKind::File)
    } else {
        None
    }
}

fn location_name(args: &[String]) -> Result<&str, ConfigError> {
    match args {
        [name] => Ok(name.as_str()),
        [] => Err(ConfigError::MissingValue("location".to_string())),
        _ => Err(ConfigError::InvalidLocation(args.join(" "))),
    }
}

fn single_value(name: &str, args: &[String]) -> Result<String, ConfigError> {
    match args {
        [value] => Ok(value.clone()),
        [] => Err(ConfigError::MissingValue(name.to_string())),
        _ => Err(ConfigError::UnexpectedValue(name.to_string())),
    }
}

/// Parses one top-level `location` block. `Ok(None)` means the block was a
/// file location without a CGI binding or methods and has been dropped.
pub fn parse_location(args: &[String], body: &[Statement]) -> Result<Option<LocationNode>, ConfigError> {
    let name = location_name(args)?;
    match classify(name) {
        Some(LocationKind::Directory) => {
            parse_directory(name, body).map(|dir| Some(LocationNode::Directory(dir)))
        }
        Some(LocationKind::File) => {
            Ok(parse_file(name, body)?.map(LocationNode::File))
        }
        None => Err(ConfigError::InvalidLocation(name.to_string())),
    }
}

fn normalize_dir_name(name: &str) -> String {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
}

fn parse_directory(name: &str, body: &[Statement]) -> Result<DirectoryLocation, ConfigError> {
    let mut dir = DirectoryLocation {
        name: normalize_dir_name(name),
        ..Default::default()
    };

    for statement in body {
        match statement {
            Statement::Directive { name: key, args } => match key.as_str() {
                "alias" => {
                    dir.alias = Some(single_value(key, args)?);
                }
                "root" => {
                    dir.root = Some(single_value(key, args)?);
                }
                "redirect" => {
                    dir.redirect = Some(single_value(key, args)?);
                }
                "autoindex" => {
                    if !args.is_empty() {
                        return Err(ConfigError::UnexpectedValue(key.clone()));
                    }
                    dir.autoindex = true;
                }
                "index" => {
                    if args.is_empty() {
                        return Err(ConfigError::MissingValue(key.clone()));
                    }
                    dir.index = args.clone();
                }
                "allow_methods" => {
                    dir.allow_methods = parse_methods(args)?;
                }
                _ => {
                    return Err(ConfigError::UnknownDirective(key.clone()));
                }
            },
            Statement::Block { name: key, args, body } => {
                if key != "location" {
                    return Err(ConfigError::UnknownDirective(key.clone()));
                }
                let nested = location_name(args)?;
                if classify(nested) != Some(LocationKind::File) {
                    return Err(ConfigError::InvalidLocation(nested.to_string()));
                }
                if let Some(file) = parse_file(nested, body)? {
                    dir.files.push(file);
                }
            }
        }
    }

    if dir.root.is_some() && dir.redirect.is_some() {
        return Err(ConfigError::ConflictingDirectives("root", "redirect", dir.name));
    }
    if dir.alias.is_some() && dir.root.is_some() {
        return Err(ConfigError::ConflictingDirectives("alias", "root", dir.name));
    }
    Ok(dir)
}

fn parse_file(name: &str, body: &[Statement]) -> Result<Option<FileLocation>, ConfigError> {
    let mut file = FileLocation {
        name: name.to_string(),
        ..Default::default()
    };

    for statement in body {
        match statement {
            Statement::Directive { name: key, args } => match key.as_str() {
                "cgi_pass" => file.cgi_pass = single_value(key, args)?,
                "allow_methods" => file.allow_methods = parse_methods(args)?,
                _ => {
                    return Err(ConfigError::UnknownDirective(key.clone()));
                }
            },
            Statement::Block { name: key, .. } => {
                return Err(ConfigError::UnknownDirective(key.clone()));
            }
        }
    }

    if file.is_incomplete() {
        warn!(location = %file.name, "file location needs both cgi_pass and allow_methods, dropping it");
        return Ok(None);
    }
    Ok(Some(file))
}
