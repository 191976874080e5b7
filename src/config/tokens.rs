use std::collections::HashMap;

use crate::error::ConfigError;

/// Directives that must open a statement.
pub const KEYWORDS: [&str; 12] = [
    "listen",
    "server_name",
    "root",
    "index",
    "allow_methods",
    "error_page",
    "client_max_body_size",
    "cgi_pass",
    "redirect",
    "autoindex",
    "alias",
    "location",
];

/// Directives allowed at most once per scope.
pub const UNIQUE_DIRECTIVES: [&str; 8] = [
    "index",
    "root",
    "client_max_body_size",
    "allow_methods",
    "alias",
    "server_name",
    "cgi_pass",
    "autoindex",
];

/// Splits a config file into raw `server` blocks.
///
/// A line whose first word is `server` opens a new block; everything up to
/// the next such line belongs to the current one. Comments are dropped.
pub fn split_server_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut buffer = String::new();

    for raw_line in content.lines() {
        let line = strip_comment(raw_line);
        if line.trim().is_empty() {
            continue;
        }

        let first = line.split_whitespace().next().unwrap_or("");
        let opens_block = first == "server" || first.starts_with("server{");
        if opens_block && !buffer.trim().is_empty() {
            blocks.push(std::mem::take(&mut buffer));
        }
        buffer.push_str(line);
        buffer.push('\n');
    }

    if !buffer.trim().is_empty() {
        blocks.push(buffer);
    }
    blocks
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Splits a block into words, with `;`, `{` and `}` as standalone tokens.
pub fn tokenize(block: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    for c in block.chars() {
        match c {
            ';' | '{' | '}' => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
            }
            _ => word.push(c),
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

pub fn check_braces(tokens: &[String]) -> Result<(), ConfigError> {
    let mut depth: usize = 0;
    for token in tokens {
        match token.as_str() {
            "{" => depth += 1,
            "}" => {
                depth = depth.checked_sub(1).ok_or(ConfigError::UnbalancedBraces)?;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ConfigError::UnbalancedBraces);
    }
    Ok(())
}

fn opens_statement(prev: &str) -> bool {
    matches!(prev, ";" | "{" | "}")
}

/// Every keyword must start a statement and every `}` must close one.
pub fn check_semicolons(tokens: &[String]) -> Result<(), ConfigError> {
    if tokens.len() < 2 || tokens[0] != "server" || tokens[1] != "{" {
        return Err(ConfigError::MissingServerHeader);
    }
    check_braces(tokens)?;

    for pair in tokens[1..].windows(2) {
        let (prev, current) = (pair[0].as_str(), pair[1].as_str());
        let is_keyword = KEYWORDS.contains(&current);
        if (is_keyword || current == "}") && !opens_statement(prev) {
            return Err(ConfigError::MissingSemicolon(current.to_string()));
        }
    }
    Ok(())
}

/// Rejects a unique directive repeated in the same brace scope. Nested
/// `location` scopes keep their own counts.
pub fn check_duplicates(tokens: &[String]) -> Result<(), ConfigError> {
    let mut scopes: Vec<HashMap<&str, usize>> = vec![HashMap::new()];
    let mut at_statement_start = true;

    for token in tokens {
        match token.as_str() {
            "{" => {
                scopes.push(HashMap::new());
                at_statement_start = true;
            }
            "}" => {
                scopes.pop();
                at_statement_start = true;
            }
            ";" => at_statement_start = true,
            word => {
                if at_statement_start && UNIQUE_DIRECTIVES.contains(&word) {
                    let scope = scopes.last_mut().ok_or(ConfigError::UnbalancedBraces)?;
                    let count = scope.entry(word).or_insert(0);
                    *count += 1;
                    if *count > 1 {
                        return Err(ConfigError::DuplicateDirective(word.to_string()));
                    }
                }
                at_statement_start = false;
            }
        }
    }
    Ok(())
}

/// A statement of the block grammar: either `name args... ;` or
/// `name args... { children }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Directive { name: String, args: Vec<String> },
    Block { name: String, args: Vec<String>, body: Vec<Statement> },
}

/// Builds the statement tree of an already validated block. Returns the
/// body of the outer `server { ... }`.
pub fn parse_statements(tokens: &[String]) -> Result<Vec<Statement>, ConfigError> {
    if tokens.len() < 2 || tokens[0] != "server" || tokens[1] != "{" {
        return Err(ConfigError::MissingServerHeader);
    }
    let mut pos = 2;
    let body = parse_body(tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(ConfigError::UnbalancedBraces);
    }
    Ok(body)
}

fn parse_body(tokens: &[String], pos: &mut usize) -> Result<Vec<Statement>, ConfigError> {
    let mut statements = Vec::new();
    let mut words: Vec<String> = Vec::new();

    while *pos < tokens.len() {
        let token = tokens[*pos].as_str();
        *pos += 1;
        match token {
            ";" => {
                let mut parts = std::mem::take(&mut words).into_iter();
                if let Some(name) = parts.next() {
                    statements.push(Statement::Directive { name, args: parts.collect() });
                }
            }
            "{" => {
                let mut parts = std::mem::take(&mut words).into_iter();
                let name = parts.next().ok_or(ConfigError::UnbalancedBraces)?;
                let body = parse_body(tokens, pos)?;
                statements.push(Statement::Block { name, args: parts.collect(), body });
            }
            "}" => {
                if let Some(word) = words.first() {
                    return Err(ConfigError::MissingSemicolon(word.clone()));
                }
                return Ok(statements);
            }
            word => words.push(word.to_string()),
        }
    }
    Err(ConfigError::UnbalancedBraces)
}
