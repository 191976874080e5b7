use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while loading a configuration file.
///
/// Everything except [`ConfigError::Io`] is scoped to a single `server`
/// block: the block is discarded and the remaining blocks keep loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid server block: unbalanced braces")]
    UnbalancedBraces,

    #[error("server block must start with `server {{`")]
    MissingServerHeader,

    #[error("endline delimiter wrong/missing before `{0}`")]
    MissingSemicolon(String),

    #[error("duplicate `{0}` directive")]
    DuplicateDirective(String),

    #[error("no server name defined in server block")]
    MissingServerName,

    #[error("multiple server names defined in server block")]
    MultipleServerNames,

    #[error("no `listen` directive in server block")]
    MissingListen,

    #[error("invalid listen address `{0}`")]
    InvalidListen(String),

    #[error("port out of range: {0}")]
    PortOutOfRange(String),

    #[error("path does not exist: {0}")]
    RootNotFound(String),

    #[error("undefined method `{0}`")]
    InvalidMethod(String),

    #[error("invalid client_max_body_size `{0}`")]
    InvalidBodySize(String),

    #[error("invalid error_page directive: {0}")]
    InvalidErrorPage(String),

    #[error("invalid location `{0}`")]
    InvalidLocation(String),

    #[error("conflicting `{0}` and `{1}` directives in location `{2}`")]
    ConflictingDirectives(&'static str, &'static str, String),

    #[error("location `{0}` defined twice")]
    DuplicateLocation(String),

    #[error("`{0}` requires a value")]
    MissingValue(String),

    #[error("`{0}` takes no values")]
    UnexpectedValue(String),

    #[error("unknown directive `{0}`")]
    UnknownDirective(String),
}

/// Rejections of a request line or its framing, each mapped to the status
/// code sent back to the client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("unsupported HTTP version `{0}`")]
    UnsupportedVersion(String),

    #[error("unsupported method `{0}`")]
    UnsupportedMethod(String),

    #[error("missing Host header")]
    MissingHost,

    #[error("host `{0}` is not served here")]
    UnknownHost(String),

    #[error("request body of {0} bytes exceeds the limit")]
    PayloadTooLarge(usize),
}

impl ProtocolError {
    pub fn status(&self) -> u16 {
        match self {
            ProtocolError::MalformedRequestLine
            | ProtocolError::UnsupportedVersion(_)
            | ProtocolError::MissingHost => 403,
            ProtocolError::UnsupportedMethod(_) | ProtocolError::UnknownHost(_) => 400,
            ProtocolError::PayloadTooLarge(_) => 413,
        }
    }
}

/// Malformed body framing found while extracting a completed request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid chunk size line `{0}`")]
    InvalidChunkSize(String),

    #[error("chunk data truncated")]
    TruncatedChunk,

    #[error("chunk data not followed by CRLF")]
    MissingChunkDelimiter,

    #[error("final multipart boundary not found")]
    MissingFinalBoundary,
}

/// Why a connection could not be fed any further.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("peer closed the connection before the request was complete")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum CgiError {
    #[error("failed to execute CGI `{script}`: {source}")]
    Spawn {
        script: String,
        #[source]
        source: io::Error,
    },

    #[error("CGI pipe failure: {0}")]
    Io(#[from] io::Error),

    #[error("CGI `{0}` exited unsuccessfully without output")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create poll instance: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to register {addr} with the poller: {source}")]
    Register {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("no ports could be bound")]
    NoListeners,
}
