pub mod location;
pub mod models;
pub mod parser;
pub mod tokens;

pub use models::{ DirectoryLocation, FileLocation, ListenSpec, LocationNode, RouteTree, ServerConfig };
pub use parser::{ load, load_in, parse_str, parse_str_in };
