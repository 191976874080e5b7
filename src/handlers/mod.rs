pub mod cgi;
pub mod files;
pub mod listing;
