pub mod chunked;
pub mod request;
pub mod response;
pub mod status;

pub use request::{ Method, Request, RequestState };
pub use response::Response;
