pub mod client;
pub mod error;
pub mod mock;
pub mod response;
pub mod retry;

pub use client::*;
pub use error::*;
pub use response::parse_response;
pub use retry::Resolver;
