pub mod client;
pub mod error;
pub mod wire;

pub use client::PortalClient;
pub use error::ApiError;
