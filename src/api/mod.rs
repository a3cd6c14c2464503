pub mod client;
pub mod error;
pub mod types;

pub use client::GenerationClient;
pub use error::ClientError;
pub use types::{JobCommand, StartRequest, StartResponse, StatusResponse};
