pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod pool;
pub mod processor;
pub mod puller;
pub mod scanner;
pub mod store;
pub mod tags;
pub mod types;

pub use error::{HarvestError, Result};
pub use types::{Digest, RepositoryReference, TagInfo};
