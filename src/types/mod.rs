mod digest;
mod manifest;
mod repository;
mod tag;

pub use digest::Digest;
pub use manifest::{Descriptor, MANIFEST_ACCEPT, Manifest};
pub use repository::RepositoryReference;
pub use tag::{TagInfo, TagPage};
