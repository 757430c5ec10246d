//! Object storage backend implementations.

pub mod memory;

#[cfg(feature = "aws")]
pub mod s3;
