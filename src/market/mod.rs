pub mod config;
pub mod lookup;

pub use lookup::{ChunkFailure, FetchOutcome, LookupClient};

#[cfg(test)]
pub(crate) mod mock;
