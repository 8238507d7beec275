//! Shared reference state: the blob document, its read-side cache and the
//! node fetcher used by the update path.

pub mod blob;
pub mod cache;
pub mod fetcher;
pub mod reference;

pub use blob::{BlobConfig, BlobEntry, BlobStore};
pub use cache::StateCache;
pub use fetcher::{ChainFamily, StateFetcher};
pub use reference::{ReferenceState, StateDocument};
