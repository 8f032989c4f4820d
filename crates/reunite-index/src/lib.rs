//! Embedding persistence (encrypted at rest) and approximate similarity search.

mod crypto;
mod error;
mod hnsw;
mod index;
mod store;

pub use crypto::{generate_key, EncryptionKey, KeyManager, StaticKeyManager};
pub use error::IndexError;
pub use index::{QueryFilters, SearchHit, SimilarityIndex, REGION_NAMES};
pub use store::EmbeddingStore;
