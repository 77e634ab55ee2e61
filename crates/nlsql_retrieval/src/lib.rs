mod embedder;
mod in_process;
mod store;

pub use embedder::{EmbedError, Embedder, HashingEmbedder};
pub use in_process::InProcessVectorBackend;
pub use store::{RetrievalError, RetrievalStore, SearchFilter, DEFAULT_SIMILARITY_THRESHOLD};
