mod in_process;
mod store;

pub use in_process::InProcessGraphBackend;
pub use store::{property_key, GraphStore, DEFAULT_MAX_JOIN_DEPTH};
