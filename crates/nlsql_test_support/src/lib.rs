pub mod fake_driver;
pub mod fake_graph;
pub mod fake_llm;
pub mod fake_vector;
pub mod fixtures;

pub use fake_driver::{FakeDriver, FakeDriverStats, FakeQueryOutcome};
pub use fake_graph::FakeGraphBackend;
pub use fake_llm::{FakeLlmProvider, FakeLlmStats};
pub use fake_vector::FakeVectorBackend;
