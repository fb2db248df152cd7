// Library exports for embedding and tests

pub mod config;
pub mod dom;
pub mod embedder;
pub mod frame;
pub mod js;
pub mod origin;

// Re-export commonly used types for tests
pub use config::ProxyConfig;
pub use embedder::{Embedder, RecordingEmbedder, TracingEmbedder};
pub use frame::{Frame, FrameId};
pub use js::{ExecutionProxy, Fault, ScriptSource, ScriptValue};
