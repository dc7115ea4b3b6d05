pub mod calls;
pub mod engine;
pub mod lock;

pub use engine::{EngineError, EngineEvent, SyncEngine};
