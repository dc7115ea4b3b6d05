pub mod config;
pub mod mirror;
pub mod runtime;
pub mod sync;
