//! Application services: pooling, rendering and lifecycle.

pub mod artifact;
pub mod engine;
pub mod error;
pub mod pool;
pub mod render;
pub mod shutdown;
