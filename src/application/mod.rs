pub mod compiler;
pub mod error;
pub mod executor;
pub mod pool;
pub mod service;
