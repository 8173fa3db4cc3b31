//! # stickyd-core
//!
//! Core types shared by the stickyd worker scheduler and HTTP front end.
//!
//! This crate has no OS-specific code and no threads of its own.
//!
//! ## Modules
//!
//! - `id` - Connection, event loop and task identifiers
//! - `arena` - Pooled buffer allocator (lock-free size classes)
//! - `cancel` - Cancellation token for cooperative cancellation
//! - `error` - Error types
//! - `spinlock` - Internal spinlock primitive
//! - `env` - Environment variable utilities
//! - `log` - tracing subscriber setup

pub mod id;
pub mod arena;
pub mod cancel;
pub mod error;
pub mod spinlock;
pub mod env;
pub mod log;

// Re-exports for convenience
pub use id::{ConnId, LoopId, TaskId};
pub use arena::{BufferPool, BufferProvider, BufferStats, HeapBuffers, PooledArena, PooledBuf};
pub use cancel::CancellationToken;
pub use error::{ConfigError, CoreError, CoreResult};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_millis, env_get_opt};
pub use log::init_logging;
