//! # stickyd-http
//!
//! Single-route HTTP/1.1 server on a small group of mio event loops, with
//! the service call offloaded to the stickyd worker scheduler.
//!
//! The property everything here is built around: a request accepted on
//! one event loop is answered from that same loop. Worker tasks never
//! touch sockets or response buffers; they hand their outcome back through
//! the connection's [`ConnHandle`] and the owning loop encodes and writes.
//!
//! ```ignore
//! use stickyd_http::{Server, ServerConfig};
//!
//! let mut server = Server::bind(ServerConfig::from_env())?;
//! println!("listening on {}", server.local_addr());
//! // ...
//! server.shutdown();
//! ```
//!
//! ## Modules
//!
//! - `config` - Server configuration (defaults, env, builder)
//! - `codec` - Request decoder
//! - `dispatch` - Inline / offloaded service execution
//! - `encode` - Response encoding into pooled buffers
//! - `listener` - Listening socket and acceptor
//! - `watchdog` - Stall detection for offloaded completions

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod encode;
pub mod error;
pub mod listener;
pub mod watchdog;

mod connection;
mod event_loop;
mod server;
mod stats;

pub use codec::{Decoder, Message, Method, Request, Version};
pub use config::ServerConfig;
pub use dispatch::{
    ConnHandle, DispatchConfig, ExecutionMode, HelloService, Service, ServiceError, ServiceFuture,
    ServiceOutcome,
};
pub use encode::{encode_response, Response, Status};
pub use error::{DecodeError, ServerError, ServerResult};
pub use event_loop::LoopHandle;
pub use server::Server;
pub use stats::StatsSnapshot;
pub use watchdog::{StallAction, WatchdogConfig};
