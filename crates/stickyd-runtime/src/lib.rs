//! # stickyd-runtime
//!
//! Worker scheduler used to run blocking-style service calls off the
//! network I/O threads.
//!
//! Tasks are ordinary `Future`s multiplexed over a small set of carrier
//! threads. A task that sleeps or waits returns `Pending` and gives its
//! carrier back; a task that must make a genuinely blocking call wraps it
//! in [`block_in_place`], which lets the scheduler start a compensating
//! carrier so the runnable count stays above `min_runnable`.
//!
//! ```ignore
//! use stickyd_runtime::{Scheduler, SchedulerConfig, sleep};
//! use std::time::Duration;
//!
//! let sched = Scheduler::new(SchedulerConfig::new().parallelism(2))?;
//! sched.start()?;
//! sched.verify_parallelism(Duration::from_secs(2))?;
//!
//! let h = sched.spawn_with_handle(async {
//!     sleep(Duration::from_millis(1)).await;
//!     "Hello World!"
//! })?;
//! assert_eq!(h.join()?, "Hello World!");
//! sched.shutdown();
//! ```

pub mod config;
pub mod error;
pub mod parking;
pub mod ready_queue;
pub mod timer;

mod blocking;
mod carrier;
mod executor;
mod scheduler;
mod task;
mod time;

pub use blocking::block_in_place;
pub use carrier::{current_carrier, on_carrier};
pub use config::SchedulerConfig;
pub use error::{SchedError, SchedResult};
pub use executor::block_on;
pub use scheduler::{SchedStats, Scheduler, SchedulerHandle};
pub use task::JoinHandle;
pub use time::{sleep, timeout, Elapsed, Sleep, Timeout};
