//! # stickyd
//!
//! Hello-world HTTP/1.1 server. Connections are accepted round-robin onto
//! a few mio event loops, the service call runs on the stickyd worker
//! scheduler, and every response is written by the loop that accepted
//! the connection.
//!
//! ## Usage
//!
//!     cargo run -p stickyd --release -- [--port 8080] [--io-threads 1] [--parallelism 1]
//!
//! Every flag defaults to its `STICKYD_*` environment variable, then to the
//! built-in default. `STICKYD_LOG` sets the tracing filter.
//!
//! ## Benchmark
//!
//!     wrk -t4 -c1000 -d10s http://127.0.0.1:8080/

use std::ffi::c_int;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use stickyd_http::{ExecutionMode, Server, ServerConfig, StallAction};
use tracing::{error, info, warn};

static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Debug, Parser)]
#[command(name = "stickyd", version, about = "Hello-world HTTP/1.1 server on sticky event loops")]
struct Args {
    /// TCP port to listen on (0.0.0.0)
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of event-loop threads
    #[arg(long)]
    io_threads: Option<usize>,

    /// Worker carriers kept runnable
    #[arg(short = 'w', long)]
    parallelism: Option<usize>,

    /// Carrier ceiling including blocking compensation
    #[arg(long)]
    max_pool_size: Option<usize>,

    /// Runnable floor before a blocking call is compensated
    #[arg(long)]
    min_runnable: Option<usize>,

    /// Run the service on the event loop instead of the scheduler
    #[arg(long)]
    run_on_event_loop: bool,

    /// Allocate response buffers from the heap instead of the pool
    #[arg(long)]
    heap_buffers: bool,

    /// Simulated service latency
    #[arg(long, value_name = "MS")]
    service_delay_ms: Option<u64>,

    /// Answer 503 when the service takes longer (0 = no limit)
    #[arg(long, value_name = "MS")]
    service_timeout_ms: Option<u64>,

    /// Abort when offloaded completions stop draining (0 = no watchdog)
    #[arg(long, value_name = "MS")]
    stall_timeout_ms: Option<u64>,
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Args {
    /// Layer the flags over the environment-derived config
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::from_env().stall_action(StallAction::Abort);

        if let Some(port) = self.port {
            config = config.port(port);
        }
        if let Some(n) = self.io_threads {
            config = config.io_threads(n);
        }
        if self.run_on_event_loop {
            config = config.execution_mode(ExecutionMode::EventLoop);
        }
        if self.heap_buffers {
            config = config.pooled_buffers(false);
        }
        if let Some(ms) = self.service_delay_ms {
            config = config.service_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.service_timeout_ms {
            config = config.service_timeout(millis(ms));
        }
        if let Some(ms) = self.stall_timeout_ms {
            config = config.stall_timeout(millis(ms));
        }

        let mut sched = config.scheduler.clone();
        if let Some(n) = self.parallelism {
            sched = sched.parallelism(n);
        }
        if let Some(n) = self.max_pool_size {
            sched = sched.max_pool_size(n);
        }
        if let Some(n) = self.min_runnable {
            sched = sched.min_runnable(n);
        }
        config.scheduler(sched)
    }
}

extern "C" fn on_shutdown_signal(_: c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

fn install_signal_handlers() -> nix::Result<()> {
    let stop = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: the handler only stores to an atomic.
    unsafe {
        signal::sigaction(Signal::SIGINT, &stop)?;
        signal::sigaction(Signal::SIGTERM, &stop)?;
        signal::sigaction(Signal::SIGPIPE, &ignore)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // ── 1. Logging ──
    if let Err(e) = stickyd_core::init_logging("info") {
        eprintln!("stickyd: {e}");
        return ExitCode::FAILURE;
    }

    // ── 2. Signals ──
    if let Err(e) = install_signal_handlers() {
        error!(error = %e, "failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    // ── 3. Server ──
    let mut server = match Server::bind(args.into_config()) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    info!("Http server started. Listening on: {}", server.local_addr());

    // ── 4. Run until signalled ──
    while RUNNING.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    // ── 5. Shutdown ──
    info!("shutting down");
    server.shutdown();
    let stats = server.stats();
    let buffers = server.buffer_stats();
    if buffers.outstanding() != 0 {
        warn!(outstanding = buffers.outstanding(), "response buffers not returned");
    }
    info!(
        accepted = stats.accepted,
        requests = stats.requests,
        responses = stats.responses,
        "bye"
    );
    ExitCode::SUCCESS
}
