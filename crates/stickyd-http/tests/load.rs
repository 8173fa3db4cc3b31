mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{config, raise_fd_limit, start, wait_idle, Client, GET};
use stickyd_runtime::SchedulerConfig;

const CONNECTIONS: usize = 1000;
const CLIENT_THREADS: usize = 20;

#[test]
fn thousand_concurrent_connections_on_one_carrier() {
    // Client and server ends both live in this process.
    let limit = raise_fd_limit(8192);
    if limit < (2 * CONNECTIONS + 256) as u64 {
        eprintln!("skipping: RLIMIT_NOFILE is {limit}");
        return;
    }

    let server = start(
        config()
            .service_delay(Duration::from_millis(1))
            .scheduler(SchedulerConfig::new().parallelism(1)),
    );
    let addr = server.local_addr();
    let started = Instant::now();

    let threads: Vec<_> = (0..CLIENT_THREADS)
        .map(|_| {
            thread::spawn(move || {
                let mut clients: Vec<Client> = (0..CONNECTIONS / CLIENT_THREADS)
                    .map(|_| Client::connect(addr).unwrap())
                    .collect();
                for client in clients.iter_mut() {
                    client.send(GET).unwrap();
                }
                clients
                    .iter_mut()
                    .map(|client| client.read_reply().unwrap())
                    .filter(|reply| reply.status == 200 && reply.body == "Hello World!")
                    .count()
            })
        })
        .collect();

    let ok: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
    let elapsed = started.elapsed();

    assert_eq!(ok, CONNECTIONS);
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");

    let stats = server.stats();
    assert_eq!(stats.accepted, CONNECTIONS as u64);
    assert_eq!(stats.writes_off_owner, 0);

    assert!(wait_idle(&server));
    let buffers = server.buffer_stats();
    assert_eq!(buffers.acquired, buffers.released);
    assert_eq!(server.scheduler_stats().live_carriers, 1);
}

#[test]
fn many_loops_many_connections() {
    let limit = raise_fd_limit(8192);
    if limit < 1024 {
        eprintln!("skipping: RLIMIT_NOFILE is {limit}");
        return;
    }

    let server = start(
        config()
            .io_threads(4)
            .scheduler(SchedulerConfig::new().parallelism(2)),
    );
    let addr = server.local_addr();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(move || {
                let mut clients: Vec<Client> =
                    (0..25).map(|_| Client::connect(addr).unwrap()).collect();
                for _round in 0..4 {
                    for client in clients.iter_mut() {
                        client.send(GET).unwrap();
                    }
                    for client in clients.iter_mut() {
                        assert_eq!(client.read_reply().unwrap().status, 200);
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert!(wait_idle(&server));
    let stats = server.stats();
    assert_eq!(stats.responses, 800);
    assert_eq!(stats.writes_off_owner, 0);
    assert_eq!(stats.dropped_completions, 0);
    let buffers = server.buffer_stats();
    assert_eq!(buffers.acquired, 800);
    assert_eq!(buffers.released, 800);
}
