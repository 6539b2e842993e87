//! End-to-end tests against a real server on ephemeral ports.

use reverb::config::{Config, ListenSpec, PollerKind};
use reverb::server::{Server, ServerHandle};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn start_server(
    listens: &[&str],
    workers: usize,
) -> (ServerHandle, Vec<SocketAddr>, JoinHandle<io::Result<()>>) {
    let config = Config {
        listens: listens
            .iter()
            .map(|s| s.parse::<ListenSpec>().unwrap())
            .collect(),
        workers,
        log_level: "warn".to_string(),
        poller: PollerKind::Mio,
    };

    let server = Server::bind(&config).unwrap();
    let addrs = server.local_addrs();
    let handle = server.handle();
    let join = thread::spawn(move || server.run());
    (handle, addrs, join)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
}

fn echo_round_trip(client: &mut TcpStream, payload: &[u8]) {
    client.write_all(payload).unwrap();
    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed, payload);
}

#[test]
fn hello_round_trip() {
    let (handle, addrs, join) = start_server(&["127.0.0.1:0"], 2);

    let mut client = connect(addrs[0]);
    echo_round_trip(&mut client, b"hello");
    drop(client);

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn connect_then_close_without_sending() {
    let (handle, addrs, join) = start_server(&["127.0.0.1:0"], 2);

    let client = connect(addrs[0]);
    drop(client);

    // The worker observed EOF and discarded the handler; the server keeps
    // serving new connections.
    let mut client = connect(addrs[0]);
    echo_round_trip(&mut client, b"still alive");

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn two_listen_addresses() {
    let (handle, addrs, join) = start_server(&["127.0.0.1:0", "127.0.0.1:0"], 4);
    assert_eq!(addrs.len(), 2);
    assert_ne!(addrs[0].port(), addrs[1].port());

    for &addr in &addrs {
        let mut client = connect(addr);
        echo_round_trip(&mut client, b"which door?");
    }

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn hundred_connections_on_single_worker() {
    let (handle, addrs, join) = start_server(&["127.0.0.1:0"], 1);

    // All connections live at once, multiplexed by one worker thread.
    let mut clients: Vec<TcpStream> = (0..100).map(|_| connect(addrs[0])).collect();

    for (i, client) in clients.iter_mut().enumerate() {
        let payload = format!("conn-{i}");
        echo_round_trip(client, payload.as_bytes());
    }

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn stalled_peer_does_not_delay_other_workers() {
    let (handle, addrs, join) = start_server(&["127.0.0.1:0"], 2);

    // First accept goes to worker 0, second to worker 1.
    let staller = connect(addrs[0]);
    let mut other = connect(addrs[0]);

    // Flood without ever reading the echo. Once the kernel buffers fill,
    // the server's send hits WouldBlock and worker 0 parks that echo.
    staller.set_nonblocking(true).unwrap();
    let chunk = [0x55u8; 8192];
    let mut sent = 0usize;
    while sent < 4 * 1024 * 1024 {
        match (&staller).write(&chunk) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("staller write failed: {e}"),
        }
    }
    assert!(sent > 0);

    // Worker 1 still answers promptly.
    echo_round_trip(&mut other, b"not blocked");

    drop(staller);
    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn large_payload_is_echoed_verbatim() {
    let (handle, addrs, join) = start_server(&["127.0.0.1:0"], 2);

    let addr = addrs[0];
    let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    // Writer on its own thread so the echo can be drained concurrently
    // (the scratch buffer is 8 KiB, so this exercises many cycles).
    let client = connect(addr);
    let mut reader = client.try_clone().unwrap();
    let writer = thread::spawn(move || {
        let mut client = client;
        client.write_all(&payload).unwrap();
    });

    let mut echoed = vec![0u8; expected.len()];
    reader.read_exact(&mut echoed).unwrap();
    writer.join().unwrap();
    assert_eq!(echoed, expected);

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn shutdown_closes_everything() {
    let (handle, addrs, join) = start_server(&["127.0.0.1:0"], 2);

    let mut client = connect(addrs[0]);
    echo_round_trip(&mut client, b"last words");

    handle.stop();
    // run() returning means all workers are joined and listeners closed.
    join.join().unwrap().unwrap();

    // The open connection was torn down...
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    // ...and the listening socket is gone.
    assert!(TcpStream::connect(addrs[0]).is_err());
}

#[test]
fn stop_is_safe_to_call_twice() {
    let (handle, _addrs, join) = start_server(&["127.0.0.1:0"], 1);
    let second = handle.clone();
    handle.stop();
    second.stop();
    join.join().unwrap().unwrap();
}
