#![allow(dead_code)]

use std::io::{ErrorKind, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serial_bridge::config::{BridgeConfig, EngineConfig};
use serial_bridge::storage::{self, MemoryStore};
use serial_bridge::{Bridge, BridgeContext, Connectivity, SerialPort};

/// Engine timings short enough for tests
pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        buffer_size: 512,
        stack_size: 256 * 1024,
        link_poll: Duration::from_millis(10),
        accept_poll: Duration::from_millis(5),
        idle_yield: Duration::from_millis(1),
        client_backoff: Duration::from_millis(200),
        reconnect_delay: Duration::from_millis(10),
        connect_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(500),
        ble_poll: Duration::from_millis(10),
    }
}

/// A port nothing is listening on, at least for now
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Persist `config` under `code` and build a bridge that will load it
pub fn bridge_with(
    store: &Arc<MemoryStore>,
    code: &str,
    config: &BridgeConfig,
    link: Arc<dyn Connectivity>,
    serial: impl SerialPort + 'static,
) -> Bridge {
    storage::try_save_bridge_config(&**store, code, config).unwrap();
    let ctx = BridgeContext::new(store.clone(), link).with_engine(fast_engine());
    Bridge::new(code, code, serial, ctx)
}

/// Connect to a local port, retrying while the listener comes up
pub fn connect(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(Duration::from_millis(50)))
                    .unwrap();
                return stream;
            }
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            Err(e) => panic!("could not connect to port {}: {}", port, e),
        }
    }
}

/// Read from `stream` until `want` bytes arrived or `timeout` passed
pub fn read_for(stream: &mut TcpStream, want: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut got = Vec::new();
    let mut buf = [0u8; 256];
    while got.len() < want && Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => got.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => panic!("read failed: {}", e),
        }
    }
    got
}

/// True once the remote side closed `stream`
pub fn closed_within(stream: &mut TcpStream, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 64];
    while Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return true,
        }
    }
    false
}

/// Accept one connection from a non-blocking listener
pub fn accept_within(listener: &TcpListener, timeout: Duration) -> TcpStream {
    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_millis(50)))
                    .unwrap();
                return stream;
            }
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
            Err(e) => panic!("nothing connected: {}", e),
        }
    }
}
