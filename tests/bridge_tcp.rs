mod common;

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{
    accept_within, bridge_with, closed_within, connect, free_port, read_for, wait_until,
};
use serial_bridge::config::{BridgeConfig, BridgeType, SerialFormat};
use serial_bridge::storage::{self, MemoryStore};
use serial_bridge::{AlwaysUp, BridgeState, MemorySerial, SharedLink};

const WAIT: Duration = Duration::from_secs(3);

fn server_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        bridge_type: BridgeType::TcpServer,
        port,
        ..BridgeConfig::default()
    }
}

#[test]
fn test_server_pumps_both_directions() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let serial = MemorySerial::new();
    let device = serial.handle();
    let bridge = bridge_with(&store, "uart0", &server_config(port), Arc::new(AlwaysUp), serial);

    assert_eq!(bridge.state(), BridgeState::Idle);
    bridge.start().unwrap();

    let mut client = connect(port);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::ConnectedPumping));

    client.write_all(b"hello serial").unwrap();
    let mut written = Vec::new();
    assert!(wait_until(WAIT, || {
        written.extend(device.take_written());
        written == b"hello serial"
    }));

    device.inject(b"hello network");
    assert_eq!(read_for(&mut client, 13, WAIT), b"hello network");

    let stats = bridge.stats();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.bytes_to_serial, 12);
    assert_eq!(stats.bytes_to_network, 13);
}

#[test]
fn test_large_serial_burst_arrives_in_order() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let serial = MemorySerial::new();
    let device = serial.handle();
    let bridge = bridge_with(&store, "uart0", &server_config(port), Arc::new(AlwaysUp), serial);
    bridge.start().unwrap();

    let mut client = connect(port);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::ConnectedPumping));

    let burst: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
    device.inject(&burst);
    assert_eq!(read_for(&mut client, burst.len(), WAIT), burst);
}

#[test]
fn test_server_serves_one_client_at_a_time() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let serial = MemorySerial::new();
    let device = serial.handle();
    let bridge = bridge_with(&store, "uart0", &server_config(port), Arc::new(AlwaysUp), serial);
    bridge.start().unwrap();

    let mut first = connect(port);
    assert!(wait_until(WAIT, || bridge.stats().sessions == 1));

    // the second client only gets as far as the listen queue
    let mut second = connect(port);
    second.write_all(b"second").unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(device.take_written().is_empty());
    assert_eq!(bridge.stats().sessions, 1);

    first.write_all(b"first").unwrap();
    let mut written = Vec::new();
    assert!(wait_until(WAIT, || {
        written.extend(device.take_written());
        written == b"first"
    }));

    drop(first);
    assert!(wait_until(WAIT, || bridge.stats().sessions == 2));

    written.clear();
    assert!(wait_until(WAIT, || {
        written.extend(device.take_written());
        written == b"second"
    }));

    device.inject(b"to second");
    assert_eq!(read_for(&mut second, 9, WAIT), b"to second");
}

#[test]
fn test_server_queues_a_single_waiting_client() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let bridge = bridge_with(&store, "uart0", &server_config(port), Arc::new(AlwaysUp), MemorySerial::new());
    bridge.start().unwrap();

    let _served = connect(port);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::ConnectedPumping));

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let queued: Vec<_> = (0..5)
        .filter_map(|_| TcpStream::connect_timeout(&addr, Duration::from_millis(300)).ok())
        .collect();

    // backlog of one; Linux lets one extra through
    assert!(!queued.is_empty());
    assert!(queued.len() <= 2, "{} clients queued", queued.len());
    assert_eq!(bridge.stats().sessions, 1);
}

#[test]
fn test_client_backs_off_then_connects() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let serial = MemorySerial::new();
    let device = serial.handle();
    let config = BridgeConfig {
        bridge_type: BridgeType::TcpClient,
        host: "127.0.0.1".to_string(),
        port,
        ..BridgeConfig::default()
    };
    let bridge = bridge_with(&store, "uart0", &config, Arc::new(AlwaysUp), serial);
    bridge.start().unwrap();

    // nothing listens yet: one attempt per 200 ms backoff
    thread::sleep(Duration::from_millis(700));
    let attempts = bridge.stats().connect_attempts;
    assert!((2..=5).contains(&attempts), "{} attempts", attempts);
    assert_eq!(bridge.state(), BridgeState::ListeningOrDialing);

    let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
    listener.set_nonblocking(true).unwrap();
    let mut accepted = None;
    assert!(wait_until(WAIT, || {
        accepted = listener.accept().ok().map(|(stream, _)| stream);
        accepted.is_some()
    }));
    let mut server = accepted.unwrap();
    server.set_nonblocking(false).unwrap();
    server.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

    assert!(wait_until(WAIT, || bridge.state() == BridgeState::ConnectedPumping));

    device.inject(b"ping");
    assert_eq!(read_for(&mut server, 4, WAIT), b"ping");

    server.write_all(b"pong").unwrap();
    let mut written = Vec::new();
    assert!(wait_until(WAIT, || {
        written.extend(device.take_written());
        written == b"pong"
    }));
}

#[test]
fn test_client_redials_after_server_drops() {
    let store = Arc::new(MemoryStore::new());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();

    let config = BridgeConfig {
        bridge_type: BridgeType::TcpClient,
        host: "127.0.0.1".to_string(),
        port,
        ..BridgeConfig::default()
    };
    let bridge = bridge_with(&store, "uart0", &config, Arc::new(AlwaysUp), MemorySerial::new());
    bridge.start().unwrap();

    let mut accepts = 0;
    let mut kept = Vec::new();
    assert!(wait_until(WAIT, || {
        if let Ok((stream, _)) = listener.accept() {
            accepts += 1;
            // hang up on the first connection only
            if accepts > 1 {
                kept.push(stream);
            }
        }
        accepts == 2
    }));
    assert!(wait_until(WAIT, || bridge.stats().sessions == 2));
}

#[test]
fn test_link_loss_returns_to_waiting() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let link = SharedLink::new(false);
    let bridge = bridge_with(
        &store,
        "uart0",
        &server_config(port),
        Arc::new(link.clone()),
        MemorySerial::new(),
    );
    bridge.start().unwrap();

    assert!(wait_until(WAIT, || bridge.state() == BridgeState::WaitingLink));

    link.set(true);
    let mut client = connect(port);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::ConnectedPumping));

    link.set(false);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::WaitingLink));
    assert!(closed_within(&mut client, WAIT));

    // back up: listening again on the same port
    link.set(true);
    let _client = connect(port);
    assert!(wait_until(WAIT, || bridge.stats().sessions == 2));
}

#[test]
fn test_client_link_loss_returns_to_waiting() {
    let store = Arc::new(MemoryStore::new());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();

    let config = BridgeConfig {
        bridge_type: BridgeType::TcpClient,
        host: "127.0.0.1".to_string(),
        port,
        ..BridgeConfig::default()
    };
    let link = SharedLink::new(true);
    let bridge = bridge_with(&store, "uart0", &config, Arc::new(link.clone()), MemorySerial::new());
    bridge.start().unwrap();

    let mut first = accept_within(&listener, WAIT);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::ConnectedPumping));

    link.set(false);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::WaitingLink));
    assert!(closed_within(&mut first, WAIT));

    // no dialing while the link is down
    let attempts = bridge.stats().connect_attempts;
    thread::sleep(Duration::from_millis(100));
    assert_eq!(bridge.stats().connect_attempts, attempts);
    assert!(listener.accept().is_err());

    link.set(true);
    let _second = accept_within(&listener, WAIT);
    assert!(wait_until(WAIT, || bridge.stats().sessions == 2));
    assert_eq!(bridge.state(), BridgeState::ConnectedPumping);
}

#[test]
fn test_new_settings_wait_for_restart() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let other_port = free_port();
    let bridge = bridge_with(&store, "uart0", &server_config(port), Arc::new(AlwaysUp), MemorySerial::new());
    bridge.start().unwrap();

    let first = connect(port);
    assert!(wait_until(WAIT, || bridge.stats().sessions == 1));

    bridge.set_config(server_config(other_port));
    assert_eq!(bridge.port(), other_port);
    assert_eq!(storage::load_bridge_config(&*store, "uart0").port, other_port);

    // the running engine still serves the old port
    drop(first);
    let _again = connect(port);
    assert!(wait_until(WAIT, || bridge.stats().sessions == 2));
}

#[test]
fn test_start_applies_line_settings_once() {
    let store = Arc::new(MemoryStore::new());
    let config = BridgeConfig {
        baud: 115_200,
        serial_format: SerialFormat::F7E1,
        ..server_config(free_port())
    };
    let serial = MemorySerial::new();
    let device = serial.handle();
    let bridge = bridge_with(&store, "uart0", &config, Arc::new(AlwaysUp), serial);

    assert!(!bridge.is_started());
    bridge.start().unwrap();
    bridge.start().unwrap();
    assert!(bridge.is_started());

    assert!(wait_until(WAIT, || device.settings().is_some()));
    assert_eq!(device.settings(), Some((115_200, SerialFormat::F7E1)));
}

#[test]
fn test_echo_flags_do_not_change_the_pipe() {
    let store = Arc::new(MemoryStore::new());
    let port = free_port();
    let config = BridgeConfig {
        has_echo: true,
        simulate_echo: true,
        ..server_config(port)
    };
    let serial = MemorySerial::new();
    let device = serial.handle();
    let bridge = bridge_with(&store, "uart0", &config, Arc::new(AlwaysUp), serial);
    bridge.start().unwrap();

    let mut client = connect(port);
    assert!(wait_until(WAIT, || bridge.state() == BridgeState::ConnectedPumping));

    client.write_all(b"abc").unwrap();
    let mut written = Vec::new();
    assert!(wait_until(WAIT, || {
        written.extend(device.take_written());
        written == b"abc"
    }));
    assert!(read_for(&mut client, 1, Duration::from_millis(200)).is_empty());
}

#[test]
fn test_unsupported_types_park() {
    let store = Arc::new(MemoryStore::new());
    let classic = BridgeConfig {
        bridge_type: BridgeType::Bluetooth,
        ..BridgeConfig::default()
    };
    let ble = BridgeConfig {
        bridge_type: BridgeType::Ble,
        ..BridgeConfig::default()
    };
    let classic = bridge_with(&store, "bt", &classic, Arc::new(AlwaysUp), MemorySerial::new());
    let ble = bridge_with(&store, "ble", &ble, Arc::new(AlwaysUp), MemorySerial::new());

    classic.start().unwrap();
    ble.start().unwrap();

    assert!(wait_until(WAIT, || classic.state() == BridgeState::Parked));
    assert!(wait_until(WAIT, || ble.state() == BridgeState::Parked));
}
