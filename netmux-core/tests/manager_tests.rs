//! Loopback tests for the connection manager: table layout after binds,
//! accept dispatch, client eviction and table growth.

use netmux_core::prelude::*;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

fn quick() -> ManagerOptions {
    ManagerOptions::default().with_poll_timeout(Duration::from_millis(20))
}

fn free_port() -> String {
    portpicker::pick_unused_port()
        .expect("no free port")
        .to_string()
}

/// Call `process()` until `done` holds, failing after ~2 seconds.
fn pump(manager: &mut NetManager, mut done: impl FnMut(&NetManager) -> bool) {
    for _ in 0..100 {
        manager.process().expect("process failed");
        if done(manager) {
            return;
        }
    }
    panic!("condition not reached; manager state: {manager:?}");
}

type Accepted = Rc<RefCell<Vec<(SocketAddr, RawFd)>>>;

fn record_accepts(manager: &mut NetManager) -> Accepted {
    let log: Accepted = Rc::default();
    let sink = Rc::clone(&log);
    manager.add_accept_callback(move |peer: SocketAddr, fd: RawFd| {
        sink.borrow_mut().push((peer, fd));
    });
    log
}

fn fds(manager: &NetManager) -> Vec<RawFd> {
    manager.descriptors().map(|w| w.fd).collect()
}

#[test]
fn test_binds_produce_ordered_listener_pairs() {
    let mut manager = NetManager::with_options("0", quick());
    let first = manager.bind("127.0.0.1").unwrap().clone();
    let second = manager.bind("127.0.0.1").unwrap().clone();

    assert_eq!(manager.num_interfaces(), 2);
    assert_eq!(manager.descriptor_count(), 4);
    assert_eq!(
        fds(&manager),
        vec![first.tcp_fd(), first.udp_fd(), second.tcp_fd(), second.udp_fd()]
    );
    assert!(manager
        .descriptors()
        .all(|w| w.interest == Interest::READ));
}

#[test]
fn test_failed_bind_leaves_table_unchanged() {
    let port = free_port();
    let mut manager = NetManager::with_options(port.clone(), quick());
    manager.bind("127.0.0.1").unwrap();
    let before = fds(&manager);

    let err = manager.bind("127.0.0.1").unwrap_err();
    assert!(matches!(err, NetError::BindFailed { kind: SocketKind::Tcp, .. }));

    let err = manager.bind("not-an-address").unwrap_err();
    assert!(matches!(err, NetError::ResolutionFailed { .. }));

    assert_eq!(fds(&manager), before);
    assert_eq!(manager.num_interfaces(), 1);
}

#[test]
fn test_failed_bind_does_not_block_later_binds() {
    let mut manager = NetManager::with_options("0", quick());
    assert!(manager.bind("localhost").is_err());
    assert!(manager.bind("127.0.0.1").is_ok());
    assert_eq!(manager.descriptor_count(), 2);
}

#[test]
fn test_bad_port_fails_every_bind() {
    let mut manager = NetManager::with_options("http", quick());
    let err = manager.bind("127.0.0.1").unwrap_err();
    assert!(err.is_setup_error());
    assert_eq!(manager.descriptor_count(), 0);
}

#[test]
fn test_idle_process_changes_nothing() {
    let mut manager = NetManager::with_options("0", quick());
    manager.bind("127.0.0.1").unwrap();
    let accepted = record_accepts(&mut manager);
    let before = fds(&manager);

    for _ in 0..3 {
        manager.process().unwrap();
    }

    assert_eq!(fds(&manager), before);
    assert!(accepted.borrow().is_empty());
}

#[test]
fn test_accept_runs_every_callback_once() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let first = record_accepts(&mut manager);
    let second = record_accepts(&mut manager);

    let client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);

    let first = first.borrow();
    let second = second.borrow();
    assert_eq!(first.len(), 1);
    assert_eq!(*first, *second);

    let (peer, fd) = first[0];
    assert_eq!(peer, client.local_addr().unwrap());
    assert_eq!(fds(&manager)[2], fd);
}

#[test]
fn test_one_accept_per_listener_per_cycle() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let accepted = record_accepts(&mut manager);

    let _a = TcpStream::connect(addr).unwrap();
    let _b = TcpStream::connect(addr).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    manager.process().unwrap();
    assert_eq!(accepted.borrow().len(), 1);

    pump(&mut manager, |m| m.descriptor_count() == 4);
    assert_eq!(accepted.borrow().len(), 2);
}

#[test]
fn test_peer_close_evicts_client() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let events = manager.monitor();
    let accepted = record_accepts(&mut manager);

    let mut client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);
    let fd = accepted.borrow()[0].1;

    // Half-close: the server sees EOF, and its close shows up as EOF here.
    client.shutdown(Shutdown::Write).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 2);

    assert!(!fds(&manager).contains(&fd));
    assert!(events
        .try_iter()
        .any(|e| e == ManagerEvent::Disconnected { fd }));

    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    // Nothing left to report for the closed descriptor.
    manager.process().unwrap();
    assert_eq!(manager.descriptor_count(), 2);
}

#[test]
fn test_connection_reset_evicts_client() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let events = manager.monitor();
    let accepted = record_accepts(&mut manager);

    let client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);
    let fd = accepted.borrow()[0].1;

    // Linger 0 turns close into a RST.
    socket2::SockRef::from(&client)
        .set_linger(Some(Duration::ZERO))
        .unwrap();
    drop(client);
    pump(&mut manager, |m| m.descriptor_count() == 2);

    assert!(!fds(&manager).contains(&fd));
    assert!(events
        .try_iter()
        .any(|e| e == ManagerEvent::Disconnected { fd }));
}

#[test]
fn test_eviction_does_not_skip_moved_client() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    manager.set_message_callback(move |payload: &[u8]| sink.borrow_mut().push(payload.to_vec()));

    let first = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);
    let mut last = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 4);

    // Same cycle: the first client hangs up, the last one (moved into its
    // slot by the eviction) has data.
    last.write_all(b"moved").unwrap();
    drop(first);
    std::thread::sleep(Duration::from_millis(50));

    manager.process().unwrap();
    assert_eq!(manager.descriptor_count(), 3);
    assert_eq!(*received.borrow(), vec![b"moved".to_vec()]);
}

#[test]
fn test_table_grows_when_accepting_at_capacity() {
    let options = quick().with_initial_capacity(2).with_table_growth(10);
    let mut manager = NetManager::with_options("0", options);
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let listeners = fds(&manager);
    assert_eq!(manager.table_capacity(), 2);

    let _client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);

    assert_eq!(manager.table_capacity(), 12);
    assert_eq!(fds(&manager)[..2], listeners[..]);
}

#[test]
fn test_no_growth_below_capacity() {
    let options = quick().with_initial_capacity(4).with_table_growth(10);
    let mut manager = NetManager::with_options("0", options);
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();

    let _client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);
    assert_eq!(manager.table_capacity(), 4);
}

#[test]
fn test_large_payload_is_chunked_by_read_size() {
    let options = quick().with_read_buffer_size(16);
    let mut manager = NetManager::with_options("0", options);
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    manager.set_message_callback(move |payload: &[u8]| sink.borrow_mut().push(payload.to_vec()));

    let mut client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);

    let payload: Vec<u8> = (0..100u8).collect();
    client.write_all(&payload).unwrap();
    pump(&mut manager, |_| received.borrow().concat().len() == payload.len());

    let chunks = received.borrow();
    assert!(chunks.len() >= payload.len() / 16);
    assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 16));
    assert_eq!(chunks.concat(), payload);
}

#[test]
fn test_bind_after_clients_keeps_listeners_first() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let accepted = record_accepts(&mut manager);

    let _client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);
    let client_fd = accepted.borrow()[0].1;

    let second = manager.bind("127.0.0.1").unwrap().clone();
    let table = fds(&manager);
    assert_eq!(table.len(), 5);
    assert_eq!(table[2..4], [second.tcp_fd(), second.udp_fd()]);
    assert_eq!(table[4], client_fd);

    // The moved pair still accepts.
    let _other = TcpStream::connect(second.local_addr()).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 6);
    assert_eq!(accepted.borrow().len(), 2);
}

#[test]
fn test_udp_readiness_is_observed_not_consumed() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();
    let accepted = record_accepts(&mut manager);

    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"datagram", addr).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    manager.process().unwrap();

    assert_eq!(manager.descriptor_count(), 2);
    assert!(accepted.borrow().is_empty());

    let mut buf = [std::mem::MaybeUninit::<u8>::uninit(); 64];
    let (n, _) = manager.udp_socket(0).unwrap().recv_from(&mut buf).unwrap();
    assert_eq!(n, b"datagram".len());
}

#[test]
fn test_run_stops_when_cancelled() {
    let mut manager = NetManager::with_options("0", quick());
    manager.bind("127.0.0.1").unwrap();

    let token = CancelToken::new();
    let remote = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        remote.cancel();
    });

    manager.run(&token).unwrap();
    canceller.join().unwrap();
    assert!(token.is_cancelled());
}

#[test]
fn test_run_with_cancelled_token_returns_immediately() {
    let mut manager = NetManager::new("0");
    let token = CancelToken::new();
    token.cancel();
    manager.run(&token).unwrap();
}

#[test]
fn test_undrained_datagram_does_not_spin_run() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"unread", addr).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let token = CancelToken::new();
    let remote = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        remote.cancel();
    });

    let mut cycles = 0u32;
    manager
        .run_with(&token, |_: &mut NetManager| {
            cycles += 1;
            Ok(())
        })
        .unwrap();
    canceller.join().unwrap();

    // 200ms at a 20ms poll timeout is about 10 cycles.
    assert!(cycles > 0);
    assert!(cycles < 30, "loop spun {cycles} times on a pending datagram");

    // Still there: the loop never reads datagrams itself.
    let mut buf = [MaybeUninit::<u8>::uninit(); 64];
    let (n, _) = manager.udp_socket(0).unwrap().recv_from(&mut buf).unwrap();
    assert_eq!(n, b"unread".len());
}

#[test]
fn test_run_with_hook_drains_datagrams() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"one", addr).unwrap();
    sender.send_to(b"two", addr).unwrap();

    let token = CancelToken::new();
    let stop = token.clone();
    let watchdog = token.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(2));
        watchdog.cancel();
    });

    let mut received = Vec::new();
    manager
        .run_with(&token, |m: &mut NetManager| {
            let mut buf = [MaybeUninit::<u8>::uninit(); 64];
            let socket = m.udp_socket(0).expect("interface 0 is bound");
            while let Ok((n, from)) = socket.recv_from(&mut buf) {
                let bytes: Vec<u8> = buf[..n]
                    .iter()
                    .map(|b| unsafe { b.assume_init() })
                    .collect();
                received.push((bytes, from.as_socket()));
            }
            if received.len() == 2 {
                stop.cancel();
            }
            Ok(())
        })
        .unwrap();

    let from = Some(sender.local_addr().unwrap());
    assert_eq!(
        received,
        vec![(b"one".to_vec(), from), (b"two".to_vec(), from)]
    );
}

#[test]
fn test_run_with_returns_hook_error() {
    let mut manager = NetManager::with_options("0", quick());
    let token = CancelToken::new();

    let mut calls = 0;
    let err = manager
        .run_with(&token, |_: &mut NetManager| {
            calls += 1;
            Err(NetError::resolution("hook", "0", "stop"))
        })
        .unwrap_err();

    assert_eq!(calls, 1);
    assert!(matches!(err, NetError::ResolutionFailed { .. }));
    assert!(!token.is_cancelled());
}

#[test]
fn test_shutdown_closes_clients_and_listeners() {
    let mut manager = NetManager::with_options("0", quick());
    let addr = manager.bind("127.0.0.1").unwrap().local_addr();

    let mut client = TcpStream::connect(addr).unwrap();
    pump(&mut manager, |m| m.descriptor_count() == 3);

    manager.shutdown();

    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_bind_events() {
    let mut manager = NetManager::with_options("0", quick());
    let events = manager.monitor();

    let local = manager.bind("127.0.0.1").unwrap().local_addr();
    let _ = manager.bind("nope");

    let all: Vec<_> = events.try_iter().collect();
    assert_eq!(
        all[0],
        ManagerEvent::Bound {
            address: "127.0.0.1".to_string(),
            local
        }
    );
    assert!(matches!(&all[1], ManagerEvent::BindFailed { address, .. } if address == "nope"));
}
