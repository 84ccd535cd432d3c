//! Demo server: listens on every IPv4 and IPv6 interface and logs what
//! arrives.
//!
//! Run with:
//! ```bash
//! cargo run --example server -- [PORT] [ADDRESS...]
//! ```
//!
//! Defaults to port 5154 on `0.0.0.0` and `::`. Type `quit` (or close stdin)
//! to shut down.

use netmux::prelude::*;
use std::io::BufRead;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::os::fd::RawFd;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    netmux::dev_tracing::init_tracing_or(netmux::dev_tracing::DEFAULT_DIRECTIVES);

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "5154".to_string());
    let mut addresses: Vec<String> = args.collect();
    if addresses.is_empty() {
        addresses = vec!["0.0.0.0".to_string(), "::".to_string()];
    }

    let mut manager = NetManager::new(port.as_str());
    for address in &addresses {
        match manager.bind(address) {
            Ok(interface) => println!("Listening on {address} port {port} ({interface})"),
            Err(err) => eprintln!("Failed to bind to {address} port {port}: {err}"),
        }
    }
    if manager.num_interfaces() == 0 {
        return Err("no interface could be bound".into());
    }

    manager.add_accept_callback(|peer: SocketAddr, fd: RawFd| match peer {
        SocketAddr::V4(v4) => {
            println!("Accepted IPv4 TCP connection from {} on socket {fd}", v4.ip());
        }
        SocketAddr::V6(v6) => {
            println!("Accepted IPv6 TCP connection from [{}] on socket {fd}", v6.ip());
        }
    });
    manager.set_message_callback(|payload: &[u8]| {
        println!("Received data: {}", String::from_utf8_lossy(payload));
    });

    let token = CancelToken::new();
    let stop = token.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim() == "quit" => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        println!("Shutting down");
        stop.cancel();
    });

    manager.run_with(&token, |manager: &mut NetManager| {
        drain_datagrams(manager);
        Ok(())
    })?;

    manager.shutdown();
    println!("Goodbye!");
    Ok(())
}

fn drain_datagrams(manager: &NetManager) {
    let mut buf = [MaybeUninit::<u8>::uninit(); 1024];
    for index in 0..manager.num_interfaces() {
        let Some(socket) = manager.udp_socket(index) else {
            continue;
        };
        while let Ok((len, from)) = socket.recv_from(&mut buf) {
            let from = from
                .as_socket()
                .map_or_else(|| "unknown".to_string(), |addr| addr.to_string());
            tracing::info!(len, %from, "received datagram");
        }
    }
}
