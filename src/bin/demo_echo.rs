// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_echo server
//   demo_echo client <message> <interval_ms>
//
// The server listens on the endpoint "echo" and echoes every byte it receives
// back to the sender, one thread per session. The client sends <message>
// every <interval_ms> milliseconds and prints the echo.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use localipc::{Error, Server, ServerFlags, Session, SessionFlags};

const NAME: &str = "echo";

fn serve_session(session: Session, peer: usize) {
    let mut buf = [0u8; 4096];
    loop {
        match session.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                println!("server[{peer}]: {n} bytes");
                if let Err(e) = session.write(&buf[..n]) {
                    println!("server[{peer}]: write failed: {e}");
                    return;
                }
            }
            Err(Error::BrokenPipe) => {
                println!("server[{peer}]: peer left");
                return;
            }
            Err(e) => {
                println!("server[{peer}]: {e}");
                return;
            }
        }
    }
}

fn do_server() {
    let server = Arc::new(Server::create(NAME, ServerFlags::MULTI_SESSION).expect("create server"));
    println!("server: listening on {}", server.path().display());

    // listen() only wakes for a connection or a cancel.
    {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            while !QUIT.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(100));
            }
            server.cancel();
        });
    }

    let mut peer = 0usize;
    loop {
        match server.listen() {
            Ok(session) => {
                peer += 1;
                println!("server: session {peer} connected");
                thread::spawn(move || serve_session(session, peer));
            }
            Err(Error::Cancelled) => break,
            Err(e) => {
                eprintln!("server: listen failed: {e}");
                break;
            }
        }
    }
    println!("server: shutting down");
}

fn do_client(message: &str, interval_ms: u64) {
    let session = Session::connect(NAME, SessionFlags::empty()).expect("connect");
    println!("client: connected");
    let mut reply = vec![0u8; message.len()];
    while !QUIT.load(Ordering::Acquire) {
        session.write(message.as_bytes()).expect("write");
        match session.read_exact(&mut reply) {
            Ok(()) => println!("client: echo \"{}\"", String::from_utf8_lossy(&reply)),
            Err(Error::BrokenPipe) => {
                println!("client: server went away");
                return;
            }
            Err(e) => {
                eprintln!("client: {e}");
                return;
            }
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }
    session.close();
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: demo_echo server");
        eprintln!("       demo_echo client <message> <interval_ms>");
        std::process::exit(1);
    }

    install_quit_handler();

    match args[1].as_str() {
        "server" => do_server(),
        "client" => {
            if args.len() < 4 {
                eprintln!("usage: demo_echo client <message> <interval_ms>");
                std::process::exit(1);
            }
            let interval: u64 = args[3].parse().expect("interval");
            do_client(&args[2], interval);
        }
        other => {
            eprintln!("unknown mode: {other}");
            std::process::exit(1);
        }
    }
}

// Raised by SIGINT / SIGTERM / SIGHUP. The handler only stores to an atomic.
static QUIT: AtomicBool = AtomicBool::new(false);

extern "C" fn request_quit(_: libc::c_int) {
    QUIT.store(true, Ordering::Release);
}

fn install_quit_handler() {
    for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
        unsafe { libc::signal(sig, request_quit as *const () as libc::sighandler_t) };
    }
}
