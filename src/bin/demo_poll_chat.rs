// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_poll_chat server <clients>
//   demo_poll_chat client <nickname>
//
// The server waits for <clients> participants on the endpoint "chat", then
// relays every line one participant writes to all the others, multiplexing
// the sessions with a single PollSet. A client forwards stdin lines and
// prints whatever the server relays.

use std::io::BufRead;
use std::thread;

use localipc::{Error, Events, PollSet, Server, ServerFlags, Session, SessionFlags};

const NAME: &str = "chat";

fn do_server(clients: usize) {
    let server = Server::create(NAME, ServerFlags::MULTI_SESSION).expect("create server");
    println!("server: waiting for {clients} clients on {}", server.path().display());

    let sessions: Vec<Session> = (0..clients)
        .map(|i| {
            let s = server.listen().expect("listen");
            println!("server: client {i} joined");
            s
        })
        .collect();

    let set = PollSet::new();
    for (id, s) in sessions.iter().enumerate() {
        set.add_socket(s, Events::READ | Events::ERROR, id as u32)
            .expect("add session");
    }

    let mut buf = [0u8; 1024];
    while set.count().unwrap_or(0) > 0 {
        let ready = match set.wait(None) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("server: wait failed: {e}");
                break;
            }
        };
        let from = ready.id as usize;
        match sessions[from].read_nonblocking(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                for (to, s) in sessions.iter().enumerate() {
                    if to == from || set.entry(to as u32).is_err() {
                        continue;
                    }
                    // Blocking write: a client that stops reading stalls the
                    // relay, which is acceptable for a demo. One that fails
                    // leaves the room.
                    if let Err(e) = s.write(&buf[..n]) {
                        println!("server: dropping client {to}: {e}");
                        s.cancel();
                        let _ = set.remove(to as u32);
                    }
                }
            }
            Err(Error::BrokenPipe) => {
                println!("server: client {from} left");
                let _ = set.remove(ready.id);
            }
            Err(e) => {
                eprintln!("server: client {from}: {e}");
                let _ = set.remove(ready.id);
            }
        }
    }
    println!("server: everyone left");
}

fn do_client(nick: &str) {
    let session = Session::connect(NAME, SessionFlags::empty()).expect("connect");
    println!("client: connected as {nick}");

    let incoming = session.clone();
    let printer = thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            match incoming.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => print!("{}", String::from_utf8_lossy(&buf[..n])),
                Err(Error::BrokenPipe) => {
                    println!("client: server closed the room");
                    return;
                }
                Err(_) => return,
            }
        }
    });

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if session.write(format!("[{nick}] {line}\n").as_bytes()).is_err() {
            break;
        }
    }
    session.cancel();
    let _ = printer.join();
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: demo_poll_chat server <clients>");
        eprintln!("       demo_poll_chat client <nickname>");
        std::process::exit(1);
    }
    match args[1].as_str() {
        "server" => do_server(args[2].parse().expect("clients")),
        "client" => do_client(&args[2]),
        other => {
            eprintln!("unknown mode: {other}");
            std::process::exit(1);
        }
    }
}
