// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for Server: endpoint lifecycle, listening, cancellation and access
// control of the endpoint file.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use localipc::{ipc_name, Error, Server, ServerFlags, Session, SessionFlags};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("srv_{tag}_{}_{n}", std::process::id())
}

#[test]
fn create_binds_and_drop_unlinks() {
    let name = unique_name("lifecycle");
    let server = Server::create(&name, ServerFlags::empty()).expect("create");
    let path = server.path().to_path_buf();
    assert_eq!(path, ipc_name::endpoint_path(&name, false).unwrap());
    assert!(path.exists());
    assert_eq!(server.name(), name);
    drop(server);
    assert!(!path.exists());
}

#[test]
fn destroy_removes_endpoint() {
    let name = unique_name("destroy");
    let server = Server::create(&name, ServerFlags::MULTI_SESSION).expect("create");
    assert!(server.flags().contains(ServerFlags::MULTI_SESSION));
    let path = server.path().to_path_buf();
    server.destroy();
    assert!(!path.exists());
    assert!(Session::connect(&name, SessionFlags::empty()).is_err());
}

#[test]
fn stale_endpoint_is_replaced() {
    let name = unique_name("stale");
    let path = ipc_name::endpoint_path(&name, false).unwrap();
    // A dropped std listener leaves its socket file behind.
    drop(UnixListener::bind(&path).expect("bind stale"));
    assert!(path.exists());

    let server = Server::create(&name, ServerFlags::empty()).expect("create over stale");
    let client = thread::spawn(move || Session::connect(&name, SessionFlags::empty()));
    let session = server.listen().expect("listen");
    assert!(session.is_server_side());
    assert!(!client.join().unwrap().expect("connect").is_server_side());
}

#[test]
fn bad_names_are_rejected() {
    assert!(matches!(
        Server::create("", ServerFlags::empty()),
        Err(Error::InvalidName(_))
    ));
    assert!(matches!(
        Server::create("a/b", ServerFlags::empty()),
        Err(Error::InvalidName(_))
    ));
    let long = "x".repeat(200);
    assert!(matches!(
        Server::create(&long, ServerFlags::empty()),
        Err(Error::NameTooLong { .. })
    ));
}

#[test]
fn listen_and_exchange() {
    let name = unique_name("testchan");
    let server = Server::create(&name, ServerFlags::empty()).expect("create");

    let client = {
        let name = name.clone();
        thread::spawn(move || {
            let session = Session::connect(&name, SessionFlags::empty()).expect("connect");
            session.write(b"ping").expect("write");
            let mut buf = [0u8; 4];
            session.read_exact(&mut buf).expect("read reply");
            assert_eq!(&buf, b"pong");
        })
    };

    let session = server.listen().expect("listen");
    let mut buf = [0u8; 4];
    session.read_exact(&mut buf).expect("read");
    assert_eq!(&buf, b"ping");
    session.write(b"pong").expect("write reply");
    client.join().unwrap();
}

#[test]
fn multiple_sessions_from_one_server() {
    let name = unique_name("multi");
    let server = Server::create(&name, ServerFlags::MULTI_SESSION).expect("create");

    let clients: Vec<_> = (0..3u8)
        .map(|i| {
            let name = name.clone();
            thread::spawn(move || {
                let session = Session::connect(&name, SessionFlags::empty()).expect("connect");
                session.write(&[i]).expect("write");
                session
            })
        })
        .collect();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let session = server.listen().expect("listen");
        let mut b = [0u8; 1];
        session.read_exact(&mut b).expect("read");
        seen.push(b[0]);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2]);
    for c in clients {
        c.join().unwrap();
    }
}

#[test]
fn cancel_before_listen() {
    let server = Server::create(&unique_name("precancel"), ServerFlags::empty()).expect("create");
    server.cancel();
    server.cancel();
    assert!(server.is_cancelled());
    assert!(matches!(server.listen(), Err(Error::Cancelled)));
}

#[test]
fn cancel_wakes_blocked_listener() {
    let server = Arc::new(
        Server::create(&unique_name("cancel"), ServerFlags::empty()).expect("create"),
    );
    let s2 = Arc::clone(&server);
    let t = thread::spawn(move || s2.listen());
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    server.cancel();
    assert!(matches!(t.join().unwrap(), Err(Error::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn second_listener_is_busy() {
    let name = unique_name("busy");
    let server = Arc::new(Server::create(&name, ServerFlags::empty()).expect("create"));
    let s2 = Arc::clone(&server);
    let t = thread::spawn(move || s2.listen());
    thread::sleep(Duration::from_millis(100));

    assert!(matches!(server.listen(), Err(Error::ResourceBusy)));

    // Let the first listener finish normally.
    let _client = Session::connect(&name, SessionFlags::empty()).expect("connect");
    assert!(t.join().unwrap().is_ok());
}

#[test]
fn access_mode_is_applied() {
    let server = Server::create(&unique_name("mode"), ServerFlags::empty()).expect("create");
    server.set_access_mode(0o600).expect("chmod");
    let mode = std::fs::metadata(server.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    assert!(matches!(
        server.set_access_mode(0o4755),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn group_access_to_own_group() {
    let server = Server::create(&unique_name("group"), ServerFlags::empty()).expect("create");
    let gid = unsafe { libc::getegid() };
    server.grant_group_access(gid).expect("chgrp");
}

#[test]
fn native_name_in_private_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("endpoint.sock");
    let native = path.to_str().unwrap().to_string();

    let server = Server::create(&native, ServerFlags::NATIVE_NAME).expect("create");
    assert_eq!(server.path(), path.as_path());

    let client = {
        let native = native.clone();
        thread::spawn(move || Session::connect(&native, SessionFlags::NATIVE_NAME))
    };
    let session = server.listen().expect("listen");
    let peer = client.join().unwrap().expect("connect");
    peer.write(b"hi").unwrap();
    let mut buf = [0u8; 2];
    session.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hi");

    drop(server);
    assert!(!path.exists());
}

#[test]
fn connect_without_server_fails() {
    let err = Session::connect(&unique_name("absent"), SessionFlags::empty()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn regular_file_at_native_path_is_left_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"user data").unwrap();

    let res = Server::create(path.to_str().unwrap(), ServerFlags::NATIVE_NAME);
    assert!(res.is_err());
    assert_eq!(std::fs::read(&path).unwrap(), b"user data");
}

#[test]
fn live_server_keeps_its_name() {
    let name = unique_name("live");
    let first = Server::create(&name, ServerFlags::empty()).expect("create");
    assert!(Server::create(&name, ServerFlags::empty()).is_err());
    assert!(first.path().exists());
    // Still reachable: the connection lands in the first server's backlog.
    Session::connect(&name, SessionFlags::empty()).expect("connect to the first server");
}

#[test]
fn drop_leaves_a_newer_endpoint_alone() {
    let name = unique_name("replaced");
    let old = Server::create(&name, ServerFlags::empty()).expect("create old");
    // Move the old socket file aside so the name is free but its inode lives on.
    let moved = old.path().with_extension("moved");
    std::fs::rename(old.path(), &moved).unwrap();
    let new = Server::create(&name, ServerFlags::empty()).expect("create new");

    drop(old);
    assert!(new.path().exists());
    assert!(moved.exists());
    std::fs::remove_file(&moved).unwrap();

    let client = {
        let name = name.clone();
        thread::spawn(move || Session::connect(&name, SessionFlags::empty()))
    };
    let _session = new.listen().expect("listen");
    client.join().unwrap().expect("connect to the newer server");

    let path = new.path().to_path_buf();
    drop(new);
    assert!(!path.exists());
}
