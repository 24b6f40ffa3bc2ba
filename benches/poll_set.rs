// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// PollSet benchmarks.
//
// Run with:
//   cargo bench --bench poll_set
//
// Groups:
//   add_remove - register and drop one extra handle on a populated set
//   wait_ready - wait on a set where only the last handle is readable
//   session_rt - one-byte round trip over a connected session pair

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use localipc::{Events, PollSet, Server, ServerFlags, Session, SessionFlags};

const SET_SIZES: &[usize] = &[1, 8, 32, 63];

fn pairs(n: usize) -> Vec<(UnixStream, UnixStream)> {
    (0..n).map(|_| UnixStream::pair().expect("pair")).collect()
}

fn bench_add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_remove");
    for &n in SET_SIZES {
        let socks = pairs(n);
        let (extra, _peer) = UnixStream::pair().expect("pair");
        let set = PollSet::new();
        for (i, (a, _)) in socks.iter().enumerate() {
            set.add_socket(a, Events::READ, i as u32).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                set.add_socket(&extra, Events::READ, u32::MAX).unwrap();
                set.remove(black_box(u32::MAX)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_wait_ready(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_ready");
    for &n in SET_SIZES {
        let mut socks = pairs(n);
        let set = PollSet::new();
        for (i, (a, _)) in socks.iter().enumerate() {
            set.add_socket(a, Events::READ, i as u32).unwrap();
        }
        // Readiness stays latched since nothing drains it.
        socks.last_mut().unwrap().1.write_all(b"x").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let ready = set.wait(Some(1000)).unwrap();
                assert_eq!(ready.id as usize, n - 1);
            });
        });
    }
    group.finish();
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn bench_session_round_trip(c: &mut Criterion) {
    let name = format!(
        "bench_rt_{}_{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let server = Server::create(&name, ServerFlags::empty()).expect("create");
    let client = {
        let name = name.clone();
        thread::spawn(move || Session::connect(&name, SessionFlags::empty()))
    };
    let echo = server.listen().expect("listen");
    let client = client.join().unwrap().expect("connect");

    let echo_thread = thread::spawn(move || {
        let mut b = [0u8; 1];
        while (&echo).read_exact(&mut b).is_ok() {
            if echo.write(&b).is_err() {
                break;
            }
        }
    });

    c.bench_function("session_rt", |b| {
        let mut byte = [0u8; 1];
        b.iter(|| {
            client.write(b"p").unwrap();
            client.read_exact(&mut byte).unwrap();
            black_box(byte)
        });
    });

    drop(client);
    let _ = echo_thread.join();
}

criterion_group!(benches, bench_add_remove, bench_wait_ready, bench_session_round_trip);
criterion_main!(benches);
