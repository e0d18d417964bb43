// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end tunnel tests: a real local listener forwarding into the
//! in-memory echo transport.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::FakeState;
use sshpool::{Error, Pool, PoolConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

fn config(max_sessions: usize) -> PoolConfig {
    PoolConfig {
        max_sessions,
        max_connections: 1,
        session_close_delay: Duration::from_millis(10),
        debug: false,
    }
}

#[tokio::test]
async fn test_tunnel_forwards_both_ways() {
    common::init_logging();
    let state = FakeState::new();
    let pool = Pool::new(state.connector(), config(4));

    let tunnel = pool
        .tunnel("h1", "127.0.0.1:0", "db.internal:5432")
        .await
        .unwrap();

    for _ in 0..2 {
        let mut stream = TcpStream::connect(tunnel.local_addr()).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");
    }

    // Both forwarded connections rode the same pooled connection, each
    // opening its own channel to the remote endpoint.
    assert_eq!(state.dial_count(), 1);
    let endpoints = state.tcpip_targets.lock().unwrap().clone();
    assert_eq!(endpoints, vec![
        ("db.internal".to_string(), 5432),
        ("db.internal".to_string(), 5432),
    ]);

    tunnel.close();
}

#[tokio::test]
async fn test_forwarded_connection_counts_against_the_slot_budget() {
    let state = FakeState::new();
    let pool = Pool::new(state.connector(), config(1));

    let tunnel = pool
        .tunnel("h1", "127.0.0.1:0", "svc.internal:80")
        .await
        .unwrap();

    // A round trip proves the forward task holds its slot.
    let mut stream = TcpStream::connect(tunnel.local_addr()).await.unwrap();
    stream.write_all(b"x").await.unwrap();
    let mut reply = [0u8; 1];
    stream.read_exact(&mut reply).await.unwrap();

    let blocked = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get("h1").await })
    };
    sleep(Duration::from_millis(50)).await;
    assert!(
        !blocked.is_finished(),
        "the forwarded connection holds the only slot"
    );

    // Ending the local connection releases the slot after the close delay,
    // without closing the pooled connection.
    drop(stream);
    let session = timeout(Duration::from_secs(1), blocked)
        .await
        .expect("slot should free when the forward ends")
        .unwrap()
        .unwrap();
    assert!(!state.connection(0).closed.load(Ordering::SeqCst));
    assert_eq!(state.dial_count(), 1);
    drop(session);

    tunnel.close();
}

#[tokio::test]
async fn test_closed_tunnel_stops_accepting() {
    let state = FakeState::new();
    let pool = Pool::new(state.connector(), config(4));

    let tunnel = pool
        .tunnel("h1", "127.0.0.1:0", "db.internal:5432")
        .await
        .unwrap();
    let addr = tunnel.local_addr();

    tunnel.close();
    tunnel.close(); // idempotent
    sleep(Duration::from_millis(50)).await;

    assert!(
        TcpStream::connect(addr).await.is_err(),
        "listener should be gone after close"
    );
}

#[tokio::test]
async fn test_tunnel_rejects_malformed_remote_endpoint() {
    let state = FakeState::new();
    let pool = Pool::new(state.connector(), config(4));

    let err = pool
        .tunnel("h1", "127.0.0.1:0", "db.internal")
        .await
        .err()
        .expect("malformed endpoint must fail");
    match err {
        Error::InvalidTarget(addr) => assert_eq!(addr, "db.internal"),
        other => panic!("expected InvalidTarget, got {other}"),
    }
}
