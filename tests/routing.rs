//! End-to-end routing through real worker processes.

use std::collections::HashSet;

use conn_dispatcher::config::BalanceStrategy;

mod common;

#[tokio::test]
async fn sticky_header_pins_client_to_one_worker() {
    let master = common::start(common::sticky_config(
        2,
        "x-forwarded-for",
        BalanceStrategy::ActiveConnections,
    ))
    .await;
    let addr = master.local_addr();
    let client = common::client();

    let first = common::worker_of(&common::identity(&client, addr, Some("10.0.0.1")).await);
    for _ in 0..5 {
        let again = common::worker_of(&common::identity(&client, addr, Some("10.0.0.1")).await);
        assert_eq!(again, first);
    }

    // forwarded-for chains key on the first entry
    let chained =
        common::worker_of(&common::identity(&client, addr, Some(" 10.0.0.1 , 192.168.1.1")).await);
    assert_eq!(chained, first);

    master.shutdown().await;
}

#[tokio::test]
async fn round_robin_rotates_over_ready_workers() {
    let master = common::start(common::config(3)).await;
    let addr = master.local_addr();
    let client = common::client();

    let mut seen = Vec::new();
    for _ in 0..9 {
        seen.push(common::worker_of(&common::identity(&client, addr, None).await));
    }

    for (i, worker) in seen.iter().enumerate() {
        assert_eq!(*worker, seen[i % 3], "connection {i} broke the rotation: {seen:?}");
    }
    let distinct: HashSet<_> = seen.iter().collect();
    assert_eq!(distinct.len(), 3);

    master.shutdown().await;
}

#[tokio::test]
async fn worker_sees_the_exact_client_bytes() {
    let master = common::start(common::sticky_config(
        2,
        "x-forwarded-for",
        BalanceStrategy::RoundRobin,
    ))
    .await;
    let addr = master.local_addr();

    // body bytes arrive with the head, so part of it is read at the master
    let body: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    let response = common::client()
        .post(format!("http://{addr}/echo"))
        .header("x-forwarded-for", "10.0.0.9")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.bytes().await.unwrap().as_ref(), body.as_slice());

    master.shutdown().await;
}

#[tokio::test]
async fn raw_request_split_point_is_invisible() {
    let master = common::start(common::sticky_config(
        1,
        "x-forwarded-for",
        BalanceStrategy::RoundRobin,
    ))
    .await;
    let request = b"POST /echo HTTP/1.1\r\nHost: test\r\nX-Forwarded-For: 10.0.0.2\r\n\
                    Content-Length: 13\r\nConnection: close\r\n\r\nhello, worker";
    let response = common::raw_exchange(master.local_addr(), request).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK"), "{text}");
    assert!(text.ends_with("\r\n\r\nhello, worker"), "{text}");

    master.shutdown().await;
}

#[tokio::test]
async fn malformed_request_still_reaches_a_worker() {
    let master = common::start(common::sticky_config(
        1,
        "x-forwarded-for",
        BalanceStrategy::RoundRobin,
    ))
    .await;

    // sniffing fails, the key falls back to the remote address and the
    // worker's HTTP server answers the garbage itself
    let response = common::raw_exchange(master.local_addr(), b"NOT HTTP AT ALL\r\n\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400"), "{text}");

    master.shutdown().await;
}

#[tokio::test]
async fn remote_address_stickiness_and_real_peer() {
    let mut config = common::config(2);
    config.routing.sticky = conn_dispatcher::config::StickySource::RemoteAddress;
    let master = common::start(config).await;
    let addr = master.local_addr();
    let client = common::client();

    let first = common::identity(&client, addr, None).await;
    assert!(first["peer"].as_str().unwrap().starts_with("127.0.0.1:"));
    for _ in 0..4 {
        let again = common::identity(&client, addr, None).await;
        assert_eq!(common::worker_of(&again), common::worker_of(&first));
    }

    master.shutdown().await;
}
