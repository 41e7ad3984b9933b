//! Shared utilities for dispatcher integration tests.
//!
//! The master runs in the test process; workers are the real
//! `conn-dispatcher` binary serving its demo application.

#![allow(dead_code)]

use std::ffi::OsStr;
use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use conn_dispatcher::config::{BalanceStrategy, StickySource};
use conn_dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, MasterHandle};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

pub const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Loopback config with `workers` demo workers and fast retries.
pub fn config(workers: usize) -> DispatcherConfig {
    let mut config = DispatcherConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.cluster.workers = workers;
    config.startup.wait_attempts = 50;
    config.startup.wait_interval_ms = 100;
    config.shutdown.kill_grace_ms = 2000;
    config.process.program = Some(env!("CARGO_BIN_EXE_conn-dispatcher").into());
    config.process.args = Some(Vec::new());
    config
}

pub fn sticky_config(workers: usize, header: &str, balance: BalanceStrategy) -> DispatcherConfig {
    let mut config = config(workers);
    config.routing.sticky = StickySource::header(header);
    config.routing.balance = balance;
    config
}

/// Start a master from a builder and wait for every worker to be ready.
pub async fn start_ready(builder: DispatcherBuilder) -> MasterHandle {
    let master = builder.build().unwrap().spawn_master().await.unwrap();
    assert!(
        master.wait_until_ready(READY_TIMEOUT).await,
        "workers not ready: {:?}",
        master.workers()
    );
    master
}

pub async fn start(config: DispatcherConfig) -> MasterHandle {
    start_ready(Dispatcher::builder(config)).await
}

/// Client that opens a fresh connection for every request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// `GET /` on the demo app: which worker answered.
pub async fn identity(
    client: &reqwest::Client,
    addr: SocketAddr,
    forwarded: Option<&str>,
) -> Value {
    let mut request = client.get(format!("http://{addr}/"));
    if let Some(value) = forwarded {
        request = request.header("x-forwarded-for", value);
    }
    request.send().await.unwrap().json().await.unwrap()
}

pub fn worker_of(identity: &Value) -> u64 {
    identity["worker"].as_u64().unwrap()
}

/// Write raw bytes and read until the server closes.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Run the binary itself as a master process.
pub fn spawn_master_process<I, S>(args: I) -> Child
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_conn-dispatcher"))
        .args(args)
        .env_remove("PORT")
        .env_remove("CORES")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap()
}

/// Wait until something accepts connections on `addr`.
pub async fn wait_for_listener(addr: SocketAddr) {
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    while TcpStream::connect(addr).await.is_err() {
        assert!(tokio::time::Instant::now() < deadline, "nothing listening on {addr}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
