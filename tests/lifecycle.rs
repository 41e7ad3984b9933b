//! Hooks, crash recovery and shutdown with real worker processes.

use std::ffi::OsStr;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conn_dispatcher::{BoxError, DispatchError, Dispatcher};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

type HookResult = futures_util::future::Ready<Result<(), BoxError>>;

fn counting_hook(counter: &Arc<AtomicUsize>) -> impl Fn() -> HookResult + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
        futures_util::future::ready(Ok(()))
    }
}

#[tokio::test]
async fn crashed_worker_is_replaced_without_rerunning_post_master() {
    let pre = Arc::new(AtomicUsize::new(0));
    let post = Arc::new(AtomicUsize::new(0));
    let master = common::start_ready(
        Dispatcher::builder(common::config(2))
            .pre_master(counting_hook(&pre))
            .post_master(counting_hook(&post)),
    )
    .await;

    assert!(common::eventually(Duration::from_secs(5), || post.load(Ordering::SeqCst) == 1).await);
    assert_eq!(pre.load(Ordering::SeqCst), 1);

    let before = master.workers();
    let victim = before[0].clone();
    kill(Pid::from_raw(victim.pid as i32), Signal::SIGKILL).unwrap();

    assert!(
        common::eventually(common::READY_TIMEOUT, || {
            let workers = master.workers();
            workers.len() == 2
                && workers.iter().all(|w| w.ready)
                && workers.iter().all(|w| w.id != victim.id)
        })
        .await,
        "no replacement: {:?}",
        master.workers()
    );

    // exactly one replacement, with a fresh id
    let after = master.workers();
    let new_ids: Vec<u32> = after
        .iter()
        .map(|w| w.id)
        .filter(|id| before.iter().all(|b| b.id != *id))
        .collect();
    assert_eq!(new_ids, vec![3]);

    assert_eq!(post.load(Ordering::SeqCst), 1);
    assert!(master.post_master_fired());

    // replacement serves traffic
    let client = common::client();
    for _ in 0..4 {
        common::identity(&client, master.local_addr(), None).await;
    }

    master.shutdown().await;
}

#[tokio::test]
async fn failing_pre_master_never_opens_the_listener() {
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut config = common::config(1);
    config.listener.port = port;

    let result = Dispatcher::builder(config)
        .pre_master(|| async { Err("schema registry unreachable".into()) })
        .build()
        .unwrap()
        .spawn_master()
        .await;

    match result {
        Err(DispatchError::PreMaster(e)) => {
            assert_eq!(e.to_string(), "schema registry unreachable")
        }
        other => panic!("expected pre_master failure, got {other:?}"),
    }
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn invalid_config_is_rejected_at_build() {
    let mut config = common::config(0);
    config.startup.wait_interval_ms = 0;
    let err = Dispatcher::builder(config).build().unwrap_err();
    assert!(matches!(err, DispatchError::Config(_)));
}

#[tokio::test]
async fn spawn_failure_surfaces_from_start() {
    let mut config = common::config(2);
    config.process.program = Some("/nonexistent/conn-dispatcher".into());
    let result = Dispatcher::builder(config).build().unwrap().spawn_master().await;
    assert!(matches!(result, Err(DispatchError::Spawn(_))));
}

#[tokio::test]
async fn shutdown_closes_listener_connections_and_workers() {
    let master = common::start(common::config(2)).await;
    let addr = master.local_addr();
    let pids: Vec<u32> = master.workers().iter().map(|w| w.pid).collect();

    // keep-alive connection that stays tracked after its first response
    let mut open = TcpStream::connect(addr).await.unwrap();
    open.write_all(b"GET /health HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 512];
    let n = open.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK"));
    assert_eq!(master.active_connections(), 1);

    tokio::time::timeout(Duration::from_secs(10), master.shutdown())
        .await
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());

    let closed = tokio::time::timeout(Duration::from_secs(5), open.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(closed, Ok(0) | Err(_)));

    for pid in pids {
        assert_eq!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH));
    }
}

#[tokio::test]
async fn interrupt_shuts_down_the_master_process() {
    let port = common::free_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let mut master = common::spawn_master_process(["--port", &port.to_string(), "--workers", "2"]);
    common::wait_for_listener(addr).await;

    // held keep-alive connection, served once the workers are ready
    let mut open = TcpStream::connect(addr).await.unwrap();
    open.write_all(b"GET /health HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    let mut buf = [0u8; 512];
    while !response.ends_with(b"\r\n\r\nok") {
        let n = tokio::time::timeout(common::READY_TIMEOUT, open.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "closed early: {}", String::from_utf8_lossy(&response));
        response.extend_from_slice(&buf[..n]);
    }
    assert!(response.starts_with(b"HTTP/1.1 200 OK"));

    let pid = Pid::from_raw(master.id().unwrap() as i32);
    kill(pid, Signal::SIGINT).unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(10), open.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(closed, Ok(0) | Err(_)));

    let status = tokio::time::timeout(Duration::from_secs(10), master.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success(), "master exited with {status}");
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn second_interrupt_kills_a_hung_shutdown() {
    let port = common::free_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    // workers ignore SIGTERM, so shutdown waits out the whole grace period
    let config = format!(
        r#"
[listener]
host = "127.0.0.1"
port = {port}

[cluster]
workers = 1

[shutdown]
kill_grace_ms = 30000

[process]
program = "/bin/sh"
args = ["-c", "trap '' TERM; exec sleep 5"]
"#
    );
    let path = std::env::temp_dir()
        .join(format!("conn-dispatcher-hung-{}.toml", std::process::id()));
    std::fs::write(&path, config).unwrap();

    let mut master = common::spawn_master_process([OsStr::new("--config"), path.as_os_str()]);
    common::wait_for_listener(addr).await;
    // let the master reach its interrupt handler
    tokio::time::sleep(Duration::from_millis(300)).await;

    let pid = Pid::from_raw(master.id().unwrap() as i32);
    kill(pid, Signal::SIGINT).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(master.try_wait().unwrap().is_none(), "first interrupt must start shutdown, not kill");

    kill(pid, Signal::SIGINT).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), master.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.signal(), Some(Signal::SIGINT as i32));

    let _ = std::fs::remove_file(&path);
}
