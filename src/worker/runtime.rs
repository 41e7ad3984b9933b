//! Worker handshake and connection serving.

use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::OwnedFd;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

use crate::cluster::WorkerId;
use crate::control::{ControlChannel, ControlError, ControlMessage, Received};
use crate::error::DispatchError;
use crate::lifecycle::WorkerFactory;
use crate::net::ConnectionId;
use crate::worker::Replay;

/// Run the worker side of the handoff protocol until the master goes away.
pub async fn run(
    id: WorkerId,
    channel: ControlChannel,
    factory: WorkerFactory,
) -> Result<(), DispatchError> {
    let channel = Arc::new(channel);

    channel.send(&ControlMessage::Register, None).await?;
    tracing::debug!("Registered with master");

    if !wait_for_startup(&channel).await? {
        tracing::info!("Master closed control channel before STARTUP");
        return Ok(());
    }

    let app = factory(id).await.map_err(DispatchError::WorkerFactory)?;
    let local_addr = serve_loopback(app.clone()).await?;

    channel.send(&ControlMessage::Ready, None).await?;
    tracing::info!(address = %local_addr, "Worker ready");

    loop {
        match channel.recv().await {
            Ok(Some(Received {
                message:
                    ControlMessage::Connection {
                        connection_id,
                        prelude,
                    },
                handle,
            })) => {
                let Some(handle) = handle else {
                    tracing::warn!(%connection_id, "CONNECTION without a socket handle");
                    report_closed(&channel, connection_id).await;
                    continue;
                };
                tokio::spawn(serve_handoff(
                    Arc::clone(&channel),
                    app.clone(),
                    connection_id,
                    prelude,
                    handle,
                ));
            }
            Ok(Some(Received { message, .. })) => {
                tracing::warn!(message = message.kind(), "Unexpected message from master");
            }
            Ok(None) => {
                tracing::info!("Master closed control channel, exiting");
                return Ok(());
            }
            Err(ControlError::Io(e)) => return Err(ControlError::Io(e).into()),
            Err(e) => tracing::warn!(error = %e, "Discarding invalid control message"),
        }
    }
}

/// `Ok(false)` if the master hung up first.
async fn wait_for_startup(channel: &ControlChannel) -> Result<bool, ControlError> {
    loop {
        match channel.recv().await? {
            Some(Received {
                message: ControlMessage::Startup,
                ..
            }) => return Ok(true),
            Some(Received { message, .. }) => {
                tracing::warn!(message = message.kind(), "Ignoring message before STARTUP");
            }
            None => return Ok(false),
        }
    }
}

/// Bind the application on an ephemeral loopback port.
async fn serve_loopback(app: Router) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let local_addr = listener.local_addr()?;
    tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            tracing::error!(error = %e, "Loopback server failed");
        }
    });
    Ok(local_addr)
}

/// Serve one handed-off connection, then tell the master it is closed.
async fn serve_handoff(
    channel: Arc<ControlChannel>,
    app: Router,
    connection_id: ConnectionId,
    prelude: Vec<u8>,
    handle: OwnedFd,
) {
    if let Err(e) = serve_socket(app, prelude, handle).await {
        tracing::debug!(%connection_id, error = %e, "Connection ended with error");
    }
    report_closed(&channel, connection_id).await;
}

async fn serve_socket(
    app: Router,
    prelude: Vec<u8>,
    handle: OwnedFd,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let stream = std::net::TcpStream::from(handle);
    stream.set_nonblocking(true)?;
    let stream = TcpStream::from_std(stream)?;
    let peer = stream
        .peer_addr()
        .unwrap_or_else(|_| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

    let io = TokioIo::new(Replay::new(prelude, stream));
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        app.clone().oneshot(request)
    });

    Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
}

async fn report_closed(channel: &ControlChannel, connection_id: ConnectionId) {
    let message = ControlMessage::SocketClose { connection_id };
    if let Err(e) = channel.send(&message, None).await {
        tracing::warn!(%connection_id, error = %e, "Failed to report closed connection");
    }
}
