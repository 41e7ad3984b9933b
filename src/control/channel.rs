//! Control channel between the master and one worker.
//!
//! # Responsibilities
//! - Own one end of a `SOCK_SEQPACKET` Unix socket pair
//! - Send/receive whole frames (one datagram = one message)
//! - Pass live socket descriptors with `SCM_RIGHTS`
//!
//! This is the only place in the crate that touches descriptor passing.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::socket::{
    recvmsg, sendmsg, socketpair, AddressFamily, ControlMessage as Cmsg, ControlMessageOwned,
    MsgFlags, SockFlag, SockType,
};
use tokio::io::unix::AsyncFd;

use crate::control::message::{self, ControlMessage, MAX_FRAME_LEN};
use crate::control::ControlError;

/// A decoded message and, for `CONNECTION`, the socket that came with it.
#[derive(Debug)]
pub struct Received {
    pub message: ControlMessage,
    pub handle: Option<OwnedFd>,
}

/// One end of the master/worker control socket.
#[derive(Debug)]
pub struct ControlChannel {
    fd: AsyncFd<OwnedFd>,
}

impl ControlChannel {
    /// Create a connected pair of raw descriptors.
    ///
    /// Both ends are close-on-exec and non-blocking; the spawner decides
    /// which end survives into the child.
    pub fn pair() -> Result<(OwnedFd, OwnedFd), ControlError> {
        let pair = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        )
        .map_err(io::Error::from)?;
        Ok(pair)
    }

    /// Wrap an owned descriptor. Must be called inside a Tokio runtime.
    pub fn from_owned(fd: OwnedFd) -> Result<Self, ControlError> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Adopt a descriptor inherited from the parent process.
    ///
    /// # Safety
    /// `raw` must be an open descriptor that nothing else in this process owns.
    pub unsafe fn from_inherited(raw: RawFd) -> Result<Self, ControlError> {
        let fd = OwnedFd::from_raw_fd(raw);
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;
        Self::from_owned(fd)
    }

    /// Send a message, optionally transferring a socket handle with it.
    pub async fn send(
        &self,
        message: &ControlMessage,
        handle: Option<BorrowedFd<'_>>,
    ) -> Result<(), ControlError> {
        let frame = message::encode(message)?;
        let raw_handle = handle.map(|h| h.as_raw_fd());
        loop {
            let mut guard = self.fd.writable().await?;
            let attempt =
                guard.try_io(|inner| send_frame(inner.get_ref().as_raw_fd(), &frame, raw_handle));
            match attempt {
                Ok(result) => {
                    let sent = result?;
                    if sent != frame.len() {
                        return Err(ControlError::Malformed("short datagram write"));
                    }
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive the next message. `Ok(None)` means the peer hung up.
    pub async fn recv(&self) -> Result<Option<Received>, ControlError> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| recv_frame(inner.get_ref().as_raw_fd())) {
                Ok(result) => {
                    let Some((frame, handle)) = result? else {
                        return Ok(None);
                    };
                    let message = message::decode(&frame)?;
                    if handle.is_some() && !matches!(message, ControlMessage::Connection { .. }) {
                        // stray descriptor is closed on drop
                        return Err(ControlError::UnexpectedHandle(message.kind()));
                    }
                    return Ok(Some(Received { message, handle }));
                }
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsFd for ControlChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.get_ref().as_fd()
    }
}

fn set_nonblocking(raw: RawFd) -> io::Result<()> {
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

fn send_frame(raw: RawFd, frame: &[u8], handle: Option<RawFd>) -> io::Result<usize> {
    let iov = [IoSlice::new(frame)];
    let fds: Vec<RawFd> = handle.into_iter().collect();
    let cmsgs: Vec<Cmsg<'_>> = if fds.is_empty() {
        Vec::new()
    } else {
        vec![Cmsg::ScmRights(&fds)]
    };
    sendmsg::<()>(raw, &iov, &cmsgs, MsgFlags::MSG_NOSIGNAL, None).map_err(io::Error::from)
}

type RawFrame = (Vec<u8>, Option<OwnedFd>);

fn recv_frame(raw: RawFd) -> io::Result<Option<RawFrame>> {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);

    let (len, fds, truncated) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(raw, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
            .map_err(io::Error::from)?;

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                // SAFETY: SCM_RIGHTS installs fresh descriptors owned by this process.
                fds.extend(received.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
            }
        }
        let truncated = msg
            .flags
            .intersects(MsgFlags::MSG_TRUNC | MsgFlags::MSG_CTRUNC);
        (msg.bytes, fds, truncated)
    };

    if truncated {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "control frame truncated",
        ));
    }
    if len == 0 && fds.is_empty() {
        return Ok(None);
    }

    buf.truncate(len);
    let mut fds = fds.into_iter();
    let handle = fds.next();
    if fds.next().is_some() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "more than one descriptor in a control frame",
        ));
    }
    Ok(Some((buf, handle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn channel_pair() -> (ControlChannel, ControlChannel) {
        let (a, b) = ControlChannel::pair().unwrap();
        (
            ControlChannel::from_owned(a).unwrap(),
            ControlChannel::from_owned(b).unwrap(),
        )
    }

    #[tokio::test]
    async fn plain_messages_cross_the_pair() {
        let (master, worker) = channel_pair();

        worker.send(&ControlMessage::Register, None).await.unwrap();
        let received = master.recv().await.unwrap().unwrap();
        assert_eq!(received.message, ControlMessage::Register);
        assert!(received.handle.is_none());

        master.send(&ControlMessage::Startup, None).await.unwrap();
        let received = worker.recv().await.unwrap().unwrap();
        assert_eq!(received.message, ControlMessage::Startup);
    }

    #[tokio::test]
    async fn hang_up_reads_as_none() {
        let (master, worker) = channel_pair();
        drop(worker);
        assert!(master.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn live_socket_is_transferred() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        let accepted = accepted.into_std().unwrap();

        let (master, worker) = channel_pair();
        let id = ConnectionId::new();
        master
            .send(
                &ControlMessage::Connection {
                    connection_id: id,
                    prelude: b"hello".to_vec(),
                },
                Some(accepted.as_fd()),
            )
            .await
            .unwrap();
        drop(accepted);

        let received = worker.recv().await.unwrap().unwrap();
        assert_eq!(
            received.message,
            ControlMessage::Connection {
                connection_id: id,
                prelude: b"hello".to_vec()
            }
        );

        let handle = received.handle.expect("socket handle");
        let std_stream = std::net::TcpStream::from(handle);
        std_stream.set_nonblocking(true).unwrap();
        let mut transferred = TcpStream::from_std(std_stream).unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        transferred.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        transferred.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
