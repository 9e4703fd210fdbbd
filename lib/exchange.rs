//! One-shot descriptor passing between the filesystem and the privileged resolver.
//!
//! The client picks a fresh rendezvous path, starts the resolver with it, waits for the path
//! to accept connections, writes [`TRIGGER`] and receives one `sendmsg` worth of reply: a
//! UTF-8 message of at most [`MAX_MESSAGE`] bytes and, on success, exactly one descriptor in
//! an `SCM_RIGHTS` control message. A reply without a descriptor is a refusal and the message
//! says why.

use std::ffi::OsString;
use std::future::Future;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd as _, BorrowedFd, FromRawFd as _, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use thiserror::Error;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, Interest};
use tokio::net::UnixStream;
use tokio::process::Child;
use tracing::{debug, instrument, warn};

use crate::launcher::Launcher;

/// Bytes the client sends to ask for the descriptor.
pub const TRIGGER: &str = "Request file descriptor";

/// Largest reply message, in bytes.
pub const MAX_MESSAGE: usize = 4096;

/// Message sent in place of an empty one; a stream `sendmsg` needs at least one data byte to
/// carry control data.
const EMPTY_MESSAGE: &str = "No message";

/// How long a resolver that already answered gets to exit before it is killed.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Failures obtaining a descriptor.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The resolver could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Resolver program.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The resolver exited before it started listening.
    #[error("resolver exited with {status} before accepting a connection")]
    ResolverExited {
        /// Its exit status.
        status: ExitStatus,
    },

    /// No reply arrived within the poll window.
    #[error("no descriptor after {waited:?}")]
    ProtocolTimeout {
        /// The window that elapsed.
        waited: Duration,
    },

    /// The resolver closed the connection without replying.
    #[error("resolver closed the connection without a reply")]
    NoReply,

    /// The resolver replied without a descriptor.
    #[error("access refused: {message}")]
    Denied {
        /// The resolver's explanation.
        message: String,
    },

    /// Socket-level failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What the resolver sent back.
#[derive(Debug)]
pub struct ExchangeReply {
    /// Human-readable outcome: `Success`, or the reason for refusing.
    pub message: String,
    /// The opened file, when access was granted.
    pub descriptor: Option<OwnedFd>,
}

/// A unique socket path, removed (best effort) when dropped.
#[derive(Debug)]
pub struct Rendezvous {
    path: PathBuf,
}

impl Rendezvous {
    /// A fresh, not yet existing path inside `dir`.
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        let name = format!("tardisfs-{}.sock", uuid::Uuid::new_v4().simple());
        Self {
            path: dir.join(name),
        }
    }

    /// Take ownership of an existing path, e.g. the one a resolver was told to bind.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed rendezvous socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %self.path.display(), error = %e, "could not remove rendezvous socket"),
        }
    }
}

/// Client half: send the trigger and receive the reply.
///
/// Descriptors beyond the first are closed. The connection is left open for the caller to
/// drop.
pub async fn request_descriptor(stream: &mut UnixStream) -> Result<ExchangeReply, ExchangeError> {
    stream.write_all(TRIGGER.as_bytes()).await?;

    let (payload, fds) = recv_with_descriptors(stream).await?;
    if payload.is_empty() && fds.is_empty() {
        return Err(ExchangeError::NoReply);
    }
    if fds.len() > 1 {
        warn!(count = fds.len(), "resolver sent extra descriptors; closing them");
    }

    Ok(ExchangeReply {
        message: String::from_utf8_lossy(&payload).into_owned(),
        descriptor: fds.into_iter().next(),
    })
}

async fn recv_with_descriptors(stream: &UnixStream) -> io::Result<(Vec<u8>, Vec<OwnedFd>)> {
    let raw = stream.as_raw_fd();
    stream
        .async_io(Interest::READABLE, || {
            let mut buf = vec![0u8; MAX_MESSAGE];
            let mut cmsg = nix::cmsg_space!([RawFd; 1]);
            let (len, fds) = {
                let mut iov = [IoSliceMut::new(&mut buf)];
                let msg = recvmsg::<()>(
                    raw,
                    &mut iov,
                    Some(&mut cmsg),
                    MsgFlags::MSG_CMSG_CLOEXEC,
                )
                .map_err(io::Error::from)?;

                let mut fds = Vec::new();
                for cmsg in msg.cmsgs().map_err(io::Error::from)? {
                    if let ControlMessageOwned::ScmRights(received) = cmsg {
                        // SAFETY: the kernel just installed these descriptors in our table and
                        // nothing else refers to them.
                        fds.extend(
                            received
                                .into_iter()
                                .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                        );
                    }
                }
                (msg.bytes, fds)
            };
            buf.truncate(len);
            Ok((buf, fds))
        })
        .await
}

/// Server half: wait for the client's request. Returns whether it was the expected trigger.
pub async fn read_trigger(stream: &mut UnixStream) -> io::Result<bool> {
    let mut buf = vec![0u8; 1024];
    let mut filled = 0;
    while filled < TRIGGER.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(&buf[..filled] == TRIGGER.as_bytes())
}

/// Server half: send `message` and, if given, one descriptor.
///
/// The message is cut to [`MAX_MESSAGE`] bytes on a character boundary. The descriptor is
/// only borrowed; the caller closes its copy.
pub async fn send_reply(
    stream: &mut UnixStream,
    message: &str,
    descriptor: Option<BorrowedFd<'_>>,
) -> io::Result<()> {
    let payload = reply_payload(message);
    let fds: Vec<RawFd> = descriptor.iter().map(|fd| fd.as_raw_fd()).collect();
    let raw = stream.as_raw_fd();

    let sent = stream
        .async_io(Interest::WRITABLE, || {
            let iov = [IoSlice::new(payload.as_bytes())];
            let cmsgs: Vec<ControlMessage<'_>> = if fds.is_empty() {
                Vec::new()
            } else {
                vec![ControlMessage::ScmRights(&fds)]
            };
            sendmsg::<()>(raw, &iov, &cmsgs, MsgFlags::empty(), None).map_err(io::Error::from)
        })
        .await?;

    if sent < payload.len() {
        stream.write_all(&payload.as_bytes()[sent..]).await?;
    }
    stream.flush().await
}

fn reply_payload(message: &str) -> &str {
    if message.is_empty() {
        return EMPTY_MESSAGE;
    }
    if message.len() <= MAX_MESSAGE {
        return message;
    }
    let mut end = MAX_MESSAGE;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Something that can open a datafile on our behalf.
pub trait DescriptorSource: Send + Sync + 'static {
    /// An open, readable descriptor for the datafile, as reached through the experiment.
    fn open(
        &self,
        experiment_id: u64,
        datafile_id: u64,
    ) -> impl Future<Output = Result<OwnedFd, ExchangeError>> + Send;
}

/// Launches the resolver for each request and runs the client half of the exchange.
#[derive(Debug, Clone)]
pub struct DescriptorExchange {
    launcher: Launcher,
    program: String,
    locator: OsString,
    auth_provider: String,
    socket_dir: PathBuf,
    poll_interval: Duration,
    window: Duration,
}

impl DescriptorExchange {
    /// Default delay between connection attempts.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
    /// Default bound on the whole exchange.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

    /// Run `program <locator> <auth_provider> <socket> <experiment> <datafile>` per request.
    ///
    /// `locator` tells the resolver where its own configuration lives.
    #[must_use]
    pub fn new(
        launcher: Launcher,
        program: impl Into<String>,
        locator: impl Into<OsString>,
        auth_provider: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            program: program.into(),
            locator: locator.into(),
            auth_provider: auth_provider.into(),
            socket_dir: std::env::temp_dir(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            window: Self::DEFAULT_WINDOW,
        }
    }

    /// Directory rendezvous sockets are created in. Must be writable by the resolver.
    #[must_use]
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Delay between connection attempts.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound on the whole exchange, from spawn to reply.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Run one exchange.
    ///
    /// A refusal is returned as a reply without a descriptor, not as an error.
    #[instrument(name = "DescriptorExchange::fetch", skip(self))]
    pub async fn fetch(
        &self,
        experiment_id: u64,
        datafile_id: u64,
    ) -> Result<ExchangeReply, ExchangeError> {
        let rendezvous = Rendezvous::new(&self.socket_dir);
        let mut child = self
            .launcher
            .command(&self.program)
            .arg(&self.locator)
            .arg(&self.auth_provider)
            .arg(rendezvous.path())
            .arg(experiment_id.to_string())
            .arg(datafile_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExchangeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let outcome = tokio::time::timeout(
            self.window,
            converse(&mut child, rendezvous.path(), self.poll_interval),
        )
        .await;

        match outcome {
            Ok(Ok(reply)) => {
                tokio::spawn(reap(child));
                Ok(reply)
            }
            Ok(Err(e)) => {
                terminate(&mut child).await;
                Err(e)
            }
            Err(_elapsed) => {
                warn!(window = ?self.window, "resolver did not answer in time");
                terminate(&mut child).await;
                Err(ExchangeError::ProtocolTimeout {
                    waited: self.window,
                })
            }
        }
    }
}

async fn converse(
    child: &mut Child,
    path: &Path,
    poll_interval: Duration,
) -> Result<ExchangeReply, ExchangeError> {
    let mut stream = connect_when_ready(child, path, poll_interval).await?;
    request_descriptor(&mut stream).await
}

async fn connect_when_ready(
    child: &mut Child,
    path: &Path,
    poll_interval: Duration,
) -> Result<UnixStream, ExchangeError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(ExchangeError::ResolverExited { status });
        }
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) => {}
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "resolver already gone");
    }
}

async fn reap(mut child: Child) {
    match tokio::time::timeout(REAP_GRACE, child.wait()).await {
        Ok(Ok(status)) if !status.success() => debug!(%status, "resolver exited unsuccessfully"),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!(error = %e, "could not wait for resolver"),
        Err(_elapsed) => {
            warn!("resolver lingered after replying; killing it");
            terminate(&mut child).await;
        }
    }
}

impl DescriptorSource for DescriptorExchange {
    async fn open(&self, experiment_id: u64, datafile_id: u64) -> Result<OwnedFd, ExchangeError> {
        let reply = self.fetch(experiment_id, datafile_id).await?;
        match reply.descriptor {
            Some(fd) => {
                debug!(message = %reply.message, "descriptor received");
                Ok(fd)
            }
            None => Err(ExchangeError::Denied {
                message: reply.message,
            }),
        }
    }
}
