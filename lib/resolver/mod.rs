//! The privileged side of the descriptor exchange.
//!
//! A resolver serves exactly one request: it binds the rendezvous socket, decides whether the
//! caller may read the datafile, opens it if so, accepts the single connection and replies
//! with a message and at most one descriptor. Every path that gets as far as accepting a
//! connection sends a reply, and the socket is removed however the resolver exits.
//!
//! The caller's identity is never read from the environment here; `main` determines it and
//! passes a [`CallerCredential`] in.

mod config;
mod directory;

use std::fs::Permissions;
use std::future::Future;
use std::io;
use std::os::fd::AsFd as _;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{debug, info, instrument, warn};

pub use config::{ResolverConfig, ResolverConfigError};
pub use directory::ApiDirectory;

use crate::exchange::{Rendezvous, read_trigger, send_reply};

/// Message sent when access is granted.
pub const SUCCESS: &str = "Success";

/// Who asked for the descriptor, as established by the privilege mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerCredential {
    /// OS username, matched against the backend's user authentications.
    pub username: String,
    /// OS uid, when known. Connections from any other uid are refused.
    pub uid: Option<u32>,
}

/// One descriptor request, from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    /// Where to listen.
    pub socket_path: PathBuf,
    /// Authentication method the username belongs to.
    pub auth_provider: String,
    /// Experiment the caller reached the datafile through.
    pub experiment_id: u64,
    /// The datafile.
    pub datafile_id: u64,
}

/// Lifecycle of a resolver, logged as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    /// Process running, nothing bound.
    Started,
    /// Socket bound and listening.
    Listening,
    /// Looking up the caller's backend identity.
    Authenticating,
    /// Checking the caller's rights on the experiment and datafile.
    Authorizing,
    /// Finding and opening the file.
    Locating,
    /// The client connected.
    AcceptedConnection,
    /// The reply went out.
    SentResponse,
}

/// The outcome of an authorization check. Computed per request and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether a descriptor will be sent.
    pub granted: bool,
    /// [`SUCCESS`], or why not.
    pub reason: String,
}

impl AccessDecision {
    /// Access granted.
    #[must_use]
    pub fn grant() -> Self {
        Self {
            granted: true,
            reason: SUCCESS.to_owned(),
        }
    }

    /// Access refused for `reason`.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
        }
    }
}

/// The backend's view of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Backend user id.
    pub id: u64,
    /// Backend username.
    pub username: String,
    /// Staff or superuser.
    pub privileged: bool,
    /// Groups the user belongs to.
    pub group_ids: Vec<u64>,
}

/// Failures while answering a request.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A backend query failed.
    #[error("backend query failed: {0}")]
    Api(#[from] tardis_api::TardisError),

    /// The datafile has no stored copy we can use.
    #[error("datafile {datafile_id} has no usable replica")]
    NoReplica {
        /// The datafile.
        datafile_id: u64,
    },

    /// A replica location points outside the store.
    #[error("replica location {location} escapes the store")]
    OutsideStore {
        /// The offending location.
        location: String,
    },

    /// The client never connected.
    #[error("no connection within {0:?}")]
    AcceptTimeout(Duration),

    /// Socket or file failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The authorization facts the resolver needs, and where files live.
pub trait AccessDirectory: Send + Sync {
    /// The backend user for an OS username under an authentication method.
    fn find_user(
        &self,
        username: &str,
        auth_method: &str,
    ) -> impl Future<Output = Result<Option<UserProfile>, ResolveError>> + Send;

    /// Whether the experiment's public access level allows distribution.
    fn experiment_public(
        &self,
        experiment_id: u64,
    ) -> impl Future<Output = Result<bool, ResolveError>> + Send;

    /// Whether the experiment is owned by or shared with the user.
    fn owned_or_shared(
        &self,
        experiment_id: u64,
        user: &UserProfile,
    ) -> impl Future<Output = Result<bool, ResolveError>> + Send;

    /// Whether the datafile's dataset belongs to the experiment.
    fn datafile_in_experiment(
        &self,
        datafile_id: u64,
        experiment_id: u64,
    ) -> impl Future<Output = Result<bool, ResolveError>> + Send;

    /// Local path of the datafile's content.
    fn locate(&self, datafile_id: u64) -> impl Future<Output = Result<PathBuf, ResolveError>> + Send;
}

/// Decide whether `caller` may read the datafile. Lookup failures become denials.
#[instrument(skip(directory))]
pub async fn authorize<D: AccessDirectory>(
    directory: &D,
    caller: &CallerCredential,
    auth_provider: &str,
    experiment_id: u64,
    datafile_id: u64,
) -> AccessDecision {
    match decide(directory, caller, auth_provider, experiment_id, datafile_id).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!(error = %e, "lookup failed while authorizing");
            AccessDecision::deny(format!(
                "Failed to resolve access for datafile {datafile_id}: {e}"
            ))
        }
    }
}

async fn decide<D: AccessDirectory>(
    directory: &D,
    caller: &CallerCredential,
    auth_provider: &str,
    experiment_id: u64,
    datafile_id: u64,
) -> Result<AccessDecision, ResolveError> {
    info!(state = ?ResolverState::Authenticating);
    let Some(user) = directory.find_user(&caller.username, auth_provider).await? else {
        return Ok(AccessDecision::deny(format!(
            "User {} was not found in MyTardis for authentication method {auth_provider}",
            caller.username
        )));
    };

    info!(state = ?ResolverState::Authorizing, user = %user.username);
    if user.privileged {
        return Ok(AccessDecision::grant());
    }

    if !directory
        .datafile_in_experiment(datafile_id, experiment_id)
        .await?
    {
        return Ok(AccessDecision::deny(format!(
            "Datafile (ID {datafile_id}) does not belong to experiment (ID {experiment_id})."
        )));
    }

    if directory.experiment_public(experiment_id).await?
        || directory.owned_or_shared(experiment_id, &user).await?
    {
        return Ok(AccessDecision::grant());
    }

    Ok(AccessDecision::deny(format!(
        "Access denied for user {}.",
        caller.username
    )))
}

/// A bound rendezvous socket. Dropping it removes the path.
struct Endpoint {
    listener: UnixListener,
    _rendezvous: Rendezvous,
}

impl Endpoint {
    fn bind(path: &Path) -> io::Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(path)?;
        let rendezvous = Rendezvous::at(path);
        std::fs::set_permissions(path, Permissions::from_mode(0o666))?;
        info!(state = ?ResolverState::Listening, path = %path.display());
        Ok(Self {
            listener,
            _rendezvous: rendezvous,
        })
    }

    /// Accept one connection and send the decision. The file, if any, is closed on return.
    async fn answer(
        self,
        caller: &CallerCredential,
        mut decision: AccessDecision,
        mut file: Option<std::fs::File>,
        accept_timeout: Duration,
    ) -> Result<AccessDecision, ResolveError> {
        let (mut stream, _addr) = tokio::time::timeout(accept_timeout, self.listener.accept())
            .await
            .map_err(|_elapsed| ResolveError::AcceptTimeout(accept_timeout))??;
        info!(state = ?ResolverState::AcceptedConnection);

        if let Some(expected) = caller.uid {
            let peer = stream.peer_cred()?;
            if peer.uid() != expected {
                warn!(peer_uid = peer.uid(), expected, "connection from another user");
                decision = AccessDecision::deny(format!(
                    "Connection did not come from user {}.",
                    caller.username
                ));
                file = None;
            }
        }

        if !read_trigger(&mut stream).await? {
            warn!("client sent an unexpected request");
            decision = AccessDecision::deny("Unexpected request.");
            file = None;
        }

        let fd = file.as_ref().map(|f| f.as_fd());
        send_reply(&mut stream, &decision.reason, fd).await?;
        info!(state = ?ResolverState::SentResponse, granted = decision.granted);
        Ok(decision)
    }
}

/// Serve one request against `directory`.
#[instrument(name = "resolver::serve", skip(directory, request), fields(
    experiment_id = request.experiment_id,
    datafile_id = request.datafile_id,
))]
pub async fn serve<D: AccessDirectory>(
    directory: &D,
    caller: &CallerCredential,
    request: &ResolveRequest,
    accept_timeout: Duration,
) -> Result<AccessDecision, ResolveError> {
    info!(state = ?ResolverState::Started);
    let endpoint = Endpoint::bind(&request.socket_path)?;

    let mut decision = authorize(
        directory,
        caller,
        &request.auth_provider,
        request.experiment_id,
        request.datafile_id,
    )
    .await;

    let mut file = None;
    if decision.granted {
        info!(state = ?ResolverState::Locating);
        match open_datafile(directory, request.datafile_id).await {
            Ok(opened) => file = Some(opened),
            Err(e) => {
                warn!(error = %e, "granted but could not open the datafile");
                decision = AccessDecision::deny(format!(
                    "Failed to open datafile {}: {e}",
                    request.datafile_id
                ));
            }
        }
    }

    endpoint.answer(caller, decision, file, accept_timeout).await
}

async fn open_datafile<D: AccessDirectory>(
    directory: &D,
    datafile_id: u64,
) -> Result<std::fs::File, ResolveError> {
    let path = directory.locate(datafile_id).await?;
    debug!(path = %path.display(), "opening datafile");
    let file = tokio::fs::File::open(&path).await?;
    Ok(file.into_std().await)
}

/// Answer a request without consulting anything, e.g. when the resolver cannot load its
/// configuration. The client still gets a reply rather than a timeout.
pub async fn refuse(
    caller: &CallerCredential,
    request: &ResolveRequest,
    message: &str,
    accept_timeout: Duration,
) -> Result<AccessDecision, ResolveError> {
    info!(state = ?ResolverState::Started);
    let endpoint = Endpoint::bind(&request.socket_path)?;
    endpoint
        .answer(caller, AccessDecision::deny(message), None, accept_timeout)
        .await
}
