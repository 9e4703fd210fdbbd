//! `_datafiledescriptord`: opens one datafile on behalf of the user who invoked it through
//! `sudo`, and hands the descriptor over a Unix socket if they may read it.
//!
//! Started once per descriptor request; exits after sending one reply.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::ExposeSecret as _;
use tardis_api::ClientBuilder;
use tardis_fs::resolver::{
    self, ApiDirectory, CallerCredential, ResolveRequest, ResolverConfig,
};
use tardis_fs::trc::{LogLevel, Trc};
use tracing::{error, info};

/// Used when the configuration cannot be read, so the client is not left waiting.
const FALLBACK_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(version, about = "Hand a MyTardis datafile descriptor to an authorized caller.")]
struct Args {
    /// Resolver configuration TOML.
    config: PathBuf,

    /// Authentication method the caller's username belongs to.
    auth_provider: String,

    /// Socket path to listen on.
    socket_path: PathBuf,

    /// Experiment the datafile was reached through.
    experiment_id: u64,

    /// Datafile to open.
    datafile_id: u64,

    /// Log verbosity.
    #[arg(short = 'l', long = "loglevel", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

fn caller_from_env() -> Option<CallerCredential> {
    let username = std::env::var("SUDO_USER")
        .ok()
        .filter(|u| !u.trim().is_empty())?;
    let uid = std::env::var("SUDO_UID").ok().and_then(|v| v.parse().ok());
    Some(CallerCredential { username, uid })
}

async fn run(args: Args, caller: CallerCredential) -> Result<bool, resolver::ResolveError> {
    let request = ResolveRequest {
        socket_path: args.socket_path,
        auth_provider: args.auth_provider,
        experiment_id: args.experiment_id,
        datafile_id: args.datafile_id,
    };

    let config = match ResolverConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "cannot serve without configuration");
            let decision = resolver::refuse(
                &caller,
                &request,
                "The datafile service is misconfigured; contact your MyTardis administrator.",
                FALLBACK_ACCEPT_TIMEOUT,
            )
            .await?;
            return Ok(decision.granted);
        }
    };

    let client = match ClientBuilder::new(
        config.backend_url.clone(),
        config.service_username.clone(),
        config.service_api_key.expose_secret(),
    )
    .timeout(config.request_timeout())
    .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "cannot build backend client");
            let decision = resolver::refuse(
                &caller,
                &request,
                &format!("Failed to contact MyTardis: {e}"),
                config.accept_timeout(),
            )
            .await?;
            return Ok(decision.granted);
        }
    };

    let directory = ApiDirectory::new(client, config.store_root.clone());
    let decision = resolver::serve(&directory, &caller, &request, config.accept_timeout()).await?;
    Ok(decision.granted)
}

fn main() {
    let args = Args::try_parse().unwrap_or_else(|e| {
        let code = i32::from(e.use_stderr());
        let _ = e.print();
        std::process::exit(code);
    });

    // stdout is never read by the client.
    if let Err(e) = Trc::with_level(args.log_level).daemon().init() {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let Some(caller) = caller_from_env() else {
        error!("SUDO_USER is not set; this program must be started through sudo");
        std::process::exit(1);
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(args, caller)) {
        Ok(granted) => info!(granted, "reply sent"),
        Err(e) => {
            error!(error = %e, "no reply was sent");
            std::process::exit(1);
        }
    }
}
