//! Signer Service
//!
//! HTTP front end for signing with previously generated fixtures. Co-signers
//! come either from the request or from the operator console.

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tss_core::{
    aggregate::ethereum_address,
    mpc::RunConfig,
    session::{prompt_lines, Feedback, SessionBuilder, SignerSet, JOIN_PROMPT},
    sign,
    store::{FixtureStore, DEFAULT_FIXTURE_DIR},
    PartyIndex, DEFAULT_THRESHOLD,
};

/// Signer service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tss-signer-svc")]
#[command(about = "HTTP signing service for threshold ECDSA")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Directory holding keygen fixtures
    #[arg(short, long, env = "FIXTURE_DIR", default_value = DEFAULT_FIXTURE_DIR)]
    dest: PathBuf,

    /// Threshold the fixtures were generated with
    #[arg(short, long, env = "THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    threshold: usize,

    /// Abort a signing run after this many seconds
    #[arg(long, env = "RUN_TIMEOUT_SECS")]
    timeout: Option<u64>,
}

/// Application state
struct AppState {
    store: FixtureStore,
    threshold: usize,
    run_config: RunConfig,
    /// One operator console session at a time
    console: Arc<Mutex<()>>,
}

#[derive(Debug, Deserialize)]
struct SignParams {
    message: Option<String>,
    /// Comma-separated fixture indices, e.g. `0,2`
    signers: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!(
        listen = %args.listen,
        dest = ?args.dest,
        threshold = args.threshold,
        "Starting signer service"
    );

    let mut run_config = RunConfig::default();
    if let Some(secs) = args.timeout {
        run_config = run_config.with_deadline(Duration::from_secs(secs));
    }

    let state = Arc::new(AppState {
        store: FixtureStore::new(args.dest),
        threshold: args.threshold,
        run_config,
        console: Arc::new(Mutex::new(())),
    });

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sign", get(sign_handler))
        .route("/address", get(address))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tss-signer-svc",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Sign `message` with the listed signers, or with signers chosen on the
/// operator console when none are listed
async fn sign_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SignParams>,
) -> Response {
    let Some(message) = params.message.filter(|m| !m.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Message parameter is required");
    };

    let signers = match params.signers {
        Some(list) => {
            let collected = parse_signers(&list).and_then(|indices| {
                SignerSet::collect(&state.store, state.threshold + 1, &indices)
                    .map_err(|e| e.to_string())
            });
            match collected {
                Ok(signers) => signers,
                Err(reason) => {
                    warn!(signers = %list, %reason, "Rejected signer list");
                    return error_response(StatusCode::BAD_REQUEST, reason);
                }
            }
        }
        None => match console_session(&state).await {
            Ok(signers) => signers,
            Err(e) => {
                error!(error = %e, "Could not assemble a session");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
            }
        },
    };

    info!(message = %message, signers = signers.len(), "Signing");

    match sign::sign_message(signers, &message, &state.run_config).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            error!(error = %e, "Signing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// Joint public key and its Ethereum address
async fn address(State(state): State<Arc<AppState>>) -> Response {
    let public_key = match state.store.load_public_key() {
        Ok(public_key) => public_key,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    match ethereum_address(&public_key) {
        Ok(address) => Json(serde_json::json!({
            "address": address,
            "public_key": hex::encode(&public_key),
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn parse_signers(list: &str) -> std::result::Result<Vec<PartyIndex>, String> {
    list.split(',')
        .map(|s| {
            let s = s.trim();
            s.parse()
                .map_err(|_| format!("Invalid signer {:?}. Please use fixture indices.", s))
        })
        .collect()
}

async fn console_session(state: &AppState) -> tss_core::Result<SignerSet> {
    let store = state.store.clone();
    let target = state.threshold + 1;

    with_console(&state.console, move || {
        SessionBuilder::new(&store, target).build(prompt_lines(JOIN_PROMPT), |event| match event {
            Feedback::Joined(index) => println!("User {} joined.", index),
            Feedback::Revoked(index) => println!("User {} revoked.", index),
            Feedback::Rejected(reason) => println!("{}", reason),
        })
    })
    .await
}

/// Run `job` on the blocking pool. The console stays locked until `job`
/// returns, even if the awaiting request is dropped first.
async fn with_console<T, F>(console: &Arc<Mutex<()>>, job: F) -> tss_core::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> tss_core::Result<T> + Send + 'static,
{
    let guard = console.clone().lock_owned().await;

    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        job()
    })
    .await
    .map_err(|e| tss_core::Error::Internal(format!("console task failed: {}", e)))?
}
