use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{info, warn};

use academyd::api::{self, AppState, StateOptions};
use academyd::config::Args;
use academyd::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();
    logging::init(&args.log_level);

    let (signing_key, configured) = args.signing_key();
    if !configured {
        warn!("ACADEMYD_SIGNING_SECRET is not set; signed URLs will not survive a restart");
    }

    let options = StateOptions {
        public_url: args.public_url.clone(),
        signing_key,
        session_ttl: args.session_ttl(),
        signed_url_ttl: args.signed_url_ttl(),
    };
    let state = AppState::open(&args.workspace, &options).with_context(|| {
        format!("failed to open workspace {}", args.workspace.to_string_lossy())
    })?;

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(
        addr = %args.bind,
        workspace = %args.workspace.to_string_lossy(),
        "academyd listening"
    );

    let app = api::http::app(Arc::new(Mutex::new(state)), args.max_body_bytes);
    axum::serve(listener, app).await?;
    Ok(())
}
