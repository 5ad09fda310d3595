use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// School administration service: academies, students, attendance, report cards.
#[derive(Debug, Clone, Parser)]
#[command(name = "academyd", version, about)]
pub struct Args {
    /// Directory holding the relational store, identity store, and objects
    #[arg(long, env = "ACADEMYD_WORKSPACE", default_value = "./academyd-data")]
    pub workspace: PathBuf,

    #[arg(long, env = "ACADEMYD_BIND", default_value = "127.0.0.1:8787")]
    pub bind: SocketAddr,

    /// Prefix for signed object URLs
    #[arg(long, env = "ACADEMYD_PUBLIC_URL", default_value = "http://127.0.0.1:8787")]
    pub public_url: String,

    /// HMAC key for signed URLs. A random key is used when unset, so URLs do
    /// not survive a restart.
    #[arg(long, env = "ACADEMYD_SIGNING_SECRET", hide_env_values = true)]
    pub signing_secret: Option<String>,

    #[arg(long, env = "ACADEMYD_SIGNED_URL_TTL_SECS", default_value_t = 604_800)]
    pub signed_url_ttl_secs: u64,

    #[arg(long, env = "ACADEMYD_SESSION_TTL_SECS", default_value_t = 86_400)]
    pub session_ttl_secs: u64,

    /// Largest accepted request body in bytes (report cards arrive base64 encoded)
    #[arg(long, env = "ACADEMYD_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Default log filter; `RUST_LOG` takes precedence
    #[arg(long, env = "ACADEMYD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Parses arguments after loading `.env`, if present.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Args::parse()
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Configured signing key, or a fresh random one. The flag reports which.
    pub fn signing_key(&self) -> (Vec<u8>, bool) {
        match self.signing_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => (secret.as_bytes().to_vec(), true),
            None => {
                let key: [u8; 32] = rand::random();
                (key.to_vec(), false)
            }
        }
    }
}
