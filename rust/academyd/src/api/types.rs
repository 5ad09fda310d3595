use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::Value;

use crate::db;
use crate::identity::{IdentityProvider, SqliteIdentityProvider};
use crate::storage::{FsObjectStore, ObjectStore};

/// One operation call, already lifted off the transport.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub operation: String,
    pub authorization: Option<String>,
    pub query: HashMap<String, String>,
    pub body: Value,
}

impl Request {
    pub fn get(operation: &str) -> Self {
        Self {
            method: "GET".to_string(),
            operation: operation.to_string(),
            body: Value::Null,
            ..Default::default()
        }
    }

    pub fn post(operation: &str, body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            operation: operation.to_string(),
            body,
            ..Default::default()
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {}", token));
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn query_str(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// Status plus JSON envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

pub struct AppState {
    pub db: Connection,
    pub identity: Box<dyn IdentityProvider>,
    pub storage: Box<dyn ObjectStore>,
    pub signed_url_ttl: Duration,
}

/// Settings needed to open an [`AppState`] over a workspace directory.
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub public_url: String,
    pub signing_key: Vec<u8>,
    pub session_ttl: Duration,
    pub signed_url_ttl: Duration,
}

impl AppState {
    pub fn open(workspace: &Path, options: &StateOptions) -> anyhow::Result<Self> {
        let conn = db::open_db(workspace)?;
        let identity = SqliteIdentityProvider::open(workspace, options.session_ttl)?;
        let storage = FsObjectStore::new(workspace, &options.public_url, &options.signing_key);
        Ok(Self {
            db: conn,
            identity: Box::new(identity),
            storage: Box::new(storage),
            signed_url_ttl: options.signed_url_ttl,
        })
    }
}
