//! Caller identity: roles, capabilities, the identity-provider seam, and the
//! resolver that turns a bearer credential into an academy-scoped caller.

use crate::error::{ServiceError, ServiceResult};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub const IDENTITY_DB_FILE: &str = "identity.sqlite3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Academy,
    Admin,
    Teacher,
    Parent,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "academy" => Some(Role::Academy),
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "parent" => Some(Role::Parent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Academy => "academy",
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
        }
    }

    pub fn allows(self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Academy => !matches!(capability, MarkAttendance | ViewOwnRoster),
            Role::Admin => !matches!(capability, MarkAttendance | ViewOwnRoster),
            Role::Teacher => matches!(
                capability,
                ViewClasses
                    | ViewOwnRoster
                    | MarkAttendance
                    | SendNotifications
                    | ViewParents
                    | UploadReportCards
                    | ViewPerformance
                    | AssignHomework
            ),
            Role::Parent => false,
        }
    }
}

/// Things an operation may require of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateStaff,
    ManageClasses,
    ViewClasses,
    ManageStudents,
    ViewOwnRoster,
    MarkAttendance,
    SendNotifications,
    ViewParents,
    UploadReportCards,
    ViewPerformance,
    AssignHomework,
}

/// Authenticated caller as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
    /// External academy identifier (`ACAD-…`) from the identity metadata.
    pub academy_ref: Option<String>,
    pub display_name: Option<String>,
}

impl Caller {
    pub fn require(&self, capability: Capability, message: &str) -> ServiceResult<()> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(message.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcademyRef {
    pub id: String,
    pub external_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewIdentity {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub academy_ref: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    pub academy_ref: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub expires_at: String,
    pub user: IdentityRecord,
}

/// The external identity service. Issues and validates bearer tokens and owns
/// role and academy-affiliation metadata.
pub trait IdentityProvider: Send {
    fn create_user(&self, new_user: &NewIdentity) -> ServiceResult<IdentityRecord>;
    fn authenticate(&self, token: &str) -> ServiceResult<Caller>;
    fn sign_in(&self, user_id: &str, password: &str) -> ServiceResult<Session>;
    fn find_by_email(&self, email: &str) -> ServiceResult<Option<IdentityRecord>>;
    fn find_by_phone(&self, phone: &str) -> ServiceResult<Vec<IdentityRecord>>;
    fn get_user(&self, user_id: &str) -> ServiceResult<Option<IdentityRecord>>;
}

/// Parses an `Authorization` header value and asks the provider who it is.
pub fn resolve_caller(
    provider: &dyn IdentityProvider,
    authorization: Option<&str>,
) -> ServiceResult<Caller> {
    let Some(header) = authorization else {
        return Err(ServiceError::Unauthorized(
            "Missing Authorization header".to_string(),
        ));
    };
    let token = header
        .trim()
        .strip_prefix("Bearer ")
        .map(str::trim)
        .unwrap_or("");
    if token.is_empty() {
        return Err(ServiceError::Unauthorized("Invalid token format".to_string()));
    }
    provider.authenticate(token)
}

pub fn resolve_academy(conn: &Connection, external_id: &str) -> ServiceResult<AcademyRef> {
    conn.query_row(
        "SELECT id, academy_id FROM academies WHERE academy_id = ?",
        [external_id],
        |r| {
            Ok(AcademyRef {
                id: r.get(0)?,
                external_id: r.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ServiceError::not_found("Academy not found for this user"))
}

/// Academy the caller belongs to; callers without an affiliation cannot act on
/// academy-scoped data.
pub fn caller_academy(conn: &Connection, caller: &Caller) -> ServiceResult<AcademyRef> {
    let Some(external_id) = caller.academy_ref.as_deref() else {
        return Err(ServiceError::Forbidden(
            "Academy not associated with this user".to_string(),
        ));
    };
    resolve_academy(conn, external_id)
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn hash_password(salt: &str, password: &str) -> String {
    sha256_hex(&format!("{}:{}", salt, password))
}

/// Identity provider over its own SQLite file, separate from the relational store.
pub struct SqliteIdentityProvider {
    conn: Connection,
    session_ttl: Duration,
}

impl SqliteIdentityProvider {
    pub fn open(workspace: &Path, session_ttl: Duration) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let path = workspace.join(IDENTITY_DB_FILE);
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open identity store {}", path.to_string_lossy()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_users(
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                phone TEXT,
                password_salt TEXT,
                password_hash TEXT,
                role TEXT NOT NULL,
                academy_ref TEXT,
                display_name TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_auth_users_phone ON auth_users(phone)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_sessions(
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY(user_id) REFERENCES auth_users(id)
            )",
            [],
        )?;
        Ok(Self { conn, session_ttl })
    }

    fn load(&self, where_sql: &str, value: &str) -> ServiceResult<Vec<IdentityRecord>> {
        let sql = format!(
            "SELECT id, email, phone, role, academy_ref, display_name
             FROM auth_users WHERE {} ORDER BY created_at, id",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([value], |r| {
                let raw_role: String = r.get(3)?;
                let role = Role::parse(&raw_role).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        format!("unknown role {:?}", raw_role).into(),
                    )
                })?;
                Ok(IdentityRecord {
                    id: r.get(0)?,
                    email: r.get(1)?,
                    phone: r.get(2)?,
                    role,
                    academy_ref: r.get(4)?,
                    display_name: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl IdentityProvider for SqliteIdentityProvider {
    fn create_user(&self, new_user: &NewIdentity) -> ServiceResult<IdentityRecord> {
        let role = new_user
            .role
            .ok_or_else(|| ServiceError::invalid("role is required"))?;
        if new_user.email.is_none() && new_user.phone.is_none() {
            return Err(ServiceError::invalid("email or phone is required"));
        }
        let id = Uuid::new_v4().to_string();
        let (salt, hash) = match new_user.password.as_deref() {
            Some(password) => {
                let salt = Uuid::new_v4().simple().to_string();
                let hash = hash_password(&salt, password);
                (Some(salt), Some(hash))
            }
            None => (None, None),
        };
        let inserted = self.conn.execute(
            "INSERT INTO auth_users(id, email, phone, password_salt, password_hash, role, academy_ref, display_name, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                id,
                new_user.email,
                new_user.phone,
                salt,
                hash,
                role.as_str(),
                new_user.academy_ref,
                new_user.display_name,
                crate::db::now_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if crate::error::is_unique_violation(&e) => {
                return Err(ServiceError::conflict(
                    "A user with this email address has already been registered",
                ));
            }
            Err(e) => return Err(ServiceError::Upstream(e.to_string())),
        }
        info!(user_id = %id, role = role.as_str(), "identity created");
        Ok(IdentityRecord {
            id,
            email: new_user.email.clone(),
            phone: new_user.phone.clone(),
            role,
            academy_ref: new_user.academy_ref.clone(),
            display_name: new_user.display_name.clone(),
        })
    }

    fn authenticate(&self, token: &str) -> ServiceResult<Caller> {
        let now = chrono::Utc::now().timestamp();
        let user_id: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM auth_sessions WHERE token_hash = ? AND expires_at > ?",
                (sha256_hex(token), now),
                |r| r.get(0),
            )
            .optional()?;
        let Some(user_id) = user_id else {
            return Err(ServiceError::Unauthorized(
                "Unauthorized: invalid user".to_string(),
            ));
        };
        let user = self
            .get_user(&user_id)?
            .ok_or_else(|| ServiceError::Unauthorized("Unauthorized: invalid user".to_string()))?;
        Ok(Caller {
            user_id: user.id,
            role: user.role,
            academy_ref: user.academy_ref,
            display_name: user.display_name,
        })
    }

    fn sign_in(&self, user_id: &str, password: &str) -> ServiceResult<Session> {
        let stored: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT password_salt, password_hash FROM auth_users WHERE id = ?",
                [user_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let verified = match stored {
            Some((Some(salt), Some(hash))) => hash_password(&salt, password) == hash,
            _ => false,
        };
        if !verified {
            debug!(user_id, "sign-in rejected");
            return Err(ServiceError::Unauthorized("Invalid credentials".to_string()));
        }
        let user = self
            .get_user(user_id)?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid credentials".to_string()))?;

        let token = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let expires_at = chrono::Utc::now() + ttl;
        self.conn.execute(
            "INSERT INTO auth_sessions(token_hash, user_id, expires_at) VALUES(?, ?, ?)",
            (sha256_hex(&token), user_id, expires_at.timestamp()),
        )?;
        Ok(Session {
            access_token: token,
            expires_at: expires_at.to_rfc3339(),
            user,
        })
    }

    fn find_by_email(&self, email: &str) -> ServiceResult<Option<IdentityRecord>> {
        Ok(self.load("email = ?", email)?.into_iter().next())
    }

    fn find_by_phone(&self, phone: &str) -> ServiceResult<Vec<IdentityRecord>> {
        self.load("phone = ?", phone)
    }

    fn get_user(&self, user_id: &str) -> ServiceResult<Option<IdentityRecord>> {
        Ok(self.load("id = ?", user_id)?.into_iter().next())
    }
}
