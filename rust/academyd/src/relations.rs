//! Parent records and their associations with academies and students.
//!
//! # Invariants
//! - A (parent, academy) association exists at most once; ensuring it twice is a no-op.
//! - A student has at most one parent (`UNIQUE(student_id)` on `parent_student_map`).
//! - A parent is linked to at most one student; checked before insert.
//! - A student-creation request names at most one parent.

use crate::db::now_rfc3339;
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{IdentityProvider, NewIdentity, Role};
use crate::validate::{phone_digits, present};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_RELATIONSHIP: &str = "Guardian";

/// A parent described inline on a student-creation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParentInput {
    #[serde(default)]
    pub auth_user_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
}

/// Contact snapshot copied onto the parent row.
#[derive(Debug, Clone, Default)]
pub struct ParentContact {
    pub auth_user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub fn check_parent_count(existing_parent: bool, new_parents: usize) -> ServiceResult<()> {
    if usize::from(existing_parent) + new_parents > 1 {
        return Err(ServiceError::invalid("One student can have only one parent"));
    }
    Ok(())
}

/// Returns the identity behind `input`, creating a parent identity when none
/// is referenced. Runs before any relational write: the provider is external
/// and cannot join the store's transaction.
pub fn resolve_parent_identity(
    identity: &dyn IdentityProvider,
    academy_external_id: &str,
    input: &ParentInput,
) -> ServiceResult<ParentContact> {
    if let Some(auth_user_id) = present(&input.auth_user_id) {
        let existing = identity.get_user(auth_user_id)?;
        let Some(user) = existing else {
            return Err(ServiceError::not_found("Parent user not found"));
        };
        return Ok(ParentContact {
            auth_user_id: user.id,
            display_name: user.display_name.or_else(|| input.display_name.clone()),
            email: user.email,
            phone: user.phone,
        });
    }

    let email = present(&input.email).map(str::to_string);
    let phone = present(&input.phone).map(str::to_string);
    if email.is_none() && phone.is_none() {
        return Err(ServiceError::invalid("New parent requires an email or phone"));
    }
    let created = identity
        .create_user(&NewIdentity {
            email: email.clone(),
            phone: phone.clone(),
            password: None,
            role: Some(Role::Parent),
            academy_ref: Some(academy_external_id.to_string()),
            display_name: input.display_name.clone(),
        })
        .map_err(|e| match e {
            ServiceError::Conflict(m) => ServiceError::Conflict(m),
            other => ServiceError::Upstream(other.to_string()),
        })?;
    Ok(ParentContact {
        auth_user_id: created.id,
        display_name: created.display_name,
        email,
        phone,
    })
}

/// Inserts the (parent, academy) association unless it already exists.
pub fn ensure_parent_academy(conn: &Connection, parent_id: &str, academy_id: &str) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO parent_academy_map(parent_id, academy_id, created_at)
         VALUES(?, ?, ?)
         ON CONFLICT(parent_id, academy_id) DO NOTHING",
        (parent_id, academy_id, now_rfc3339()),
    )?;
    Ok(())
}

pub fn parent_exists(conn: &Connection, parent_id: &str) -> ServiceResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM parents WHERE id = ?", [parent_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn update_parent_address(conn: &Connection, parent_id: &str, address: &str) -> ServiceResult<()> {
    conn.execute(
        "UPDATE parents SET address = ? WHERE id = ?",
        (address, parent_id),
    )?;
    Ok(())
}

/// Reuses the parent row for `contact.auth_user_id` or creates it, and makes
/// sure it is associated with `academy_id`. Returns the parent's internal id.
pub fn attach_parent(
    conn: &Connection,
    academy_id: &str,
    contact: &ParentContact,
    address: Option<&str>,
) -> ServiceResult<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM parents WHERE auth_user_id = ?",
            [&contact.auth_user_id],
            |r| r.get(0),
        )
        .optional()?;

    if let Some(parent_id) = existing {
        if let Some(address) = address {
            update_parent_address(conn, &parent_id, address)?;
        }
        ensure_parent_academy(conn, &parent_id, academy_id)?;
        return Ok(parent_id);
    }

    let parent_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO parents(id, auth_user_id, display_name, email, phone, phone_digits, address, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            parent_id,
            contact.auth_user_id,
            contact.display_name,
            contact.email,
            contact.phone,
            contact.phone.as_deref().map(phone_digits),
            address,
            now_rfc3339(),
        ],
    )?;
    conn.execute(
        "INSERT INTO parent_academy_map(parent_id, academy_id, created_at) VALUES(?, ?, ?)",
        (&parent_id, academy_id, now_rfc3339()),
    )?;
    info!(parent_id = %parent_id, academy_id, "parent created");
    Ok(parent_id)
}

/// Links a parent to a student. `student_id` is the internal student id.
pub fn link_student(
    conn: &Connection,
    parent_id: &str,
    student_id: &str,
    relationship: Option<&str>,
) -> ServiceResult<()> {
    let already_linked: Option<String> = conn
        .query_row(
            "SELECT student_id FROM parent_student_map WHERE parent_id = ? LIMIT 1",
            [parent_id],
            |r| r.get(0),
        )
        .optional()?;
    if already_linked.is_some() {
        return Err(ServiceError::conflict("Parent is already linked to a student"));
    }

    let inserted = conn.execute(
        "INSERT INTO parent_student_map(id, parent_id, student_id, relationship, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            parent_id,
            student_id,
            relationship.unwrap_or(DEFAULT_RELATIONSHIP),
            now_rfc3339(),
        ),
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(e) if crate::error::is_unique_violation(&e) => {
            Err(ServiceError::conflict("Student already has a parent"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Parent mapped to a student (internal ids), if any.
pub fn parent_of_student(conn: &Connection, student_id: &str) -> ServiceResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT parent_id FROM parent_student_map WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?)
}
