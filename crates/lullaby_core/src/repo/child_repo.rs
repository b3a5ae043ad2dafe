//! Child directory contracts and SQLite implementation.
//!
//! # Responsibility
//! - Resolve child ids, enumerate children and own parent reference lists.
//!
//! # Invariants
//! - Creating a child with an owning parent also records the parent-side
//!   reference in the same transaction.
//! - Deleting a child row does not touch the parent reference list; callers
//!   clear it explicitly.

use crate::model::child::{Child, ChildId, Parent, ParentId};
use crate::repo::event_repo::{ensure_schema_ready, parse_uuid, RepoResult};
use rusqlite::{params, Connection, Row};

/// Directory of parents and children.
pub trait ChildDirectory {
    fn exists(&self, child_id: ChildId) -> RepoResult<bool>;
    /// All child ids, sorted.
    fn list_all(&self) -> RepoResult<Vec<ChildId>>;
    fn get_child(&self, child_id: ChildId) -> RepoResult<Option<Child>>;
    fn create_parent(&self, parent: &Parent) -> RepoResult<ParentId>;
    fn create_child(&self, child: &Child) -> RepoResult<ChildId>;
    /// Deletes the child row (and with it the embedded list). Returns whether
    /// a row was removed.
    fn delete_child(&self, child_id: ChildId) -> RepoResult<bool>;
    /// Removes `child_id` from the parent's reference list.
    fn remove_child_reference(&self, parent_id: ParentId, child_id: ChildId) -> RepoResult<bool>;
    fn list_child_references(&self, parent_id: ParentId) -> RepoResult<Vec<ChildId>>;
    /// Parents whose reference list still names `child_id`.
    fn list_referencing_parents(&self, child_id: ChildId) -> RepoResult<Vec<ParentId>>;
}

/// SQLite-backed child directory.
#[derive(Clone, Copy)]
pub struct SqliteChildDirectory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteChildDirectory<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ChildDirectory for SqliteChildDirectory<'_> {
    fn exists(&self, child_id: ChildId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM children WHERE id = ?1);",
            [child_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn list_all(&self) -> RepoResult<Vec<ChildId>> {
        let mut stmt = self.conn.prepare("SELECT id FROM children ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_uuid(&text, "children.id")?);
        }
        Ok(ids)
    }

    fn get_child(&self, child_id: ChildId) -> RepoResult<Option<Child>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, name, birth_date, created_at
             FROM children
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([child_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_child_row(row)?)),
            None => Ok(None),
        }
    }

    fn create_parent(&self, parent: &Parent) -> RepoResult<ParentId> {
        self.conn.execute(
            "INSERT INTO parents (id, display_name) VALUES (?1, ?2);",
            params![parent.id.to_string(), parent.display_name.as_str()],
        )?;
        Ok(parent.id)
    }

    fn create_child(&self, child: &Child) -> RepoResult<ChildId> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO children (id, parent_id, name, birth_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                child.id.to_string(),
                child.parent_id.map(|id| id.to_string()),
                child.name.as_str(),
                child.birth_date,
                child.created_at,
            ],
        )?;
        if let Some(parent_id) = child.parent_id {
            tx.execute(
                "INSERT OR IGNORE INTO parent_children (parent_id, child_id) VALUES (?1, ?2);",
                params![parent_id.to_string(), child.id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(child.id)
    }

    fn delete_child(&self, child_id: ChildId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM children WHERE id = ?1;", [child_id.to_string()])?;
        Ok(changed > 0)
    }

    fn remove_child_reference(&self, parent_id: ParentId, child_id: ChildId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM parent_children WHERE parent_id = ?1 AND child_id = ?2;",
            params![parent_id.to_string(), child_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn list_child_references(&self, parent_id: ParentId) -> RepoResult<Vec<ChildId>> {
        let mut stmt = self.conn.prepare(
            "SELECT child_id FROM parent_children WHERE parent_id = ?1 ORDER BY child_id ASC;",
        )?;
        let mut rows = stmt.query([parent_id.to_string()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_uuid(&text, "parent_children.child_id")?);
        }
        Ok(ids)
    }

    fn list_referencing_parents(&self, child_id: ChildId) -> RepoResult<Vec<ParentId>> {
        let mut stmt = self.conn.prepare(
            "SELECT parent_id FROM parent_children WHERE child_id = ?1 ORDER BY parent_id ASC;",
        )?;
        let mut rows = stmt.query([child_id.to_string()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_uuid(&text, "parent_children.parent_id")?);
        }
        Ok(ids)
    }
}

fn parse_child_row(row: &Row<'_>) -> RepoResult<Child> {
    let id_text: String = row.get("id")?;
    let parent_id = match row.get::<_, Option<String>>("parent_id")? {
        Some(text) => Some(parse_uuid(&text, "children.parent_id")?),
        None => None,
    };
    Ok(Child {
        id: parse_uuid(&id_text, "children.id")?,
        parent_id,
        name: row.get("name")?,
        birth_date: row.get("birth_date")?,
        created_at: row.get("created_at")?,
    })
}
