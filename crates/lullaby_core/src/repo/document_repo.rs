//! Plan and consultation-report documents that reference a child.
//!
//! Their content belongs to other features; this store only creates, counts
//! and deletes them so cascade delete can keep references intact.

use crate::model::child::ChildId;
use crate::repo::event_repo::{ensure_schema_ready, RepoResult};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Stable identifier of a plan or consultation document.
pub type DocumentId = Uuid;

pub trait ChildDocumentStore {
    fn create_plan(&self, child_id: ChildId, title: &str) -> RepoResult<DocumentId>;
    fn create_consultation(&self, child_id: ChildId, summary: &str) -> RepoResult<DocumentId>;
    fn count_plans(&self, child_id: ChildId) -> RepoResult<usize>;
    fn count_consultations(&self, child_id: ChildId) -> RepoResult<usize>;
    fn delete_plans_by_child(&self, child_id: ChildId) -> RepoResult<usize>;
    fn delete_consultations_by_child(&self, child_id: ChildId) -> RepoResult<usize>;
}

#[derive(Clone, Copy)]
pub struct SqliteChildDocumentStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteChildDocumentStore<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    fn count(&self, table: DocumentTable, child_id: ChildId) -> RepoResult<usize> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE child_id = ?1;",
                table.name()
            ),
            [child_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn delete(&self, table: DocumentTable, child_id: ChildId) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            &format!("DELETE FROM {} WHERE child_id = ?1;", table.name()),
            [child_id.to_string()],
        )?;
        Ok(deleted)
    }
}

#[derive(Clone, Copy)]
enum DocumentTable {
    Plans,
    ConsultationReports,
}

impl DocumentTable {
    fn name(self) -> &'static str {
        match self {
            Self::Plans => "plans",
            Self::ConsultationReports => "consultation_reports",
        }
    }
}

impl ChildDocumentStore for SqliteChildDocumentStore<'_> {
    fn create_plan(&self, child_id: ChildId, title: &str) -> RepoResult<DocumentId> {
        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO plans (id, child_id, title) VALUES (?1, ?2, ?3);",
            params![id.to_string(), child_id.to_string(), title],
        )?;
        Ok(id)
    }

    fn create_consultation(&self, child_id: ChildId, summary: &str) -> RepoResult<DocumentId> {
        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO consultation_reports (id, child_id, summary) VALUES (?1, ?2, ?3);",
            params![id.to_string(), child_id.to_string(), summary],
        )?;
        Ok(id)
    }

    fn count_plans(&self, child_id: ChildId) -> RepoResult<usize> {
        self.count(DocumentTable::Plans, child_id)
    }

    fn count_consultations(&self, child_id: ChildId) -> RepoResult<usize> {
        self.count(DocumentTable::ConsultationReports, child_id)
    }

    fn delete_plans_by_child(&self, child_id: ChildId) -> RepoResult<usize> {
        self.delete(DocumentTable::Plans, child_id)
    }

    fn delete_consultations_by_child(&self, child_id: ChildId) -> RepoResult<usize> {
        self.delete(DocumentTable::ConsultationReports, child_id)
    }
}
