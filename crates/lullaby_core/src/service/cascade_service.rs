//! Cascade delete of a child and everything that references it.
//!
//! # Invariants
//! - Order is fixed: indexed events, plans, consultations, child row, then
//!   the parent's reference list. Embedded events go with the child row.
//! - An unknown child that no parent references fails before any delete is
//!   issued.
//! - A failure mid-way leaves the earlier steps applied; re-running the
//!   delete finishes the remaining ones, including a parent reference left
//!   behind after the child row is gone.

use crate::model::child::ChildId;
use crate::repo::child_repo::ChildDirectory;
use crate::repo::document_repo::ChildDocumentStore;
use crate::repo::event_repo::EventRecordStore;
use crate::service::consistency_service::IntegrityError;
use log::{info, warn};
use serde::Serialize;

/// Row counts removed per dependent collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CascadeDeletions {
    pub events: usize,
    pub plans: usize,
    pub consultations: usize,
    pub child: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CascadeOutcome {
    pub child_id: ChildId,
    pub deleted: bool,
    /// The child row was already gone; only leftover steps ran.
    pub resumed: bool,
    pub deletions: CascadeDeletions,
    pub parent_reference_cleared: bool,
}

pub struct CascadeDelete<S, D, P>
where
    S: EventRecordStore,
    D: ChildDirectory,
    P: ChildDocumentStore,
{
    store: S,
    directory: D,
    documents: P,
}

impl<S, D, P> CascadeDelete<S, D, P>
where
    S: EventRecordStore,
    D: ChildDirectory,
    P: ChildDocumentStore,
{
    pub fn new(store: S, directory: D, documents: P) -> Self {
        Self {
            store,
            directory,
            documents,
        }
    }

    pub fn delete_child(&self, child_id: ChildId) -> Result<CascadeOutcome, IntegrityError> {
        let resumed = match self.directory.get_child(child_id)? {
            Some(_) => false,
            None => {
                if self.directory.list_referencing_parents(child_id)?.is_empty() {
                    return Err(IntegrityError::ChildNotFound(child_id));
                }
                true
            }
        };
        info!(
            "event=cascade_delete module=cascade status=start child_id={} resumed={}",
            child_id, resumed
        );

        let mut deletions = CascadeDeletions::default();
        let result = self.run_steps(child_id, &mut deletions);
        if let Err(err) = result {
            warn!(
                "event=cascade_delete module=cascade status=error child_id={} events={} plans={} consultations={} error={}",
                child_id, deletions.events, deletions.plans, deletions.consultations, err
            );
            return Err(err);
        }

        let parent_reference_cleared = self.clear_parent_references(child_id)?;

        info!(
            "event=cascade_delete module=cascade status=ok child_id={} events={} plans={} consultations={} child={} parent_ref={} resumed={}",
            child_id,
            deletions.events,
            deletions.plans,
            deletions.consultations,
            deletions.child,
            parent_reference_cleared,
            resumed
        );
        Ok(CascadeOutcome {
            child_id,
            deleted: deletions.child > 0,
            resumed,
            deletions,
            parent_reference_cleared,
        })
    }

    fn clear_parent_references(&self, child_id: ChildId) -> Result<bool, IntegrityError> {
        let mut cleared = false;
        for parent_id in self.directory.list_referencing_parents(child_id)? {
            cleared |= self.directory.remove_child_reference(parent_id, child_id)?;
        }
        Ok(cleared)
    }

    fn run_steps(
        &self,
        child_id: ChildId,
        deletions: &mut CascadeDeletions,
    ) -> Result<(), IntegrityError> {
        deletions.events = self.store.delete_by_child(child_id)?;
        deletions.plans = self.documents.delete_plans_by_child(child_id)?;
        deletions.consultations = self.documents.delete_consultations_by_child(child_id)?;
        deletions.child = usize::from(self.directory.delete_child(child_id)?);
        Ok(())
    }
}
