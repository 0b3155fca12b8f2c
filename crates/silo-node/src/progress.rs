//! Operation tracking
//!
//! Every long-running coordinator call registers here: the record lands
//! in the sessions table (so progress survives a restart) and the
//! cancel token stays in memory for `cancel(operation_id)`.

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use silo_core::types::{FolderId, OperationKind, OperationRecord, OperationState, ShareId};
use silo_core::CancelToken;
use silo_store::Store;

/// Registry of running and finished operations
pub struct OperationRegistry {
    store: Store,
    active: DashMap<Uuid, CancelToken>,
}

impl OperationRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            active: DashMap::new(),
        }
    }

    /// Register a fresh operation and hand back its ID and token
    pub fn start(
        &self,
        kind: OperationKind,
        folder_id: Option<FolderId>,
        share_id: Option<ShareId>,
    ) -> silo_store::Result<(Uuid, CancelToken)> {
        let operation_id = Uuid::new_v4();
        let token = CancelToken::new();

        self.store.put_operation(&OperationRecord {
            operation_id,
            kind,
            folder_id,
            share_id,
            state: OperationState::Running,
            progress_pct: 0,
            detail: "starting".to_string(),
            started_at: Utc::now(),
            finished_at: None,
        })?;

        self.active.insert(operation_id, token.clone());
        tracing::debug!(%operation_id, ?kind, "operation started");
        Ok((operation_id, token))
    }

    /// Update progress on a running operation
    pub fn update(
        &self,
        operation_id: &Uuid,
        progress_pct: u8,
        detail: &str,
    ) -> silo_store::Result<()> {
        let mut record = self.store.get_operation(operation_id)?;
        record.progress_pct = progress_pct.min(100);
        record.detail = detail.to_string();
        self.store.put_operation(&record)
    }

    /// Finish an operation; drops the cancel token
    pub fn finish(
        &self,
        operation_id: &Uuid,
        state: OperationState,
        detail: &str,
    ) -> silo_store::Result<()> {
        let mut record = self.store.get_operation(operation_id)?;
        record.state = state;
        record.detail = detail.to_string();
        record.finished_at = Some(Utc::now());
        if state == OperationState::Completed {
            record.progress_pct = 100;
        }
        self.store.put_operation(&record)?;
        self.active.remove(operation_id);
        tracing::debug!(%operation_id, ?state, "operation finished");
        Ok(())
    }

    /// Signal a running operation's cancel token. Returns false for
    /// unknown or already-finished operations.
    pub fn cancel(&self, operation_id: &Uuid) -> bool {
        match self.active.get(operation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Current record, running or finished
    pub fn get(&self, operation_id: &Uuid) -> silo_store::Result<OperationRecord> {
        self.store.get_operation(operation_id)
    }
}
