//! Call recording and fault injection for the in-memory backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use planvis_core::Visibility;
use planvis_storage::StorageError;

/// Store operations that are recorded and can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetBroker,
    ListCatalog,
    ListByPlan,
    Create,
    Delete,
    Commit,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetBroker => write!(f, "get_broker"),
            Self::ListCatalog => write!(f, "list_offerings_with_plans"),
            Self::ListByPlan => write!(f, "list_by_plan"),
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Arguments captured from every store call, across all transactions.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    /// Broker ids passed to `get_broker`.
    pub broker_reads: Vec<String>,
    /// Broker ids passed to `list_offerings_with_plans`.
    pub catalog_reads: Vec<String>,
    /// Plan ids passed to `list_by_plan`.
    pub lists: Vec<String>,
    /// Visibilities passed to `create`, including ones that were rejected.
    pub creates: Vec<Visibility>,
    /// Ids passed to `delete`, including ones that were not found.
    pub deletes: Vec<String>,
    /// Number of commit attempts.
    pub commits: usize,
}

impl CallLog {
    /// Number of recorded calls for `operation`.
    pub fn count(&self, operation: Operation) -> usize {
        match operation {
            Operation::GetBroker => self.broker_reads.len(),
            Operation::ListCatalog => self.catalog_reads.len(),
            Operation::ListByPlan => self.lists.len(),
            Operation::Create => self.creates.len(),
            Operation::Delete => self.deletes.len(),
            Operation::Commit => self.commits,
        }
    }

    /// Number of create and delete calls.
    pub fn write_count(&self) -> usize {
        self.creates.len() + self.deletes.len()
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    log: CallLog,
    /// Operation -> absolute call number that must fail.
    faults: HashMap<Operation, usize>,
}

#[derive(Debug, Default)]
pub(crate) struct Recorder {
    state: Mutex<RecorderState>,
}

impl Recorder {
    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one call and reports an injected failure if one is due.
    pub(crate) fn record(
        &self,
        operation: Operation,
        capture: impl FnOnce(&mut CallLog),
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        capture(&mut state.log);
        let call_number = state.log.count(operation);
        if state.faults.get(&operation) == Some(&call_number) {
            state.faults.remove(&operation);
            tracing::debug!(%operation, call_number, "Injecting storage failure");
            return Err(StorageError::unavailable(format!(
                "injected failure on {operation} call #{call_number}"
            )));
        }
        Ok(())
    }

    pub(crate) fn fail_nth(&self, operation: Operation, nth: usize) {
        let mut state = self.lock();
        let target = state.log.count(operation) + nth.max(1);
        state.faults.insert(operation, target);
    }

    pub(crate) fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub(crate) fn snapshot(&self) -> CallLog {
        self.lock().log.clone()
    }

    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        state.log = CallLog::default();
        state.faults.clear();
    }
}
