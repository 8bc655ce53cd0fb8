//! sled persistence for transaction records and their audit entries
use std::sync::Arc;

use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::debug;

use super::audit::{AuditLog, AuditLogEntry};
use super::context::{TransactionContext, TransactionRecord};
use super::error::WorkflowError;

pub const TRANSACTION_TREE: &str = "transactions";

pub struct Store {
    instance: Arc<sled::Db>,
    transactions: sled::Tree,
    audit: AuditLog,
}

impl Store {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self, WorkflowError> {
        let transactions = instance.open_tree(TRANSACTION_TREE)?;
        let audit = AuditLog::open(&instance)?;
        Ok(Self {
            instance,
            transactions,
            audit,
        })
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn flush(&self) -> Result<(), WorkflowError> {
        self.instance.flush()?;
        Ok(())
    }

    pub fn load_record(&self, id: &str) -> Result<TransactionRecord, WorkflowError> {
        let bytes = self
            .transactions
            .get(id.as_bytes())?
            .ok_or_else(|| WorkflowError::not_found("transaction", id))?;
        Ok(minicbor::decode(&bytes)?)
    }

    /// Load a record together with its audit trail
    pub fn load(&self, id: &str) -> Result<TransactionContext, WorkflowError> {
        let record = self.load_record(id)?;
        let trail = self.audit.trail(id)?;
        Ok(TransactionContext { record, trail })
    }

    pub fn ids(&self) -> Result<Vec<String>, WorkflowError> {
        self.transactions
            .iter()
            .keys()
            .map(|key| -> Result<String, WorkflowError> {
                Ok(String::from_utf8_lossy(&key?).into_owned())
            })
            .collect()
    }

    /// Writes the record and appends its new audit entries as one unit.
    ///
    /// `record.version` must already be bumped: the commit aborts with
    /// `Conflict` unless the stored version is exactly one behind it (absent
    /// counts as 0), or if any entry's sequence key is already taken.
    pub fn commit(&self, record: &TransactionRecord, entries: &[AuditLogEntry]) -> Result<(), WorkflowError> {
        let expected = record.version.saturating_sub(1);
        let record_bytes = minicbor::to_vec(record)?;
        let encoded = entries
            .iter()
            .map(|e| -> Result<(String, Vec<u8>), WorkflowError> { Ok((e.key(), minicbor::to_vec(e)?)) })
            .collect::<Result<Vec<_>, _>>()?;

        let abort = |e: WorkflowError| ConflictableTransactionError::Abort(e);

        let result = (&self.transactions, self.audit.tree()).transaction(|(records, audit)| {
            let found = match records.get(record.id.as_bytes())? {
                Some(bytes) => {
                    let stored: TransactionRecord =
                        minicbor::decode(&bytes).map_err(|e| abort(WorkflowError::from(e)))?;
                    stored.version
                }
                None => 0,
            };
            if found != expected {
                return Err(abort(WorkflowError::Conflict {
                    id: record.id.clone(),
                    expected,
                    found,
                }));
            }

            for (key, bytes) in &encoded {
                if audit.get(key.as_bytes())?.is_some() {
                    return Err(abort(WorkflowError::Conflict {
                        id: key.clone(),
                        expected,
                        found,
                    }));
                }
                audit.insert(key.as_bytes(), bytes.as_slice())?;
            }
            records.insert(record.id.as_bytes(), record_bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => {
                debug!(id = %record.id, version = record.version, entries = entries.len(), "committed");
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }
}
