//! Thin wrapper over the external CRDT capability (§6), read back in the
//! spec's own vocabulary — state vector, diff, update — rather than `yrs`'s
//! transaction API directly.

use std::rc::Rc;

use yrs::{Doc, Origin, ReadTxn, StateVector, Transact, Update, UpdateSubscription};

use crate::error::ProviderError;

#[derive(Clone)]
pub struct Document {
    doc: Rc<Doc>,
}

impl Document {
    pub fn new(doc: Rc<Doc>) -> Self {
        Self { doc }
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn state_vector_v1(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// The minimal update that brings a peer holding `remote_sv` to at least
    /// the local state (§6).
    pub fn diff_v1(&self, remote_sv: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let sv = StateVector::decode_v1(remote_sv).map_err(|e| ProviderError::Document(e.to_string()))?;
        Ok(self.doc.transact().encode_diff_v1(&sv))
    }

    pub fn apply_v1(&self, update: &[u8], origin: Origin) -> Result<(), ProviderError> {
        let update =
            Update::decode_v1(update).map_err(|e| ProviderError::Document(e.to_string()))?;
        let mut txn = self.doc.transact_mut_with(origin);
        txn.apply_update(update)
            .map_err(|e| ProviderError::Document(e.to_string()))?;
        Ok(())
    }

    pub fn observe_update<F>(&self, f: F) -> Result<UpdateSubscription, ProviderError>
    where
        F: Fn(&yrs::TransactionMut, &yrs::UpdateEvent) + 'static,
    {
        self.doc
            .observe_update_v1(f)
            .map_err(|e| ProviderError::Document(e.to_string()))
    }
}

/// An encoded update is empty when it carries no client blocks and no
/// deletions — `yrs` encodes that case as two zero-length varint counts.
pub fn is_empty_update(bytes: &[u8]) -> bool {
    bytes == [0u8, 0u8]
}
