//! The two-phase sync handshake (§4.3), kept separate from transport
//! plumbing so it can be exercised against two documents without a real
//! connection.

use yrs::Origin;

use crate::document::{is_empty_update, Document};
use crate::error::ProviderError;
use collab_wire::{tag_message, MessageTag};

/// `[0x00, stateVector(doc)]`.
pub fn encode_sync_step1(doc: &Document) -> Vec<u8> {
    tag_message(MessageTag::SyncStep1, &doc.state_vector_v1())
}

/// Reply to a peer's sync-step-1: the diff frame to send, if the diff is
/// non-empty.
pub fn handle_sync_step1(doc: &Document, remote_sv: &[u8]) -> Result<Option<Vec<u8>>, ProviderError> {
    let diff = doc.diff_v1(remote_sv)?;
    if is_empty_update(&diff) {
        Ok(None)
    } else {
        Ok(Some(tag_message(MessageTag::SyncStep2, &diff)))
    }
}

/// `[0x01, update]` / `[0x02, update]` share the same apply path; only the
/// synced-flag transition differs, which the caller handles.
pub fn apply_remote_update(doc: &Document, update: &[u8], origin: Origin) -> Result<(), ProviderError> {
    doc.apply_v1(update, origin)
}

/// `[0x02, update]` for a local change.
pub fn encode_update(update: &[u8]) -> Vec<u8> {
    tag_message(MessageTag::Update, update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use yrs::{Map, Transact};

    fn origin() -> Origin {
        Origin::from(1u64)
    }

    #[test]
    fn empty_documents_produce_no_diff() {
        let a = Document::new(Rc::new(yrs::Doc::new()));
        let b = Document::new(Rc::new(yrs::Doc::new()));
        assert!(handle_sync_step1(&a, &b.state_vector_v1()).unwrap().is_none());
    }

    #[test]
    fn divergent_documents_converge_after_one_round() {
        let a = Document::new(Rc::new(yrs::Doc::new()));
        let b = Document::new(Rc::new(yrs::Doc::new()));

        {
            let map = a.doc().get_or_insert_map("root");
            let mut txn = a.doc().transact_mut();
            map.insert(&mut txn, "k", "v");
        }

        let sv_b = b.state_vector_v1();
        let reply = handle_sync_step1(&a, &sv_b).unwrap().expect("non-empty diff");
        let (tag, body) = collab_wire::untag_message(&reply).unwrap();
        assert_eq!(tag, MessageTag::SyncStep2.to_byte());
        apply_remote_update(&b, body, origin()).unwrap();

        assert_eq!(a.state_vector_v1(), b.state_vector_v1());
    }
}
