//! Key encoding and namespace names
//!
//! Sequence-store data keys are big-endian `u64`, so lexicographic key order
//! equals numeric order. The two counter sentinels are ASCII strings; their
//! length differs from 8, so scans identify and skip them by length alone.

use davenport_common::Seq;

/// Partition per namespace, under the database directory.
pub(crate) const DOC_STORE: &str = "document-store";
pub(crate) const BY_SEQUENCE: &str = "by-sequence";
pub(crate) const ATTACH_STORE: &str = "attach-store";
pub(crate) const ATTACH_BINARY_STORE: &str = "attach-binary-store";

/// Highest sequence ever assigned, persisted in the sequence store.
pub(crate) const UPDATE_SEQ_KEY: &[u8] = b"_local_last_update_seq";
/// Count of non-local documents ever inserted, persisted in the sequence
/// store.
pub(crate) const DOC_COUNT_KEY: &[u8] = b"_local_doc_count";

pub(crate) fn seq_key(seq: Seq) -> [u8; 8] {
    seq.to_be_bytes()
}

/// Decode a sequence-store data key; sentinels decode to `None`.
pub(crate) fn decode_seq_key(key: &[u8]) -> Option<Seq> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(Seq::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_keys_order_lexicographically() {
        assert!(seq_key(1) < seq_key(2));
        assert!(seq_key(255) < seq_key(256));
        assert!(seq_key(u64::MAX - 1) < seq_key(u64::MAX));
    }

    #[test]
    fn sentinels_are_not_data_keys() {
        assert_eq!(decode_seq_key(UPDATE_SEQ_KEY), None);
        assert_eq!(decode_seq_key(DOC_COUNT_KEY), None);
        assert_eq!(decode_seq_key(&seq_key(42)), Some(42));
    }
}
