//! Write pipeline: `bulk_docs`
//!
//! All writes flow through one pipeline: parse every input, coalesce edits
//! to the same document, then process one document at a time — merge into
//! its revision tree, ingest attachments, allocate a sequence, persist body
//! then metadata then the sequence sentinel, and publish a change event.
//! Per-document failures are collected alongside successes; only a parse
//! error aborts the whole batch.

use crate::keys;
use crate::registry;
use crate::store::{AttachMetaRow, Database, WriterState};
use davenport_common::{from_base64, is_local_id, Error, Result, Rev, Seq};
use davenport_merge::{collect_leaves, is_deleted, merge, parse_doc, winning_rev, DocInfo, MergeOutcome};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::changes::{ChangeRev, ChangeRow};

/// Options for [`Database::bulk_docs`].
#[derive(Debug, Clone, Copy)]
pub struct BulkDocsOptions {
    /// When set (the default), each input is a fresh edit and conflicts are
    /// detected; when cleared, inputs carry replicated revision histories.
    pub new_edits: bool,
    /// Set by delete surfaces: deleting a document that was never created
    /// reports it missing instead of inserting a tombstone.
    pub was_delete: bool,
}

impl Default for BulkDocsOptions {
    fn default() -> Self {
        BulkDocsOptions {
            new_edits: true,
            was_delete: false,
        }
    }
}

/// Per-document outcome of a bulk write, in input order.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BulkDocsResult {
    Ok {
        ok: bool,
        id: String,
        rev: String,
    },
    Error {
        status: u16,
        error: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl BulkDocsResult {
    fn success(id: String, rev: String) -> Self {
        BulkDocsResult::Ok { ok: true, id, rev }
    }

    fn failure(id: Option<String>, err: &Error) -> Self {
        BulkDocsResult::Error {
            status: err.status(),
            error: err.name().to_string(),
            reason: err.to_string(),
            id,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BulkDocsResult::Ok { .. })
    }
}

impl Database {
    /// Write a batch of documents. Returns one result per input, in input
    /// order.
    pub fn bulk_docs(&self, docs: Vec<Value>, opts: BulkDocsOptions) -> Result<Vec<BulkDocsResult>> {
        self.check_open()?;
        let mut writer = self.inner.writer.lock();

        // Parse every input up front; the first parse error fails the batch.
        let mut parsed = Vec::with_capacity(docs.len());
        for (bulk_seq, raw) in docs.into_iter().enumerate() {
            parsed.push((bulk_seq, parse_doc(raw, opts.new_edits)?));
        }

        // Coalesce consecutive edits of the same document: under new_edits
        // only the first can win, the rest conflict without being queued.
        let mut results: Vec<Option<BulkDocsResult>> = parsed.iter().map(|_| None).collect();
        let mut stack: Vec<(usize, DocInfo)> = Vec::new();
        for (bulk_seq, info) in parsed {
            let repeats_last = stack
                .last()
                .is_some_and(|(_, prev)| prev.metadata.id == info.metadata.id);
            if repeats_last && opts.new_edits {
                results[bulk_seq] = Some(BulkDocsResult::failure(
                    Some(info.metadata.id.clone()),
                    &Error::RevConflict,
                ));
            } else {
                stack.push((bulk_seq, info));
            }
        }

        while let Some((bulk_seq, info)) = stack.pop() {
            let id = info.metadata.id.clone();
            // Failures, engine errors included, become that document's
            // result row; the rest of the batch proceeds.
            let row = match self.process_doc(&mut writer, info, &opts) {
                Ok(rev) => BulkDocsResult::success(id, rev.to_string()),
                Err(err) => BulkDocsResult::failure(Some(id), &err),
            };
            results[bulk_seq] = Some(row);
        }

        self.inner.keyspace.persist(self.inner.config.persist_mode)?;
        let results: Vec<BulkDocsResult> = results.into_iter().flatten().collect();
        tracing::debug!(
            db = %self.inner.name,
            docs = results.len(),
            update_seq = writer.update_seq,
            "bulk write complete"
        );
        Ok(results)
    }

    /// Insert or update one document, then publish its change event.
    fn process_doc(
        &self,
        writer: &mut WriterState,
        mut info: DocInfo,
        opts: &BulkDocsOptions,
    ) -> Result<Rev> {
        match self.read_metadata(&info.metadata.id)? {
            None => {
                // Deleting a document that never existed is meaningless.
                if opts.was_delete && info.metadata.deleted {
                    return Err(Error::missing("deleted"));
                }
                self.write_doc(writer, &mut info)?;
                if !is_local_id(&info.metadata.id) {
                    writer.doc_count += 1;
                    self.inner
                        .seq_store
                        .insert(keys::DOC_COUNT_KEY, serde_json::to_vec(&writer.doc_count)?)?;
                }
            }
            Some(old) => {
                let merged = merge(
                    &old.rev_tree,
                    &info.metadata.rev_tree[0],
                    self.inner.config.revs_limit,
                );
                let conflict = (info.metadata.deleted && old.deleted)
                    || (opts.new_edits && !old.deleted && merged.outcome != MergeOutcome::NewLeaf);
                if conflict {
                    return Err(Error::RevConflict);
                }
                info.metadata.rev_tree = merged.tree;
                info.metadata.rev_map = old.rev_map;
                self.write_doc(writer, &mut info)?;
            }
        }

        let winner = winning_rev(&info.metadata);
        if !is_local_id(&info.metadata.id) {
            self.publish_change(&info, &winner);
        }
        Ok(winner)
    }

    /// Persist one document: attachments first, then body, metadata, and
    /// the sequence sentinel, in that order.
    fn write_doc(&self, writer: &mut WriterState, info: &mut DocInfo) -> Result<Seq> {
        let metadata = &mut info.metadata;
        metadata.deleted = is_deleted(metadata, None);

        info.data
            .insert("_id".to_string(), Value::String(metadata.id.clone()));
        if metadata.deleted {
            info.data.insert("_deleted".to_string(), Value::Bool(true));
        } else {
            info.data.remove("_deleted");
        }

        if let Some(Value::Object(attachments)) = info.data.get_mut("_attachments") {
            for (name, entry) in attachments.iter_mut() {
                let att = entry.as_object_mut().ok_or_else(|| {
                    Error::bad_request(format!("Invalid attachment entry: {name}"))
                })?;
                if att.get("stub").and_then(Value::as_bool) == Some(true) {
                    // Already content-addressed; nothing to ingest.
                    continue;
                }
                let bytes = match att.get("data") {
                    Some(Value::String(data)) => from_base64(data)?,
                    _ => {
                        return Err(Error::bad_request(format!(
                            "Attachment {name} is missing base64 data"
                        )))
                    }
                };
                let digest = format!("md5-{:x}", md5::compute(&bytes[..]));
                let content_type = att.get("content_type").cloned();
                att.clear();
                if let Some(content_type) = content_type {
                    att.insert("content_type".to_string(), content_type);
                }
                att.insert("digest".to_string(), Value::String(digest.clone()));
                att.insert("length".to_string(), Value::from(bytes.len() as u64));
                att.insert("stub".to_string(), Value::Bool(true));

                self.save_attachment(&metadata.id, &metadata.rev, &digest, &bytes)?;
            }
        }

        writer.update_seq += 1;
        let seq = *metadata.seq.get_or_insert(writer.update_seq);
        metadata.rev_map.insert(metadata.rev.to_string(), seq);

        self.inner
            .seq_store
            .insert(keys::seq_key(seq), serde_json::to_vec(&info.data)?)?;
        self.inner
            .doc_store
            .insert(metadata.id.as_bytes(), serde_json::to_vec(metadata)?)?;
        self.inner.seq_store.insert(
            keys::UPDATE_SEQ_KEY,
            serde_json::to_vec(&writer.update_seq)?,
        )?;
        Ok(seq)
    }

    /// Record a reference to a content-addressed attachment and store its
    /// bytes. Empty payloads keep the reference row but never a blob row.
    fn save_attachment(&self, doc_id: &str, rev: &Rev, digest: &str, bytes: &[u8]) -> Result<()> {
        let reference = format!("{doc_id}@{rev}");
        let row = match self.inner.attach_store.get(digest.as_bytes())? {
            Some(existing) => {
                let mut row: AttachMetaRow = serde_json::from_slice(&existing)?;
                if let Some(refs) = row.refs.as_mut() {
                    refs.insert(reference, true);
                }
                // A legacy row without refs is left untouched; migration is
                // a deliberate separate operation.
                row
            }
            None => AttachMetaRow {
                refs: Some(BTreeMap::from([(reference, true)])),
            },
        };
        self.inner
            .attach_store
            .insert(digest.as_bytes(), serde_json::to_vec(&row)?)?;
        if !bytes.is_empty() {
            self.inner
                .attach_binary_store
                .insert(digest.as_bytes(), bytes)?;
        }
        Ok(())
    }

    fn publish_change(&self, info: &DocInfo, winner: &Rev) {
        let Some(seq) = info.metadata.seq else {
            return;
        };
        let mut doc = info.data.clone();
        doc.insert("_rev".to_string(), Value::String(winner.to_string()));
        let row = ChangeRow {
            id: info.metadata.id.clone(),
            seq,
            changes: collect_leaves(&info.metadata.rev_tree)
                .into_iter()
                .map(|leaf| ChangeRev {
                    rev: leaf.rev.to_string(),
                })
                .collect(),
            doc: Some(Value::Object(doc)),
            deleted: info.metadata.deleted,
        };
        registry::publish(&self.inner.name, &row);
    }
}
