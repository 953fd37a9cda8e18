//! Change feed
//!
//! One-shot feeds scan the sequence store joined against document metadata;
//! continuous feeds drain the same scan and then subscribe to the
//! process-wide emitter for the database name. A sequence is emitted only
//! when it holds its document's winning revision, which also makes the feed
//! tolerant of a body that landed before its metadata.
//!
//! Filter policy: no untrusted code is ever evaluated. A filter is a Rust
//! predicate, an id list, or a named design-document filter that must be a
//! declarative selector object (field path -> required value); anything
//! else — a JavaScript source string in particular — is rejected.

use crate::keys;
use crate::read::GetOptions;
use crate::registry;
use crate::store::Database;
use davenport_common::{is_local_id, Error, Result, Seq};
use davenport_merge::{collect_conflicts, collect_leaves, winning_rev};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Caller-supplied change filter.
#[derive(Clone)]
pub enum FilterSpec {
    /// Arbitrary predicate over the candidate change.
    Predicate(Arc<dyn Fn(&ChangeRow) -> bool + Send + Sync>),
    /// Declarative selector: every field path must equal its value.
    Selector(Map<String, Value>),
    /// `"ddoc/name"`: resolved through `_design/<ddoc>` to a selector
    /// before scanning.
    Design(String),
}

impl fmt::Debug for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::Predicate(_) => f.write_str("Predicate(..)"),
            FilterSpec::Selector(sel) => f.debug_tuple("Selector").field(sel).finish(),
            FilterSpec::Design(name) => f.debug_tuple("Design").field(name).finish(),
        }
    }
}

/// Options for [`Database::changes`] and [`Database::changes_continuous`].
#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
    /// Emit only sequences greater than this.
    pub since: Seq,
    /// Cap on scanned data entries.
    pub limit: Option<usize>,
    pub descending: bool,
    pub include_docs: bool,
    pub conflicts: bool,
    pub doc_ids: Option<HashSet<String>>,
    pub filter: Option<FilterSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// One change feed entry; also the payload published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRow {
    pub id: String,
    pub seq: Seq,
    /// Current leaves of the document's revision tree.
    pub changes: Vec<ChangeRev>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    pub last_seq: Seq,
}

/// A live subscription to a database's changes. Dropping or cancelling the
/// handle detaches it; the emitter prunes closed subscribers on publish.
pub struct ChangesHandle {
    rx: UnboundedReceiver<ChangeRow>,
    filter: CompiledFilter,
    cancelled: bool,
    db_name: String,
}

impl ChangesHandle {
    /// Next matching change; `None` once cancelled.
    pub async fn next(&mut self) -> Option<ChangeRow> {
        while !self.cancelled {
            let row = self.rx.recv().await?;
            if let Some(row) = self.filter.apply(row) {
                return Some(row);
            }
        }
        None
    }

    /// Non-blocking variant of [`Self::next`].
    pub fn try_next(&mut self) -> Option<ChangeRow> {
        while !self.cancelled {
            match self.rx.try_recv() {
                Ok(row) => {
                    if let Some(row) = self.filter.apply(row) {
                        return Some(row);
                    }
                }
                Err(_) => return None,
            }
        }
        None
    }

    /// Stop delivery. Events published after this point are dropped.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.rx.close();
        tracing::debug!(db = %self.db_name, "change subscription cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

pub(crate) struct CompiledFilter {
    doc_ids: Option<HashSet<String>>,
    predicate: Option<Arc<dyn Fn(&ChangeRow) -> bool + Send + Sync>>,
    selector: Option<Map<String, Value>>,
    include_docs: bool,
}

impl CompiledFilter {
    /// Apply the filter to a candidate row, stripping the body unless the
    /// subscriber asked for it.
    fn apply(&self, mut row: ChangeRow) -> Option<ChangeRow> {
        if let Some(ids) = &self.doc_ids {
            if !ids.contains(&row.id) {
                return None;
            }
        }
        if let Some(selector) = &self.selector {
            let doc = row.doc.as_ref()?;
            if !selector_matches(selector, doc) {
                return None;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(&row) {
                return None;
            }
        }
        if !self.include_docs {
            row.doc = None;
        }
        Some(row)
    }
}

impl Database {
    /// One-shot change feed.
    pub fn changes(&self, opts: &ChangesOptions) -> Result<ChangesResponse> {
        self.check_open()?;
        let filter = self.compile_filter(opts)?;
        let mut last_seq = opts.since;
        let mut results = Vec::new();
        for row in self.scan_changes(opts)? {
            last_seq = last_seq.max(row.seq);
            if let Some(row) = filter.apply(row) {
                results.push(row);
            }
        }
        Ok(ChangesResponse { results, last_seq })
    }

    /// Continuous change feed: the one-shot backlog followed by live events
    /// until the handle is cancelled.
    pub fn changes_continuous(&self, opts: &ChangesOptions) -> Result<ChangesHandle> {
        self.check_open()?;
        let filter = self.compile_filter(opts)?;
        let backlog = self.scan_changes(opts)?;

        let (tx, rx) = mpsc::unbounded_channel();
        for row in backlog {
            // Receiver is in hand; sending cannot fail.
            let _ = tx.send(row);
        }
        registry::attach_subscriber(&self.inner.name, tx);
        tracing::debug!(db = %self.inner.name, since = opts.since, "change subscription attached");
        Ok(ChangesHandle {
            rx,
            filter,
            cancelled: false,
            db_name: self.inner.name.clone(),
        })
    }

    /// Scan the sequence store, joining each body against its document
    /// metadata. Emits a sequence only when it holds the winning revision.
    fn scan_changes(&self, opts: &ChangesOptions) -> Result<Vec<ChangeRow>> {
        let iter: crate::StoreIter = if opts.descending {
            Box::new(self.inner.seq_store.iter().rev())
        } else {
            let start = Bound::Included(keys::seq_key(opts.since + 1).to_vec());
            Box::new(
                self.inner
                    .seq_store
                    .range((start, Bound::<Vec<u8>>::Unbounded)),
            )
        };

        let mut rows = Vec::new();
        let mut scanned = 0usize;
        for item in iter {
            let (key, value) = item?;
            let Some(seq) = keys::decode_seq_key(&key) else {
                // Counter sentinel.
                continue;
            };
            if opts.limit.is_some_and(|limit| scanned >= limit) {
                break;
            }
            scanned += 1;

            let mut body: Map<String, Value> = serde_json::from_slice(&value)?;
            let Some(id) = body.get("_id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if is_local_id(&id) {
                continue;
            }
            let Some(metadata) = self.read_metadata(&id)? else {
                continue;
            };
            let winner = winning_rev(&metadata);
            if metadata.rev_map.get(&winner.to_string()) != Some(&seq) {
                // This sequence holds a non-winning revision.
                continue;
            }

            body.insert("_rev".to_string(), Value::String(winner.to_string()));
            if opts.conflicts {
                let conflicts = collect_conflicts(&metadata);
                if !conflicts.is_empty() {
                    body.insert(
                        "_conflicts".to_string(),
                        Value::Array(
                            conflicts
                                .iter()
                                .map(|rev| Value::String(rev.to_string()))
                                .collect(),
                        ),
                    );
                }
            }
            rows.push(ChangeRow {
                id,
                seq,
                changes: collect_leaves(&metadata.rev_tree)
                    .into_iter()
                    .map(|leaf| ChangeRev {
                        rev: leaf.rev.to_string(),
                    })
                    .collect(),
                doc: Some(Value::Object(body)),
                deleted: metadata.deleted,
            });
        }
        Ok(rows)
    }

    /// Resolve the filter option into its compiled form, fetching and
    /// validating a design-document filter when one is named.
    fn compile_filter(&self, opts: &ChangesOptions) -> Result<CompiledFilter> {
        let mut predicate = None;
        let mut selector = None;
        match &opts.filter {
            None => {}
            Some(FilterSpec::Predicate(f)) => predicate = Some(f.clone()),
            Some(FilterSpec::Selector(sel)) => selector = Some(sel.clone()),
            Some(FilterSpec::Design(filter_name)) => {
                selector = Some(self.design_filter(filter_name)?);
            }
        }
        Ok(CompiledFilter {
            doc_ids: opts.doc_ids.clone(),
            predicate,
            selector,
            include_docs: opts.include_docs,
        })
    }

    fn design_filter(&self, filter_name: &str) -> Result<Map<String, Value>> {
        let (ddoc, name) = filter_name
            .split_once('/')
            .ok_or_else(|| Error::bad_request(format!("Invalid filter name: {filter_name}")))?;
        let design = self.get(&format!("_design/{ddoc}"), &GetOptions::default())?;
        let filter = design
            .get("filters")
            .and_then(Value::as_object)
            .and_then(|filters| filters.get(name))
            .ok_or_else(|| Error::missing(format!("missing filter {name} in _design/{ddoc}")))?;
        match filter {
            Value::Object(selector) => Ok(selector.clone()),
            _ => Err(Error::bad_request(
                "Design filters must be declarative selector objects; code filters are not supported",
            )),
        }
    }
}

/// Structural match: every selector entry names a `.`-separated field path
/// that must equal the given value.
fn selector_matches(selector: &Map<String, Value>, doc: &Value) -> bool {
    selector.iter().all(|(path, expected)| {
        let mut current = doc;
        for part in path.split('.') {
            match current.get(part) {
                Some(next) => current = next,
                None => return false,
            }
        }
        current == expected
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selector_matches_nested_paths() {
        let selector = json!({"kind": "note", "meta.author": "ada"});
        let Value::Object(selector) = selector else {
            unreachable!()
        };
        assert!(selector_matches(
            &selector,
            &json!({"kind": "note", "meta": {"author": "ada"}})
        ));
        assert!(!selector_matches(
            &selector,
            &json!({"kind": "note", "meta": {"author": "bob"}})
        ));
        assert!(!selector_matches(&selector, &json!({"kind": "note"})));
    }
}
