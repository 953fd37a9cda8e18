//! Read path: `get`, `get_attachment`, `all_docs`, `get_revision_tree`

use crate::store::Database;
use davenport_common::{is_local_id, to_base64, Error, Result, Rev};
use davenport_merge::{collect_conflicts, is_deleted, winning_rev, Metadata, RevTree};
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::Bound;

/// Options for [`Database::get`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Fetch this exact revision instead of the winner.
    pub rev: Option<String>,
    /// Inline attachment payloads (base64) instead of stubs.
    pub attachments: bool,
}

/// Payload returned by [`Database::get_attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    Binary(Vec<u8>),
    Base64(String),
}

/// Options for [`Database::all_docs`].
#[derive(Debug, Clone, Default)]
pub struct AllDocsOptions {
    pub startkey: Option<String>,
    pub endkey: Option<String>,
    /// Explicit id list; rows come back in this order, deleted and missing
    /// ids included.
    pub keys: Option<Vec<String>>,
    pub descending: bool,
    pub include_docs: bool,
    pub conflicts: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllDocsResponse {
    pub total_rows: u64,
    pub offset: u64,
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllDocsRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DocRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The `value` of an `all_docs` row.
#[derive(Debug, Clone, Serialize)]
pub struct DocRef {
    pub rev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

impl Database {
    /// Fetch a document body by id.
    pub fn get(&self, doc_id: &str, opts: &GetOptions) -> Result<Value> {
        self.check_open()?;
        let metadata = self
            .read_metadata(doc_id)?
            .ok_or_else(|| Error::missing("missing"))?;
        let (rev, mut body) = self.resolve_body(&metadata, opts.rev.as_deref())?;

        body.insert("_id".to_string(), Value::String(metadata.id.clone()));
        body.insert("_rev".to_string(), Value::String(rev.to_string()));
        if opts.attachments {
            self.inline_attachments(&mut body)?;
        }
        Ok(Value::Object(body))
    }

    /// Fetch one attachment's payload.
    pub fn get_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        rev: Option<&str>,
        encode: bool,
    ) -> Result<AttachmentData> {
        self.check_open()?;
        let metadata = self
            .read_metadata(doc_id)?
            .ok_or_else(|| Error::missing("missing"))?;
        let (_, body) = self.resolve_body(&metadata, rev)?;

        let digest = body
            .get("_attachments")
            .and_then(Value::as_object)
            .and_then(|atts| atts.get(attachment_id))
            .and_then(Value::as_object)
            .and_then(|att| att.get("digest"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::missing("missing attachment"))?;

        // A digest without a blob row is an empty attachment.
        let bytes = match self.inner.attach_binary_store.get(digest.as_bytes())? {
            Some(blob) => blob.to_vec(),
            None => Vec::new(),
        };
        Ok(if encode {
            AttachmentData::Base64(to_base64(&bytes))
        } else {
            AttachmentData::Binary(bytes)
        })
    }

    /// Range- or key-scan the document store.
    pub fn all_docs(&self, opts: &AllDocsOptions) -> Result<AllDocsResponse> {
        self.check_open()?;
        let rows = match &opts.keys {
            Some(keys) => self.all_docs_by_keys(keys, opts)?,
            None => self.all_docs_by_range(opts)?,
        };
        Ok(AllDocsResponse {
            total_rows: self.info().doc_count,
            offset: 0,
            rows,
        })
    }

    /// The document's full revision tree.
    pub fn get_revision_tree(&self, doc_id: &str) -> Result<RevTree> {
        self.check_open()?;
        self.read_metadata(doc_id)?
            .map(|metadata| metadata.rev_tree)
            .ok_or_else(|| Error::missing("missing"))
    }

    /// Resolve the requested (or winning) revision to its stored body.
    fn resolve_body(
        &self,
        metadata: &Metadata,
        rev: Option<&str>,
    ) -> Result<(Rev, Map<String, Value>)> {
        let rev = match rev {
            Some(rev) => rev.parse::<Rev>()?,
            None => {
                let winner = winning_rev(metadata);
                if is_deleted(metadata, Some(&winner)) {
                    return Err(Error::missing("deleted"));
                }
                winner
            }
        };
        let seq = *metadata
            .rev_map
            .get(&rev.to_string())
            .ok_or_else(|| Error::missing("missing"))?;
        let body = self.read_body(seq)?;
        Ok((rev, body))
    }

    fn inline_attachments(&self, body: &mut Map<String, Value>) -> Result<()> {
        let Some(Value::Object(attachments)) = body.get_mut("_attachments") else {
            return Ok(());
        };
        for (name, entry) in attachments.iter_mut() {
            let att = entry
                .as_object_mut()
                .ok_or_else(|| Error::bad_request(format!("Invalid attachment entry: {name}")))?;
            let digest = att
                .get("digest")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::missing("missing attachment"))?;
            let bytes = match self.inner.attach_binary_store.get(digest.as_bytes())? {
                Some(blob) => blob.to_vec(),
                None => Vec::new(),
            };
            att.remove("stub");
            att.insert("data".to_string(), Value::String(to_base64(&bytes)));
        }
        Ok(())
    }

    fn all_docs_by_range(&self, opts: &AllDocsOptions) -> Result<Vec<AllDocsRow>> {
        // With descending, startkey is the upper bound.
        let (low, high) = if opts.descending {
            (&opts.endkey, &opts.startkey)
        } else {
            (&opts.startkey, &opts.endkey)
        };
        let lower = match low {
            Some(key) => Bound::Included(key.as_bytes().to_vec()),
            None => Bound::Unbounded,
        };
        let upper = match high {
            Some(key) => Bound::Included(key.as_bytes().to_vec()),
            None => Bound::Unbounded,
        };

        let iter: crate::StoreIter = if opts.descending {
            Box::new(self.inner.doc_store.range((lower, upper)).rev())
        } else {
            Box::new(self.inner.doc_store.range((lower, upper)))
        };

        let mut rows = Vec::new();
        for item in iter {
            if opts.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
            let (_, value) = item?;
            let metadata: Metadata = serde_json::from_slice(&value)?;
            if is_local_id(&metadata.id) {
                continue;
            }
            let winner = winning_rev(&metadata);
            if is_deleted(&metadata, Some(&winner)) {
                continue;
            }
            rows.push(self.build_row(&metadata, &winner, opts)?);
        }
        Ok(rows)
    }

    fn all_docs_by_keys(&self, keys: &[String], opts: &AllDocsOptions) -> Result<Vec<AllDocsRow>> {
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let metadata = if is_local_id(key) {
                None
            } else {
                self.read_metadata(key)?
            };
            let row = match metadata {
                None => AllDocsRow {
                    id: None,
                    key: key.clone(),
                    value: None,
                    doc: None,
                    error: Some("not_found".to_string()),
                },
                Some(metadata) => {
                    let winner = winning_rev(&metadata);
                    if is_deleted(&metadata, Some(&winner)) {
                        AllDocsRow {
                            id: Some(metadata.id.clone()),
                            key: key.clone(),
                            value: Some(DocRef {
                                rev: winner.to_string(),
                                deleted: Some(true),
                            }),
                            doc: None,
                            error: None,
                        }
                    } else {
                        self.build_row(&metadata, &winner, opts)?
                    }
                }
            };
            rows.push(row);
        }
        if opts.descending {
            rows.reverse();
        }
        Ok(rows)
    }

    fn build_row(
        &self,
        metadata: &Metadata,
        winner: &Rev,
        opts: &AllDocsOptions,
    ) -> Result<AllDocsRow> {
        let doc = if opts.include_docs {
            let seq = *metadata
                .rev_map
                .get(&winner.to_string())
                .ok_or_else(|| Error::missing("missing"))?;
            let mut body = self.read_body(seq)?;
            body.insert("_rev".to_string(), Value::String(winner.to_string()));
            if opts.conflicts {
                let conflicts = collect_conflicts(metadata);
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
            Some(Value::Object(body))
        } else {
            None
        };
        Ok(AllDocsRow {
            id: Some(metadata.id.clone()),
            key: metadata.id.clone(),
            value: Some(DocRef {
                rev: winner.to_string(),
                deleted: None,
            }),
            doc,
            error: None,
        })
    }
}
