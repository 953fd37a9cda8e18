//! Parsing raw documents into metadata and body halves
//!
//! A raw edit is split into [`Metadata`] (id, new revision, the one-path
//! revision tree the edit contributes) and the body that will be written to
//! the sequence store. Under `new_edits` the new revision id is derived
//! deterministically from the document content, so replaying the same edit
//! produces the same revision.

use crate::metadata::Metadata;
use crate::tree::{RevNode, RevStatus, RevTree, RootedPath};
use davenport_common::{Error, Result, Rev, LOCAL_PREFIX};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A parsed document: the metadata half and the body half.
#[derive(Debug, Clone)]
pub struct DocInfo {
    pub metadata: Metadata,
    pub data: Map<String, Value>,
}

const RESERVED_MEMBERS: [&str; 5] = ["_id", "_rev", "_attachments", "_deleted", "_revisions"];

/// Parse one raw document.
///
/// With `new_edits`, a missing `_id` is auto-generated and the new revision
/// extends `_rev` (or starts a fresh history). Without it, the edit carries
/// its own revision identity via `_revisions` or `_rev`, as replicated edits
/// do.
pub fn parse_doc(raw: Value, new_edits: bool) -> Result<DocInfo> {
    let Value::Object(mut doc) = raw else {
        return Err(Error::bad_request("Document must be a JSON object"));
    };

    let id = match doc.get("_id") {
        None if new_edits => {
            let id = Uuid::new_v4().simple().to_string();
            doc.insert("_id".to_string(), Value::String(id.clone()));
            id
        }
        None => return Err(Error::bad_request("Document is missing _id")),
        Some(Value::String(id)) => id.clone(),
        Some(_) => return Err(Error::bad_request("Document id must be a string")),
    };
    validate_doc_id(&id)?;

    let deleted = matches!(doc.get("_deleted"), Some(Value::Bool(true)));

    let (rev, rev_tree) = if new_edits {
        let new_hash = new_rev_hash(&doc)?;
        match doc.get("_rev") {
            Some(Value::String(parent)) => {
                let parent: Rev = parent.parse()?;
                let mut root = RevNode::leaf(parent.hash.clone(), RevStatus::Missing, false);
                root.children
                    .push(RevNode::leaf(new_hash.clone(), RevStatus::Available, deleted));
                (
                    Rev::new(parent.pos + 1, new_hash),
                    vec![RootedPath {
                        pos: parent.pos,
                        node: root,
                    }],
                )
            }
            Some(_) => return Err(Error::bad_request("Document _rev must be a string")),
            None => (
                Rev::new(1, new_hash.clone()),
                vec![RootedPath {
                    pos: 1,
                    node: RevNode::leaf(new_hash, RevStatus::Available, deleted),
                }],
            ),
        }
    } else if let Some(revisions) = doc.get("_revisions") {
        parse_revisions(revisions, deleted)?
    } else {
        let rev_str = doc
            .get("_rev")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::bad_request("Document without new_edits requires _rev or _revisions"))?;
        let rev: Rev = rev_str.parse()?;
        let node = RevNode::leaf(rev.hash.clone(), RevStatus::Available, deleted);
        (
            rev.clone(),
            vec![RootedPath {
                pos: rev.pos,
                node,
            }],
        )
    };

    let mut data = Map::new();
    for (key, value) in doc {
        if key.starts_with('_') {
            if !RESERVED_MEMBERS.contains(&key.as_str()) {
                return Err(Error::bad_request(format!(
                    "Bad special document member: {key}"
                )));
            }
            // _id and _deleted are restamped at write time; _rev and
            // _revisions are metadata-only.
            if key == "_attachments" {
                data.insert(key, value);
            }
        } else {
            data.insert(key, value);
        }
    }

    Ok(DocInfo {
        metadata: Metadata {
            id,
            rev,
            rev_tree,
            rev_map: BTreeMap::new(),
            seq: None,
            deleted,
        },
        data,
    })
}

/// Build the edit path encoded by a `_revisions` history
/// (`{start, ids: [newest .. oldest]}`).
fn parse_revisions(revisions: &Value, deleted: bool) -> Result<(Rev, RevTree)> {
    let obj = revisions
        .as_object()
        .ok_or_else(|| Error::bad_request("_revisions must be an object"))?;
    let start = obj
        .get("start")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::bad_request("_revisions.start must be a positive integer"))?;
    let ids: Vec<String> = obj
        .get("ids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .map(|id| id.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| Error::bad_request("_revisions.ids must be an array"))?
        .ok_or_else(|| Error::bad_request("_revisions.ids must contain strings"))?;
    if ids.is_empty() || start < ids.len() as u64 {
        return Err(Error::bad_request("_revisions is inconsistent"));
    }

    // ids run newest to oldest; the oldest becomes the path root.
    let mut node = RevNode::leaf(ids[0].clone(), RevStatus::Available, deleted);
    for hash in &ids[1..] {
        let mut parent = RevNode::leaf(hash.clone(), RevStatus::Missing, false);
        parent.children.push(node);
        node = parent;
    }
    Ok((
        Rev::new(start, ids[0].clone()),
        vec![RootedPath {
            pos: start - ids.len() as u64 + 1,
            node,
        }],
    ))
}

fn validate_doc_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::bad_request("Document id cannot be empty"));
    }
    if id.starts_with('_') && !id.starts_with("_design/") && !id.starts_with(LOCAL_PREFIX) {
        return Err(Error::bad_request(format!(
            "Only reserved document ids may start with underscore: {id}"
        )));
    }
    Ok(())
}

/// Deterministic revision hash over the serialized document. Key order is
/// stable, and `_rev` participates, so the hash is unique per parent.
fn new_rev_hash(doc: &Map<String, Value>) -> Result<String> {
    let bytes = serde_json::to_vec(doc)?;
    Ok(format!("{:x}", md5::compute(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_edit_starts_generation_one() {
        let info = parse_doc(json!({"_id": "a", "value": 1}), true).unwrap();
        assert_eq!(info.metadata.id, "a");
        assert_eq!(info.metadata.rev.pos, 1);
        assert!(!info.metadata.deleted);
        assert_eq!(info.metadata.rev_tree.len(), 1);
        assert_eq!(info.metadata.rev_tree[0].pos, 1);
        assert!(info.data.contains_key("value"));
        assert!(!info.data.contains_key("_id"));
    }

    #[test]
    fn edit_with_parent_extends_history() {
        let first = parse_doc(json!({"_id": "a", "value": 1}), true).unwrap();
        let parent = first.metadata.rev.clone();
        let info = parse_doc(
            json!({"_id": "a", "value": 2, "_rev": parent.to_string()}),
            true,
        )
        .unwrap();
        assert_eq!(info.metadata.rev.pos, 2);
        let root = &info.metadata.rev_tree[0];
        assert_eq!(root.pos, 1);
        assert_eq!(root.node.hash, parent.hash);
        assert_eq!(root.node.status, RevStatus::Missing);
        assert_eq!(root.node.children[0].hash, info.metadata.rev.hash);
    }

    #[test]
    fn same_content_same_parent_same_rev() {
        let a = parse_doc(json!({"_id": "a", "value": 1}), true).unwrap();
        let b = parse_doc(json!({"_id": "a", "value": 1}), true).unwrap();
        assert_eq!(a.metadata.rev, b.metadata.rev);
    }

    #[test]
    fn missing_id_is_generated() {
        let info = parse_doc(json!({"value": 1}), true).unwrap();
        assert_eq!(info.metadata.id.len(), 32);
    }

    #[test]
    fn deleted_flag_is_carried() {
        let info = parse_doc(json!({"_id": "a", "_deleted": true}), true).unwrap();
        assert!(info.metadata.deleted);
        assert!(info.metadata.rev_tree[0].node.deleted);
        assert!(!info.data.contains_key("_deleted"));
    }

    #[test]
    fn revisions_history_builds_full_path() {
        let info = parse_doc(
            json!({
                "_id": "a",
                "_rev": "3-ccc",
                "_revisions": {"start": 3, "ids": ["ccc", "bbb", "aaa"]}
            }),
            false,
        )
        .unwrap();
        assert_eq!(info.metadata.rev, Rev::new(3, "ccc"));
        let root = &info.metadata.rev_tree[0];
        assert_eq!(root.pos, 1);
        assert_eq!(root.node.hash, "aaa");
        assert_eq!(root.node.status, RevStatus::Missing);
        assert_eq!(root.node.children[0].hash, "bbb");
        assert_eq!(root.node.children[0].children[0].hash, "ccc");
        assert_eq!(root.node.children[0].children[0].status, RevStatus::Available);
    }

    #[test]
    fn replicated_edit_without_history_uses_rev() {
        let info = parse_doc(json!({"_id": "a", "_rev": "5-abc"}), false).unwrap();
        assert_eq!(info.metadata.rev, Rev::new(5, "abc"));
        assert_eq!(info.metadata.rev_tree[0].pos, 5);
    }

    #[test]
    fn rejects_underscore_ids_and_members() {
        assert!(parse_doc(json!({"_id": "_bad"}), true).is_err());
        assert!(parse_doc(json!({"_id": "a", "_zing": 1}), true).is_err());
        assert!(parse_doc(json!({"_id": "_design/app"}), true).is_ok());
        assert!(parse_doc(json!({"_id": "_local/state"}), true).is_ok());
    }

    #[test]
    fn rejects_non_object_documents() {
        assert!(parse_doc(json!([1, 2, 3]), true).is_err());
        assert!(parse_doc(json!("nope"), true).is_err());
    }

    #[test]
    fn attachments_stay_in_data() {
        let info = parse_doc(
            json!({"_id": "a", "_attachments": {"file": {"data": "", "content_type": "text/plain"}}}),
            true,
        )
        .unwrap();
        assert!(info.data.contains_key("_attachments"));
    }
}
