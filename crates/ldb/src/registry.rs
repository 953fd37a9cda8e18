//! Process-wide registries
//!
//! Two registries span the process: open database handles keyed by store
//! path, and change emitters keyed by database name. Store entries are
//! removed on close/destroy so the path can be reopened; emitters live for
//! the process lifetime so a subscriber can outlive the handle it was
//! created from.

use crate::changes::ChangeRow;
use crate::store::Database;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use tokio::sync::mpsc::UnboundedSender;

static STORES: LazyLock<Mutex<HashMap<PathBuf, Database>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static CHANGES: LazyLock<Mutex<HashMap<String, Vec<UnboundedSender<ChangeRow>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// The open-stores registry. Held locked across an open so two callers
/// cannot race the same path into a double-open.
pub(crate) fn stores() -> &'static Mutex<HashMap<PathBuf, Database>> {
    &STORES
}

/// Attach a subscriber to the named database's change emitter.
pub(crate) fn attach_subscriber(name: &str, tx: UnboundedSender<ChangeRow>) {
    let mut emitters = CHANGES.lock();
    emitters.entry(name.to_string()).or_default().push(tx);
}

/// Publish a change event to every live subscriber of the named database.
pub(crate) fn publish(name: &str, row: &ChangeRow) {
    let mut emitters = CHANGES.lock();
    if let Some(subscribers) = emitters.get_mut(name) {
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            let _ = tx.send(row.clone());
        }
    }
}
