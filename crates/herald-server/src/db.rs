use std::path::Path;
use std::sync::Arc;

use herald_store::{Database, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The single store connection, shared by every task. Holding the lock
/// serializes writes, including appends to one user's conversation.
pub type SharedDb = Arc<Mutex<Database>>;

pub fn shared(db: Database) -> SharedDb {
    Arc::new(Mutex::new(db))
}

/// Open the database and terminate dispatches a previous process left
/// `IN_PROGRESS`.
pub fn open(path: &Path) -> Result<SharedDb> {
    let mut db = Database::open_at(path)?;

    let stale = db.fail_stale_broadcasts()?;
    if stale.is_empty() {
        info!(path = %path.display(), "Database opened");
    } else {
        for id in &stale {
            warn!(broadcast = %id, "Broadcast was interrupted mid-dispatch, marked FAILED");
        }
        warn!(count = stale.len(), "Recovered stale broadcasts");
    }

    Ok(shared(db))
}
