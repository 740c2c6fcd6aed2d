//! The database handle: serialized transactions over the table set.

use parking_lot::RwLock;

use am_domain::Result;

use crate::tables::Tables;
use crate::txn::Txn;

/// Lock-protected table set with transactional access.
///
/// `transaction` holds the write lock for the duration of the body, so
/// each transaction observes a serializable history; `read` takes the
/// shared lock for read-side projections.
pub struct Database {
    tables: RwLock<Tables>,
}

impl Database {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Run `f` inside a transaction.
    ///
    /// On `Ok` the post-commit hooks registered via [`Txn::on_commit`]
    /// run after the lock is released, in registration order. On `Err`
    /// every mutation is rolled back and no hook runs.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Txn) -> Result<T>) -> Result<T> {
        let mut guard = self.tables.write();
        let mut txn = Txn::new(&mut guard);
        match f(&mut txn) {
            Ok(value) => {
                let hooks = std::mem::take(&mut txn.hooks);
                drop(txn);
                drop(guard);
                for hook in hooks {
                    hook();
                }
                Ok(value)
            }
            Err(err) => {
                let undo = std::mem::take(&mut txn.undo);
                drop(txn);
                Txn::rollback(&mut guard, undo);
                Err(err)
            }
        }
    }

    /// Read-only access outside a transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.read())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
