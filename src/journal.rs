//! Change-set journal
//!
//! Long mutation sequences are bracketed by an explicit begin/end
//! change-set scope. While a scope is open, every structural mutation is
//! recorded as one action with its parameters; `end` drains the batch for
//! diff or undo tooling. Only the state before the scope and after it are
//! guaranteed stable; nothing may assume partial consistency inside it.

use crate::error::{Error, Result};
use crate::notify::ObjectKind;
use serde::Serialize;
use tracing::debug;

/// One recorded structural mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JournalAction {
    Create {
        kind: ObjectKind,
        id: u32,
    },
    Destroy {
        kind: ObjectKind,
        id: u32,
    },
    Connect {
        kind: ObjectKind,
        id: u32,
        peer: u32,
    },
    Disconnect {
        kind: ObjectKind,
        id: u32,
        peer: u32,
    },
    StatusChange {
        kind: ObjectKind,
        id: u32,
    },
    SwapMaster {
        inst: u32,
        old_master: u32,
        new_master: u32,
    },
}

/// Journal of one open database. Records only while a change set is open.
#[derive(Debug, Default)]
pub struct ChangeJournal {
    active: bool,
    actions: Vec<JournalAction>,
}

impl ChangeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a change-set scope. Scopes do not nest.
    pub fn begin(&mut self) -> Result<()> {
        if self.active {
            return Err(Error::InvalidArgument(
                "change set already open".to_string(),
            ));
        }
        self.active = true;
        debug!("change set opened");
        Ok(())
    }

    /// Close the scope and drain the recorded batch.
    pub fn end(&mut self) -> Result<Vec<JournalAction>> {
        if !self.active {
            return Err(Error::InvalidArgument("no open change set".to_string()));
        }
        self.active = false;
        let batch = std::mem::take(&mut self.actions);
        debug!(actions = batch.len(), "change set closed");
        Ok(batch)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record one action. A no-op outside an open scope.
    pub fn record(&mut self, action: JournalAction) {
        if self.active {
            self.actions.push(action);
        }
    }

    /// Actions recorded so far in the open scope.
    pub fn pending(&self) -> &[JournalAction] {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_only_inside_scope() -> Result<()> {
        let mut journal = ChangeJournal::new();
        journal.record(JournalAction::Create {
            kind: ObjectKind::Net,
            id: 1,
        });
        assert!(journal.pending().is_empty());

        journal.begin()?;
        journal.record(JournalAction::Create {
            kind: ObjectKind::Net,
            id: 2,
        });
        journal.record(JournalAction::SwapMaster {
            inst: 4,
            old_master: 7,
            new_master: 8,
        });
        let batch = journal.end()?;
        assert_eq!(batch.len(), 2);
        assert!(journal.pending().is_empty());
        Ok(())
    }

    #[test]
    fn test_scope_misuse() {
        let mut journal = ChangeJournal::new();
        assert!(journal.end().is_err());
        journal.begin().unwrap();
        assert!(journal.begin().is_err());
    }
}
