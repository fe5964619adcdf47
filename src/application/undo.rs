use crate::domain::models::UndoEntry;

/// Single-slot history: holds the state as it was before the last undoable change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoLedger {
    snapshot: Option<UndoEntry>,
}

impl UndoLedger {
    pub fn from_snapshot(snapshot: Option<UndoEntry>) -> Self {
        Self { snapshot }
    }

    pub fn record(&mut self, entry: UndoEntry) {
        self.snapshot = Some(entry);
    }

    pub fn take(&mut self) -> Option<UndoEntry> {
        self.snapshot.take()
    }

    pub fn peek(&self) -> Option<&UndoEntry> {
        self.snapshot.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
    }
}
