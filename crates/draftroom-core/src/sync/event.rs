// Change notifications emitted by the repository after each committed
// transaction, and consumed by every client's draft store.

use serde::{Deserialize, Serialize};

/// Persisted record kinds. Dispatch in the store is solely on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Drafts,
    Teams,
    Participants,
    Picks,
    Auctions,
    Bids,
    WishlistItems,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Drafts => "drafts",
            Table::Teams => "teams",
            Table::Participants => "participants",
            Table::Picks => "picks",
            Table::Auctions => "auctions",
            Table::Bids => "bids",
            Table::WishlistItems => "wishlist_items",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// One row-level change. `row` always carries the full record (for deletes,
/// the record as it was before removal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub operation: Operation,
    pub row: serde_json::Value,
}

impl ChangeEvent {
    fn new<T: Serialize>(
        table: Table,
        operation: Operation,
        row: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(ChangeEvent {
            table,
            operation,
            row: serde_json::to_value(row)?,
        })
    }

    pub fn insert<T: Serialize>(table: Table, row: &T) -> Result<Self, serde_json::Error> {
        Self::new(table, Operation::Insert, row)
    }

    pub fn update<T: Serialize>(table: Table, row: &T) -> Result<Self, serde_json::Error> {
        Self::new(table, Operation::Update, row)
    }

    pub fn delete<T: Serialize>(table: Table, row: &T) -> Result<Self, serde_json::Error> {
        Self::new(table, Operation::Delete, row)
    }
}

/// All events of one committed transaction, stamped with the draft's next
/// change sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub seq: u64,
    pub draft_id: String,
    pub events: Vec<ChangeEvent>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn touches(&self, table: Table) -> bool {
        self.events.iter().any(|e| e.table == table)
    }
}
