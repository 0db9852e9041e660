//! Append-only audit journal of ledger mutations.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use swapsettle_common::{AccountId, Asset, OrderId};

use crate::balance::{BalanceChange, BalanceChangeType};

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPurpose {
    /// Source asset escrowed at order creation.
    Escrow,
    /// Escrow returned after a failed order creation.
    EscrowRefund,
    /// Target asset credited when an order completes.
    CompletionCredit,
    /// Target asset credited for the settled part of a cancelled order.
    CancelCredit,
}

impl fmt::Display for EntryPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryPurpose::Escrow => "escrow",
            EntryPurpose::EscrowRefund => "escrow_refund",
            EntryPurpose::CompletionCredit => "completion_credit",
            EntryPurpose::CancelCredit => "cancel_credit",
        };
        f.write_str(name)
    }
}

/// A single journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Order the movement belongs to.
    pub order_id: OrderId,
    /// Why the balance moved.
    pub purpose: EntryPurpose,
    /// Account affected.
    pub account_id: AccountId,
    /// Asset affected.
    pub asset: Asset,
    /// Entry type (debit or credit).
    pub entry_type: BalanceChangeType,
    /// Amount.
    pub amount: Decimal,
    /// Balance after this entry.
    pub balance_after: Decimal,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Build an entry from a completed balance change.
    pub fn from_change(order_id: OrderId, purpose: EntryPurpose, change: &BalanceChange) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            purpose,
            account_id: change.account_id.clone(),
            asset: change.asset,
            entry_type: change.change_type,
            amount: change.amount,
            balance_after: change.balance_after,
            created_at: change.timestamp,
        }
    }

    /// Signed amount (positive for credit, negative for debit).
    pub fn signed_amount(&self) -> Decimal {
        self.entry_type.delta(self.amount)
    }
}

/// In-process journal shared by a ledger engine.
#[derive(Debug, Default)]
pub struct Journal {
    entries: RwLock<Vec<JournalEntry>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, entry: JournalEntry) {
        self.entries.write().push(entry);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.read().clone()
    }

    /// Entries recorded for one order.
    pub fn entries_for_order(&self, order_id: OrderId) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Count of entries for one order and purpose.
    pub fn count(&self, order_id: OrderId, purpose: EntryPurpose) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|e| e.order_id == order_id && e.purpose == purpose)
            .count()
    }

    /// Net movement per asset across all accounts.
    pub fn net_by_asset(&self) -> HashMap<Asset, Decimal> {
        let mut totals: HashMap<Asset, Decimal> = HashMap::new();
        for entry in self.entries.read().iter() {
            *totals.entry(entry.asset).or_insert(Decimal::ZERO) += entry.signed_amount();
        }
        totals
    }
}
