//! Exchange orders and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{AccountId, Amount, Asset, AssetPair, OrderId, Result, SwapError};

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Nothing settled yet.
    Pending,
    /// Some, but not all, of the requested amount settled.
    Partial,
    /// Fully settled, or terminated by cancellation.
    Done,
}

impl OrderStatus {
    /// Statuses that still offer liquidity to the inverse pair.
    pub const OPEN: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Partial];

    /// Stable lowercase name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Partial => "partial",
            OrderStatus::Done => "done",
        }
    }

    /// Check if this is the final state.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Done)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Partial, OrderStatus::Done],
            OrderStatus::Partial => &[OrderStatus::Partial, OrderStatus::Done],
            OrderStatus::Done => &[],
        }
    }

    /// Check if transition to given state is valid. Staying put is always valid.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        *self == next || self.valid_transitions().contains(&next)
    }

    /// Status implied by the amounts, per the order invariant.
    pub fn derive(requested: Amount, settled: Amount, cancelled: bool) -> OrderStatus {
        if cancelled || settled >= requested {
            OrderStatus::Done
        } else if settled.is_zero() {
            OrderStatus::Pending
        } else {
            OrderStatus::Partial
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = SwapError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "partial" => Ok(OrderStatus::Partial),
            "done" => Ok(OrderStatus::Done),
            other => Err(SwapError::validation(
                format!("Unknown order status: {other}"),
                "status",
            )),
        }
    }
}

/// A request to convert `requested_amount` of `from_asset` into `to_asset`.
///
/// The requested amount is already escrowed out of the owner's balance by
/// the time the record is live for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Unique order identifier.
    pub id: OrderId,
    /// Owning account.
    pub owner: AccountId,
    /// Asset being given up.
    pub from_asset: Asset,
    /// Asset being received.
    pub to_asset: Asset,
    /// Amount of `from_asset` to convert.
    pub requested_amount: Amount,
    /// Amount matched so far.
    pub settled_amount: Amount,
    /// FIFO priority key.
    pub created_at: DateTime<Utc>,
    /// Current status.
    pub status: OrderStatus,
    /// Record version, bumped on every conditional update.
    pub version: u64,
    /// Escrow debit confirmed; only confirmed orders are matchable.
    pub escrow_confirmed: bool,
    /// The owner's `to_asset` credit for this order has been applied.
    pub target_credited: bool,
    /// Set when the order was terminated by cancellation.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Fill taken from this order as a counter-order that has not yet been
    /// recorded on the initiating order.
    #[serde(default)]
    pub unmirrored_fill: Option<UnmirroredFill>,
}

/// A counter-order fill still owed to the order that initiated it.
///
/// Written together with the counter's settled amount and cleared once the
/// initiating order carries the same fill, so an interrupted run can finish
/// the pair of writes instead of matching the initiator again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmirroredFill {
    /// Initiating order.
    pub order_id: OrderId,
    /// Amount to add to its settled amount.
    pub amount: Amount,
    /// Initiating order's version the fill applies on top of.
    pub order_version: u64,
}

impl ExchangeOrder {
    /// Create a new, not yet escrowed order.
    pub fn new(owner: AccountId, pair: AssetPair, requested_amount: Amount) -> Result<Self> {
        if requested_amount.is_zero() {
            return Err(SwapError::validation(
                "Amount must be greater than zero",
                "amount",
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            owner,
            from_asset: pair.from,
            to_asset: pair.to,
            requested_amount,
            settled_amount: Amount::ZERO,
            created_at: now,
            status: OrderStatus::Pending,
            version: 0,
            escrow_confirmed: false,
            target_credited: false,
            cancelled_at: None,
            updated_at: now,
            unmirrored_fill: None,
        })
    }

    /// The directed pair this order converts along.
    pub fn pair(&self) -> AssetPair {
        AssetPair {
            from: self.from_asset,
            to: self.to_asset,
        }
    }

    /// Amount still available for matching.
    pub fn pending_amount(&self) -> Amount {
        if self.is_cancelled() {
            return Amount::ZERO;
        }
        self.requested_amount.saturating_sub(self.settled_amount)
    }

    /// Check if the order was terminated by cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Check if the order can take part in matching.
    pub fn is_matchable(&self) -> bool {
        self.escrow_confirmed
            && !self.status.is_final()
            && !self.pending_amount().is_zero()
            && self.unmirrored_fill.is_none()
    }

    /// Completed by matching but the owner's credit is still outstanding.
    pub fn needs_completion_credit(&self) -> bool {
        self.status == OrderStatus::Done && !self.is_cancelled() && !self.target_credited
    }

    /// Update that settles `fill` more of this order.
    pub fn fill_update(&self, fill: Amount) -> Result<OrderUpdate> {
        if fill > self.pending_amount() {
            return Err(SwapError::validation(
                format!(
                    "Fill {fill} exceeds pending amount {} of order {}",
                    self.pending_amount(),
                    self.id
                ),
                "settled_amount",
            ));
        }
        let settled = self.settled_amount + fill;
        Ok(OrderUpdate {
            settled_amount: Some(settled),
            status: Some(OrderStatus::derive(self.requested_amount, settled, false)),
            ..OrderUpdate::default()
        })
    }

    /// Update that settles `fill` of this order as a counter to `initiator`,
    /// recording the fill as owed to it.
    pub fn counter_fill_update(&self, fill: Amount, initiator: &ExchangeOrder) -> Result<OrderUpdate> {
        if self.unmirrored_fill.is_some() {
            return Err(SwapError::conflict("order", self.id));
        }
        let mut update = self.fill_update(fill)?;
        update.unmirrored_fill = Some(Some(UnmirroredFill {
            order_id: initiator.id,
            amount: fill,
            order_version: initiator.version,
        }));
        Ok(update)
    }

    /// Produce the next version of this record with `update` applied.
    ///
    /// Stores call this after their version check so every backend enforces
    /// the same state machine.
    pub fn apply(&self, update: &OrderUpdate) -> Result<ExchangeOrder> {
        let mut next = self.clone();

        if let Some(settled) = update.settled_amount {
            if settled < self.settled_amount || settled > self.requested_amount {
                return Err(SwapError::validation(
                    format!(
                        "Settled amount {settled} outside [{}, {}] for order {}",
                        self.settled_amount, self.requested_amount, self.id
                    ),
                    "settled_amount",
                ));
            }
            next.settled_amount = settled;
        }
        if let Some(escrow_confirmed) = update.escrow_confirmed {
            next.escrow_confirmed = escrow_confirmed;
        }
        if let Some(target_credited) = update.target_credited {
            next.target_credited = target_credited;
        }
        if let Some(cancelled_at) = update.cancelled_at {
            next.cancelled_at = Some(cancelled_at);
        }
        if let Some(unmirrored) = update.unmirrored_fill {
            next.unmirrored_fill = unmirrored;
        }

        let status = OrderStatus::derive(
            next.requested_amount,
            next.settled_amount,
            next.is_cancelled(),
        );
        if let Some(requested) = update.status {
            if requested != status {
                return Err(SwapError::InvalidTransition {
                    from: self.status,
                    to: requested,
                });
            }
        }
        if !self.status.can_transition_to(status) {
            return Err(SwapError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        next.status = status;
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Check the amount and status invariants.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.settled_amount > self.requested_amount {
            return Err(format!(
                "order {}: settled {} exceeds requested {}",
                self.id, self.settled_amount, self.requested_amount
            ));
        }
        let expected = OrderStatus::derive(
            self.requested_amount,
            self.settled_amount,
            self.is_cancelled(),
        );
        if expected != self.status {
            return Err(format!(
                "order {}: status {} but amounts imply {}",
                self.id, self.status, expected
            ));
        }
        if self.from_asset == self.to_asset {
            return Err(format!("order {}: same-asset conversion", self.id));
        }
        Ok(())
    }
}

/// Field changes applied by a conditional order update.
///
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderUpdate {
    /// New settled amount.
    pub settled_amount: Option<Amount>,
    /// Expected resulting status; must agree with the amounts.
    pub status: Option<OrderStatus>,
    /// Mark the escrow debit as confirmed.
    pub escrow_confirmed: Option<bool>,
    /// Mark the completion credit as applied.
    pub target_credited: Option<bool>,
    /// Terminate the order by cancellation.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set (`Some(Some(_))`) or clear (`Some(None)`) the owed counter fill.
    pub unmirrored_fill: Option<Option<UnmirroredFill>>,
}

impl OrderUpdate {
    /// Confirm the escrow debit, making the order live.
    pub fn confirm_escrow() -> Self {
        Self {
            escrow_confirmed: Some(true),
            ..Self::default()
        }
    }

    /// Record that the owner's target-asset credit was applied.
    pub fn credited() -> Self {
        Self {
            target_credited: Some(true),
            ..Self::default()
        }
    }

    /// The owed counter fill has landed on the initiating order.
    pub fn mirror_landed() -> Self {
        Self {
            unmirrored_fill: Some(None),
            ..Self::default()
        }
    }

    /// Terminate by cancellation, optionally recording the settled-portion credit.
    pub fn cancel(credited: bool) -> Self {
        Self {
            status: Some(OrderStatus::Done),
            cancelled_at: Some(Utc::now()),
            target_credited: if credited { Some(true) } else { None },
            ..Self::default()
        }
    }
}
