//! Wallets and escrow holds.
//!
//! `available = balance − Σ active holds` and it never goes negative: every
//! mutation below checks it before touching the balance. A hold moves out of
//! `active` exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ids::{HoldId, TripId, WalletId};
use crate::error::DispatchError;

/// Lifecycle of a [`WalletHold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Reserving funds.
    Active,
    /// Returned to the wallet.
    Released,
    /// Settled against the balance.
    Captured,
}

/// Why funds were held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// Caution for a booked shared seat.
    SeatReservation,
    /// Fare reserved for a wallet-paid trip.
    FareGuarantee,
    /// Security deposit for a scheduled trip.
    ScheduledDeposit,
    /// Placed directly through the API.
    Manual,
}

/// A reservation against a wallet balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WalletHold {
    /// Hold identifier.
    pub id: HoldId,
    /// Wallet the funds are reserved in.
    pub wallet_id: WalletId,
    /// Reserved amount.
    pub amount: u64,
    /// Why the funds are reserved.
    pub reason: HoldReason,
    /// Trip the hold backs, if any.
    pub trip_id: Option<TripId>,
    /// Current status.
    pub status: HoldStatus,
    /// Amount actually taken on capture.
    pub captured_amount: Option<u64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the hold left `active`.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A rider or driver wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Wallet {
    /// Wallet identifier.
    pub id: WalletId,
    /// Rider or driver owning the wallet.
    pub owner_id: uuid::Uuid,
    /// Settled balance.
    pub balance: u64,
    /// Every hold ever placed, in placement order.
    pub holds: Vec<WalletHold>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Creates a wallet with an opening balance.
    #[must_use]
    pub fn new(owner_id: uuid::Uuid, balance: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::new(),
            owner_id,
            balance,
            holds: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of active holds.
    #[must_use]
    pub fn held(&self) -> u64 {
        self.holds
            .iter()
            .filter(|h| h.status == HoldStatus::Active)
            .map(|h| h.amount)
            .sum()
    }

    /// Balance not reserved by any active hold.
    #[must_use]
    pub fn available_balance(&self) -> u64 {
        self.balance.saturating_sub(self.held())
    }

    /// Looks up a hold.
    #[must_use]
    pub fn hold(&self, hold_id: HoldId) -> Option<&WalletHold> {
        self.holds.iter().find(|h| h.id == hold_id)
    }

    fn active_hold_mut(&mut self, hold_id: HoldId) -> Result<&mut WalletHold, DispatchError> {
        let hold = self
            .holds
            .iter_mut()
            .find(|h| h.id == hold_id)
            .ok_or_else(|| DispatchError::not_found("hold", hold_id))?;
        if hold.status != HoldStatus::Active {
            return Err(DispatchError::AlreadyResolved(format!(
                "hold {hold_id} is {:?}",
                hold.status
            )));
        }
        Ok(hold)
    }

    /// Reserves `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InsufficientBalance`] if `amount` exceeds the
    /// available balance, [`DispatchError::InvalidRequest`] for a zero amount.
    pub fn place_hold(
        &mut self,
        amount: u64,
        reason: HoldReason,
        trip_id: Option<TripId>,
        now: DateTime<Utc>,
    ) -> Result<WalletHold, DispatchError> {
        if amount == 0 {
            return Err(DispatchError::InvalidRequest(
                "hold amount must be positive".to_string(),
            ));
        }
        let available = self.available_balance();
        if amount > available {
            return Err(DispatchError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        let hold = WalletHold {
            id: HoldId::new(),
            wallet_id: self.id,
            amount,
            reason,
            trip_id,
            status: HoldStatus::Active,
            captured_amount: None,
            created_at: now,
            resolved_at: None,
        };
        self.holds.push(hold.clone());
        self.updated_at = now;
        Ok(hold)
    }

    /// Returns a hold's funds to the available balance.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the hold is no longer
    /// active.
    pub fn release(&mut self, hold_id: HoldId, now: DateTime<Utc>) -> Result<WalletHold, DispatchError> {
        let hold = self.active_hold_mut(hold_id)?;
        hold.status = HoldStatus::Released;
        hold.resolved_at = Some(now);
        let released = hold.clone();
        self.updated_at = now;
        Ok(released)
    }

    /// Settles `amount` of a hold against the balance; the rest of the hold
    /// goes back to the available balance.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the hold is no longer
    /// active, [`DispatchError::InvalidRequest`] if `amount` exceeds it.
    pub fn capture(
        &mut self,
        hold_id: HoldId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<WalletHold, DispatchError> {
        let hold = self.active_hold_mut(hold_id)?;
        if amount > hold.amount {
            return Err(DispatchError::InvalidRequest(format!(
                "capture of {amount} exceeds hold of {}",
                hold.amount
            )));
        }
        hold.status = HoldStatus::Captured;
        hold.captured_amount = Some(amount);
        hold.resolved_at = Some(now);
        let captured = hold.clone();
        // The hold covered `amount`, so the balance cannot underflow.
        self.balance = self.balance.saturating_sub(amount);
        self.updated_at = now;
        Ok(captured)
    }

    /// Charges `amount` straight from the available balance.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InsufficientBalance`] if `amount` exceeds the
    /// available balance.
    pub fn debit(&mut self, amount: u64, now: DateTime<Utc>) -> Result<(), DispatchError> {
        let available = self.available_balance();
        if amount > available {
            return Err(DispatchError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        self.balance -= amount;
        self.updated_at = now;
        Ok(())
    }

    /// Settles a fare of `amount` against an optional hold: up to the hold
    /// amount is captured and the rest is debited. Nothing changes on error.
    ///
    /// Returns `(captured, debited, released)`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InsufficientBalance`] if the uncovered part
    /// exceeds what is available once the hold is resolved, and
    /// [`DispatchError::AlreadyResolved`] for an inactive hold.
    pub fn settle(
        &mut self,
        hold_id: Option<HoldId>,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<(u64, u64, u64), DispatchError> {
        let held = match hold_id {
            Some(id) => self.active_hold_mut(id)?.amount,
            None => 0,
        };
        let captured = amount.min(held);
        let debited = amount - captured;
        let available_after = self.available_balance() + (held - captured);
        if debited > available_after {
            return Err(DispatchError::InsufficientBalance {
                requested: debited,
                available: available_after,
            });
        }
        if let Some(id) = hold_id {
            self.capture(id, captured, now)?;
        }
        self.balance -= debited;
        self.updated_at = now;
        Ok((captured, debited, held - captured))
    }

    /// Adds funds.
    pub fn credit(&mut self, amount: u64, now: DateTime<Utc>) {
        self.balance = self.balance.saturating_add(amount);
        self.updated_at = now;
    }
}
