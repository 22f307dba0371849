//! Escrow Manager: wallets and the hold / capture / release contract.
//!
//! Every operation runs under the wallet's own write lock, so concurrent
//! holds against one wallet are serialized and can never together exceed
//! its balance.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::config::EscrowPolicy;
use crate::domain::{
    DispatchEvent, EventBus, HoldId, HoldReason, HoldStatus, PaymentMethod, Registry, Settlement,
    SharedClock, TripId, Wallet, WalletHold, WalletId,
};
use crate::error::DispatchError;

/// Owns every wallet and hold.
#[derive(Debug)]
pub struct EscrowManager {
    wallets: Registry<WalletId, Wallet>,
    hold_index: RwLock<HashMap<HoldId, WalletId>>,
    policy: EscrowPolicy,
    event_bus: EventBus,
    clock: SharedClock,
}

impl EscrowManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(policy: EscrowPolicy, event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            wallets: Registry::new("wallet"),
            hold_index: RwLock::new(HashMap::new()),
            policy,
            event_bus,
            clock,
        }
    }

    /// Escrow amounts in force.
    #[must_use]
    pub fn policy(&self) -> &EscrowPolicy {
        &self.policy
    }

    fn hold_event(&self, hold: &WalletHold) -> DispatchEvent {
        DispatchEvent::HoldChanged {
            hold_id: hold.id,
            wallet_id: hold.wallet_id,
            trip_id: hold.trip_id,
            status: hold.status,
            amount: hold.amount,
            captured_amount: hold.captured_amount,
            timestamp: self.clock.now(),
        }
    }

    async fn wallet_of(&self, hold_id: HoldId) -> Result<WalletId, DispatchError> {
        self.hold_index
            .read()
            .await
            .get(&hold_id)
            .copied()
            .ok_or_else(|| DispatchError::not_found("hold", hold_id))
    }

    /// Opens a wallet for a rider or driver.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] on an id collision.
    pub async fn create_wallet(
        &self,
        owner_id: uuid::Uuid,
        initial_balance: u64,
    ) -> Result<Wallet, DispatchError> {
        let wallet = Wallet::new(owner_id, initial_balance, self.clock.now());
        self.wallets
            .insert(wallet.id, wallet.clone())
            .await
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        tracing::info!(wallet_id = %wallet.id, %owner_id, initial_balance, "wallet created");
        Ok(wallet)
    }

    /// Returns a copy of the wallet.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown wallet.
    pub async fn wallet(&self, wallet_id: WalletId) -> Result<Wallet, DispatchError> {
        self.wallets.snapshot(wallet_id).await
    }

    /// Balance not reserved by active holds.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown wallet.
    pub async fn available_balance(&self, wallet_id: WalletId) -> Result<u64, DispatchError> {
        Ok(self.wallet(wallet_id).await?.available_balance())
    }

    /// Adds funds to a wallet.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for a zero amount and
    /// [`DispatchError::NotFound`] for an unknown wallet.
    pub async fn top_up(&self, wallet_id: WalletId, amount: u64) -> Result<Wallet, DispatchError> {
        if amount == 0 {
            return Err(DispatchError::InvalidRequest(
                "top-up amount must be positive".to_string(),
            ));
        }
        let lock = self.wallets.get(wallet_id).await?;
        let mut wallet = lock.write().await;
        wallet.credit(amount, self.clock.now());
        tracing::info!(%wallet_id, amount, balance = wallet.balance, "wallet topped up");
        Ok(wallet.clone())
    }

    /// Places a hold.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InsufficientBalance`] if `amount` exceeds the
    /// available balance.
    pub async fn place_hold(
        &self,
        wallet_id: WalletId,
        amount: u64,
        reason: HoldReason,
        trip_id: Option<TripId>,
    ) -> Result<WalletHold, DispatchError> {
        let lock = self.wallets.get(wallet_id).await?;
        let mut wallet = lock.write().await;
        let hold = wallet
            .place_hold(amount, reason, trip_id, self.clock.now())
            .inspect_err(|e| tracing::debug!(%wallet_id, amount, error = %e, "hold refused"))?;
        self.hold_index.write().await.insert(hold.id, wallet_id);
        drop(wallet);

        self.event_bus.publish(self.hold_event(&hold));
        tracing::info!(hold_id = %hold.id, %wallet_id, amount, ?reason, "hold placed");
        Ok(hold)
    }

    /// Releases a hold.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the hold was already
    /// released or captured.
    pub async fn release_hold(&self, hold_id: HoldId) -> Result<WalletHold, DispatchError> {
        let wallet_id = self.wallet_of(hold_id).await?;
        let lock = self.wallets.get(wallet_id).await?;
        let hold = lock.write().await.release(hold_id, self.clock.now())?;

        self.event_bus.publish(self.hold_event(&hold));
        tracing::info!(%hold_id, %wallet_id, amount = hold.amount, "hold released");
        Ok(hold)
    }

    /// Captures `amount` of a hold, releasing the rest.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the hold was already
    /// released or captured, [`DispatchError::InvalidRequest`] if `amount`
    /// exceeds the hold.
    pub async fn capture_hold(
        &self,
        hold_id: HoldId,
        amount: u64,
    ) -> Result<WalletHold, DispatchError> {
        let wallet_id = self.wallet_of(hold_id).await?;
        let lock = self.wallets.get(wallet_id).await?;
        let hold = lock.write().await.capture(hold_id, amount, self.clock.now())?;

        self.event_bus.publish(self.hold_event(&hold));
        tracing::info!(%hold_id, %wallet_id, captured = amount, held = hold.amount, "hold captured");
        Ok(hold)
    }

    /// Returns a copy of a hold.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown hold.
    pub async fn hold(&self, hold_id: HoldId) -> Result<WalletHold, DispatchError> {
        let wallet_id = self.wallet_of(hold_id).await?;
        self.wallet(wallet_id)
            .await?
            .hold(hold_id)
            .cloned()
            .ok_or_else(|| DispatchError::not_found("hold", hold_id))
    }

    /// Returns `true` if the hold exists and is still active.
    pub async fn is_active(&self, hold_id: HoldId) -> bool {
        self.hold(hold_id)
            .await
            .is_ok_and(|h| h.status == HoldStatus::Active)
    }

    /// Charges a wallet directly.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InsufficientBalance`] if `amount` exceeds the
    /// available balance.
    pub async fn debit(&self, wallet_id: WalletId, amount: u64) -> Result<Wallet, DispatchError> {
        let lock = self.wallets.get(wallet_id).await?;
        let mut wallet = lock.write().await;
        wallet.debit(amount, self.clock.now())?;
        tracing::info!(%wallet_id, amount, "wallet debited");
        Ok(wallet.clone())
    }

    /// Takes the booking hold for a trip: the full fare for wallet payment,
    /// the seat caution for cash payment when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] when wallet payment has no
    /// wallet, and [`DispatchError::InsufficientBalance`] when the hold does
    /// not fit.
    pub async fn hold_for_booking(
        &self,
        payment_method: PaymentMethod,
        wallet_id: Option<WalletId>,
        fare: u64,
        trip_id: TripId,
    ) -> Result<Option<WalletHold>, DispatchError> {
        match (payment_method, wallet_id) {
            (PaymentMethod::Wallet, None) => Err(DispatchError::InvalidRequest(
                "wallet payment requires a wallet".to_string(),
            )),
            (PaymentMethod::Wallet, Some(wallet_id)) => self
                .place_hold(wallet_id, fare, HoldReason::FareGuarantee, Some(trip_id))
                .await
                .map(Some),
            (PaymentMethod::Cash, Some(wallet_id)) if self.policy.cash_seat_caution > 0 => self
                .place_hold(
                    wallet_id,
                    self.policy.cash_seat_caution,
                    HoldReason::SeatReservation,
                    Some(trip_id),
                )
                .await
                .map(Some),
            (PaymentMethod::Cash, _) => Ok(None),
        }
    }

    /// Gives back a booking hold whose trip was never opened.
    pub async fn abandon_hold(&self, hold_id: Option<HoldId>) {
        let Some(hold_id) = hold_id else {
            return;
        };
        if let Err(e) = self.release_hold(hold_id).await {
            tracing::warn!(%hold_id, error = %e, "abandoned booking hold not released");
        }
    }

    /// Settles a completed trip's fare: captures up to the fare from the hold
    /// and debits whatever the hold did not cover.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InsufficientBalance`] if the uncovered part
    /// cannot be debited; the hold stays active in that case.
    pub async fn settle_fare(
        &self,
        wallet_id: WalletId,
        hold_id: Option<HoldId>,
        fare: u64,
    ) -> Result<Settlement, DispatchError> {
        let lock = self.wallets.get(wallet_id).await?;
        let mut wallet = lock.write().await;
        let (captured, debited, released) = wallet.settle(hold_id, fare, self.clock.now())?;
        let hold = hold_id.and_then(|id| wallet.hold(id).cloned());
        drop(wallet);

        if let Some(hold) = &hold {
            self.event_bus.publish(self.hold_event(hold));
        }
        tracing::info!(%wallet_id, fare, captured, debited, released, "fare settled");
        Ok(Settlement {
            captured,
            debited,
            released,
        })
    }

    /// Settles a penalty cancellation: captures up to the configured penalty
    /// and releases the rest.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] for an inactive hold.
    pub async fn settle_penalty(&self, hold_id: HoldId) -> Result<Settlement, DispatchError> {
        let hold = self.hold(hold_id).await?;
        let penalty = self.policy.cancellation_penalty.min(hold.amount);
        let captured = self.capture_hold(hold_id, penalty).await?;
        let taken = captured.captured_amount.unwrap_or(penalty);
        Ok(Settlement {
            captured: taken,
            debited: 0,
            released: captured.amount - taken,
        })
    }

    /// Settles a no-penalty cancellation by releasing the hold.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] for an inactive hold.
    pub async fn settle_release(&self, hold_id: HoldId) -> Result<Settlement, DispatchError> {
        let released = self.release_hold(hold_id).await?;
        Ok(Settlement {
            captured: 0,
            debited: 0,
            released: released.amount,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::SystemClock;

    fn manager(policy: EscrowPolicy) -> Arc<EscrowManager> {
        Arc::new(EscrowManager::new(
            policy,
            EventBus::new(64),
            Arc::new(SystemClock),
        ))
    }

    async fn funded(escrow: &EscrowManager, balance: u64) -> WalletId {
        let Ok(wallet) = escrow.create_wallet(uuid::Uuid::new_v4(), balance).await else {
            panic!("wallet creation should succeed");
        };
        wallet.id
    }

    #[tokio::test]
    async fn concurrent_holds_never_exceed_balance() {
        let escrow = manager(EscrowPolicy::default());
        let wallet_id = funded(&escrow, 3000).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let escrow = Arc::clone(&escrow);
            handles.push(tokio::spawn(async move {
                escrow
                    .place_hold(wallet_id, 1000, HoldReason::SeatReservation, None)
                    .await
                    .is_ok()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);
        assert_eq!(escrow.available_balance(wallet_id).await.ok(), Some(0));
    }

    #[tokio::test]
    async fn third_resolution_is_already_resolved() {
        let escrow = manager(EscrowPolicy::default());
        let wallet_id = funded(&escrow, 5000).await;
        let Ok(hold) = escrow.place_hold(wallet_id, 2000, HoldReason::Manual, None).await else {
            panic!("hold should fit");
        };
        assert!(escrow.capture_hold(hold.id, 2000).await.is_ok());
        assert!(matches!(
            escrow.release_hold(hold.id).await,
            Err(DispatchError::AlreadyResolved(_))
        ));
        assert!(matches!(
            escrow.capture_hold(hold.id, 1).await,
            Err(DispatchError::AlreadyResolved(_))
        ));
        assert_eq!(escrow.wallet(wallet_id).await.map(|w| w.balance).ok(), Some(3000));
    }

    #[tokio::test]
    async fn abandoned_booking_hold_frees_the_wallet() {
        let escrow = manager(EscrowPolicy::default());
        let wallet_id = funded(&escrow, 3000).await;
        let Ok(Some(hold)) = escrow
            .hold_for_booking(PaymentMethod::Wallet, Some(wallet_id), 1600, TripId::new())
            .await
        else {
            panic!("booking hold should fit");
        };
        assert_eq!(escrow.available_balance(wallet_id).await.ok(), Some(1400));

        escrow.abandon_hold(Some(hold.id)).await;
        assert!(!escrow.is_active(hold.id).await);
        assert_eq!(escrow.available_balance(wallet_id).await.ok(), Some(3000));

        // A second pass finds nothing to give back.
        escrow.abandon_hold(Some(hold.id)).await;
        escrow.abandon_hold(None).await;
        assert_eq!(escrow.wallet(wallet_id).await.map(|w| w.balance).ok(), Some(3000));
    }

    #[tokio::test]
    async fn penalty_capture_releases_the_remainder() {
        let escrow = manager(EscrowPolicy::default());
        let wallet_id = funded(&escrow, 5000).await;
        let Ok(hold) = escrow.place_hold(wallet_id, 2100, HoldReason::FareGuarantee, None).await
        else {
            panic!("hold should fit");
        };
        let Ok(settlement) = escrow.settle_penalty(hold.id).await else {
            panic!("penalty should settle");
        };
        assert_eq!(settlement.captured, 500);
        assert_eq!(settlement.released, 1600);
        assert_eq!(escrow.available_balance(wallet_id).await.ok(), Some(4500));
    }

    #[tokio::test]
    async fn booking_hold_follows_payment_method() {
        let escrow = manager(EscrowPolicy {
            cash_seat_caution: 300,
            ..EscrowPolicy::default()
        });
        let wallet_id = funded(&escrow, 1000).await;
        let trip_id = TripId::new();

        let cash = escrow
            .hold_for_booking(PaymentMethod::Cash, Some(wallet_id), 2100, trip_id)
            .await;
        assert!(matches!(cash, Ok(Some(ref h)) if h.amount == 300));

        let wallet = escrow
            .hold_for_booking(PaymentMethod::Wallet, Some(wallet_id), 2100, trip_id)
            .await;
        assert!(matches!(
            wallet,
            Err(DispatchError::InsufficientBalance { requested: 2100, available: 700 })
        ));
        assert!(matches!(
            escrow.hold_for_booking(PaymentMethod::Wallet, None, 10, trip_id).await,
            Err(DispatchError::InvalidRequest(_))
        ));
        assert!(matches!(
            escrow.hold_for_booking(PaymentMethod::Cash, None, 10, trip_id).await,
            Ok(None)
        ));
    }
}
