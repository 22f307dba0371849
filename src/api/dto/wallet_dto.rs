//! DTOs for wallet and hold endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{HoldReason, TripId, Wallet};

/// Opens a wallet.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// Rider or driver owning the wallet.
    pub owner_id: uuid::Uuid,
    /// Starting balance.
    #[serde(default)]
    pub initial_balance: u64,
}

/// Places a hold.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct PlaceHoldRequest {
    /// Amount reserved.
    pub amount: u64,
    /// Why the amount is held.
    pub reason: HoldReason,
    /// Trip the hold secures.
    #[serde(default)]
    pub trip_id: Option<TripId>,
}

/// A wallet with its spendable balance.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletView {
    /// The wallet and its holds.
    #[serde(flatten)]
    pub wallet: Wallet,
    /// Balance minus active holds.
    pub available_balance: u64,
}

impl From<Wallet> for WalletView {
    fn from(wallet: Wallet) -> Self {
        let available_balance = wallet.available_balance();
        Self {
            wallet,
            available_balance,
        }
    }
}
