//! Latest position samples for drivers and riders.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::GeoPoint;
use crate::error::DispatchError;

/// Supplies the latest known position of a rider or driver.
#[async_trait]
pub trait GeolocationSource: Send + Sync + fmt::Debug {
    /// Latest sample for `subject`.
    ///
    /// Fails with [`DispatchError::GeolocationUnavailable`] when none exists.
    async fn latest(&self, subject: uuid::Uuid) -> Result<GeoPoint, DispatchError>;
}

/// In-memory cache fed by position reports.
#[derive(Debug, Default)]
pub struct PositionCache {
    samples: RwLock<HashMap<uuid::Uuid, GeoPoint>>,
}

impl PositionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a sample, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for out-of-range coordinates.
    pub async fn report(&self, subject: uuid::Uuid, point: GeoPoint) -> Result<(), DispatchError> {
        if !point.is_valid() {
            return Err(DispatchError::InvalidRequest(format!(
                "coordinate out of range: ({}, {})",
                point.lat, point.lng
            )));
        }
        self.samples.write().await.insert(subject, point);
        Ok(())
    }
}

#[async_trait]
impl GeolocationSource for PositionCache {
    async fn latest(&self, subject: uuid::Uuid) -> Result<GeoPoint, DispatchError> {
        self.samples
            .read()
            .await
            .get(&subject)
            .copied()
            .ok_or(DispatchError::GeolocationUnavailable(subject))
    }
}
