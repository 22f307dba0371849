//! WebSocket layer: connection handling, message routing, subscriptions.
//!
//! The WebSocket endpoint at `/ws` streams dispatch events to clients
//! that subscribed to a rider, driver, request, trip, vehicle or wallet id,
//! and answers read commands for trip and presence projections.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
