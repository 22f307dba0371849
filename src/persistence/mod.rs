//! Persistence layer: PostgreSQL dispatch event log.
//!
//! Every [`crate::domain::DispatchEvent`] published on the bus is appended
//! to an append-only `dispatch_events` table keyed by the primary entity
//! id. The log is the durable record for dispute resolution and can be
//! read back per entity or from a point in time. Writes happen on a
//! background task so the dispatch path never waits on the database.

pub mod models;
pub mod postgres;
pub mod writer;

pub use models::StoredEvent;
pub use postgres::PostgresPersistence;
pub use writer::spawn_event_log_writer;
