//! Artwork store backends.
//!
//! The artwork table is written by the processing backend; the gateway only
//! reads candidates from it for duplicate detection.

pub mod postgres;

pub use postgres::PostgresArtworkStore;
