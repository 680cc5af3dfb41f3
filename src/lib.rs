//! Tag-processing engine - shared modules for the movetags binary.

pub mod albumsonly;
pub mod config;
pub mod format;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod safety;
pub mod scan;
pub mod schema;
pub mod sync;

#[cfg(test)]
pub mod testutil;
