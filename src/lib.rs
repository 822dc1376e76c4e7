//! Archives labeled images whose labels match a target label.
//!
//! Notifications arrive on a messaging subscription; matching objects are
//! streamed from the filestore into the archive store and acknowledged.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod messaging;
pub mod models;
pub mod routes;
pub mod services;
pub mod stores;

#[cfg(test)]
pub(crate) mod testing;
