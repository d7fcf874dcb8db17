//! Data models, mirroring the database structure plus API-level types.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod ballot;
pub mod election;
pub mod mongodb;
pub mod token;
pub mod voter;
