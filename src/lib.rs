//! Backend server for the membership elections service: election lifecycle
//! management, one-time voting-credential issuance, at-most-once ballot
//! redemption, and tallying (plurality and ranked-choice STV).
//!
//! Ballots are decoupled from voter identity by construction: the credential
//! store holds only a keyed hash of each voting token, and ballots reference
//! that hash alone.

#[macro_use]
extern crate rocket;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod tally;

pub use config::Config;

/// Construct the server, ready for launch.
///
/// Fairing order matters: the scheduler needs the database and config,
/// which their own fairings place into managed state first.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(config::ConfigFairing)
        .attach(config::DatabaseFairing)
        .attach(scheduler::SchedulerFairing)
        .attach(logging::LoggerFairing)
}
