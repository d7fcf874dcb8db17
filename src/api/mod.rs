mod admin;
mod auth;
mod voting;

pub use admin::{DeleteRequest, OpenResponse, PublishSpec};
pub use voting::{BallotReceipt, CredentialResponse, VoteRequest};

/// All the API endpoints.
pub fn routes() -> Vec<rocket::Route> {
    routes![
        auth::admin_login,
        auth::logout,
        admin::create_election,
        admin::list_elections_admin,
        admin::list_elections_voter,
        admin::get_election_admin,
        admin::get_election_voter,
        admin::publish,
        admin::open,
        admin::pause,
        admin::resume,
        admin::close,
        admin::archive,
        admin::unarchive,
        admin::delete_election,
        admin::audit_trail,
        voting::request_token,
        voting::cast_vote,
        voting::results_admin,
        voting::results_voter,
    ]
}
