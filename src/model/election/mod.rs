mod base;
mod lifecycle;
mod spec;
mod state;

pub use base::{confirm_accepting_votes, Answer, Election, ElectionCore, VotingMethod};
#[cfg(test)]
pub(crate) use base::examples;
pub use lifecycle::{
    fetch_election, hard_delete, open_election, transition, OpenOutcome, HARD_DELETE_CONFIRMATION,
};
pub use spec::{ElectionDescription, ElectionSpec};
pub use state::ElectionState;
