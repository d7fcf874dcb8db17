//! Lifecycle transitions.
//!
//! Transitions are serialized per election by a conditional update filtering
//! on the expected current state; of two concurrent admins, exactly one
//! matches. Every transition leaves one audit entry.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc};
use mongodb::{Client, Database};

use crate::config::Config;
use crate::error::Error;
use crate::model::{
    audit::{self, AuditAction, AuditEntryCore, Performer},
    ballot::Ballot,
    election::{Election, ElectionState},
    mongodb::{Coll, Id},
    token::{self, CredentialCourier, VotingToken},
};

/// The phrase a superadmin must type to hard-delete an election.
pub const HARD_DELETE_CONFIRMATION: &str = "EYÐA VARANLEGA";

/// Fetch an election or fail with a typed not-found error.
pub async fn fetch_election(elections: &Coll<Election>, id: Id) -> Result<Election, Error> {
    elections
        .find_one(id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("No election with id {id}")))
}

/// Move an election to the given state, enforcing the transition table and
/// any per-transition validation.
pub async fn transition(
    db: &Database,
    election_id: Id,
    to: ElectionState,
    performer: Performer,
    correlation_id: String,
) -> Result<Election, Error> {
    let elections = Coll::<Election>::from_db(db);
    let mut election = fetch_election(&elections, election_id).await?;
    let from = election.state;

    if !from.can_transition(to) {
        return Err(Error::state(format!(
            "An election cannot go from {from:?} to {to:?}"
        )));
    }
    if to == ElectionState::Published {
        election.validate_for_publish()?;
    }

    let now = Utc::now();
    let result = elections
        .update_one(
            doc! { "_id": election_id, "state": from },
            doc! { "$set": {
                "state": to,
                "updated_at": bson::DateTime::from_chrono(now),
            }},
            None,
        )
        .await?;
    if result.matched_count == 0 {
        // Someone else transitioned it between our read and our write.
        return Err(Error::Conflict(format!(
            "Election {election_id} was modified concurrently"
        )));
    }

    audit::append(
        &Coll::from_db(db),
        AuditEntryCore::new(
            AuditAction::StateChanged,
            performer,
            election_id,
            doc! { "from": from, "to": to },
            correlation_id,
        ),
    )
    .await?;

    info!("Election {election_id} moved from {from:?} to {to:?}");
    election.election.state = to;
    election.election.updated_at = now;
    Ok(election)
}

/// Outcome of an open request.
pub enum OpenOutcome {
    Opened(Election),
    /// The window has not started yet; the caller schedules the open.
    Deferred(DateTime<Utc>),
}

/// Open a published election: flip the state, then issue credentials to all
/// active voters. Issuance is idempotent, so a crash between the flip and the
/// last credential is repaired by [`token::bulk_issue`] running again.
///
/// If the window has not started yet this does nothing and reports when the
/// open should happen.
pub async fn open_election(
    db: &Database,
    config: &Config,
    courier: &dyn CredentialCourier,
    election_id: Id,
    performer: Performer,
    correlation_id: String,
) -> Result<OpenOutcome, Error> {
    let elections = Coll::<Election>::from_db(db);
    let election = fetch_election(&elections, election_id).await?;

    if election.state != ElectionState::Published {
        return Err(Error::state(format!(
            "Only published elections can be opened, this one is {:?}",
            election.state
        )));
    }
    let (start, end) = election
        .window()
        .ok_or_else(|| Error::state("Election has no voting window"))?;

    let now = Utc::now();
    if now < start {
        audit::append(
            &Coll::from_db(db),
            AuditEntryCore::new(
                AuditAction::OpenScheduled,
                performer,
                election_id,
                doc! { "open_at": bson::DateTime::from_chrono(start) },
                correlation_id,
            ),
        )
        .await?;
        return Ok(OpenOutcome::Deferred(start));
    }
    if now >= end {
        return Err(Error::state(
            "The voting window has already ended; close the election instead",
        ));
    }

    let election = transition(
        db,
        election_id,
        ElectionState::Open,
        performer,
        correlation_id.clone(),
    )
    .await?;

    let issued = token::bulk_issue(
        &Coll::from_db(db),
        &Coll::from_db(db),
        config,
        courier,
        &election,
        now,
    )
    .await?;
    audit::append(
        &Coll::from_db(db),
        AuditEntryCore::new(
            AuditAction::TokensIssued,
            performer,
            election_id,
            doc! { "issued": issued as i64 },
            correlation_id,
        ),
    )
    .await?;

    Ok(OpenOutcome::Opened(election))
}

/// Irreversibly delete an election together with its credentials and
/// ballots. All three removals commit atomically; the audit trail is kept.
pub async fn hard_delete(
    client: &Client,
    db: &Database,
    election_id: Id,
    confirmation: &str,
    performer: Performer,
    correlation_id: String,
) -> Result<(), Error> {
    if confirmation != HARD_DELETE_CONFIRMATION {
        return Err(Error::validation(format!(
            "Hard deletion requires the confirmation phrase \"{HARD_DELETE_CONFIRMATION}\""
        )));
    }

    let elections = Coll::<Election>::from_db(db);
    let election = fetch_election(&elections, election_id).await?;

    let mut session = client.start_session(None).await?;
    session.start_transaction(None).await?;

    let by_election = doc! { "election_id": election_id };
    let tokens_removed = Coll::<VotingToken>::from_db(db)
        .delete_many_with_session(by_election.clone(), None, &mut session)
        .await?
        .deleted_count;
    let ballots_removed = Coll::<Ballot>::from_db(db)
        .delete_many_with_session(by_election, None, &mut session)
        .await?
        .deleted_count;
    elections
        .delete_one_with_session(election_id.as_doc(), None, &mut session)
        .await?;

    session.commit_transaction().await?;

    audit::append(
        &Coll::from_db(db),
        AuditEntryCore::new(
            AuditAction::HardDeleted,
            performer,
            election_id,
            doc! {
                "title": election.title.as_str(),
                "state": election.state,
                "tokens_removed": tokens_removed as i64,
                "ballots_removed": ballots_removed as i64,
            },
            correlation_id,
        ),
    )
    .await?;

    warn!(
        "Election {election_id} hard-deleted with {tokens_removed} credentials and \
         {ballots_removed} ballots"
    );
    Ok(())
}
