//! Credential issuance, ballot casting and results.

use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::{Client, Database};
use rocket::{futures::TryStreamExt, serde::json::Json, State};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::CorrelationId;
use crate::model::{
    admin::Admin,
    audit::{self, AuditAction, AuditEntryCore, Performer},
    auth::{AuthToken, Capability},
    ballot::{Ballot, BallotAnswer, BallotCore},
    election::{self, Election, ElectionState},
    mongodb::{Coll, Id},
    token::{self, Issuance, VotingToken},
    voter::Voter,
};
use crate::tally::{self, TallyResult};

/// What an issuance request returns. The plaintext is present exactly when
/// the credential was freshly minted; it cannot be shown again.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialResponse {
    pub credential: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[post("/elections/<id>/tokens")]
pub async fn request_token(
    auth: AuthToken<Voter>,
    id: Id,
    elections: Coll<Election>,
    voters: Coll<Voter>,
    tokens: Coll<VotingToken>,
    config: &State<Config>,
) -> Result<Json<CredentialResponse>> {
    auth.require(Capability::RequestCredential)?;

    let election = election::fetch_election(&elections, id).await?;
    let voter = voters
        .find_one(auth.id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("This voter no longer exists"))?;

    let issuance = token::issue_for_voter(&tokens, config, &election, &voter, Utc::now()).await?;
    let response = match issuance {
        Issuance::Fresh {
            credential,
            metadata,
        } => CredentialResponse {
            credential: Some(credential),
            expires_at: metadata.expires_at,
        },
        Issuance::Existing(metadata) => CredentialResponse {
            credential: None,
            expires_at: metadata.expires_at,
        },
    };
    Ok(Json(response))
}

/// A ballot as submitted: the credential plaintext and the choice. Nothing
/// identifies the voter and no auth guard applies; the credential alone
/// proves the right to vote.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoteRequest {
    pub token: String,
    pub answer: BallotAnswer,
}

/// Acknowledgement of a cast ballot.
#[derive(Debug, Clone, Serialize)]
pub struct BallotReceipt {
    pub ballot_id: Id,
    pub cast_at: DateTime<Utc>,
}

#[post("/elections/<id>/vote", format = "json", data = "<request>")]
pub async fn cast_vote(
    id: Id,
    request: Json<VoteRequest>,
    elections: Coll<Election>,
    tokens: Coll<VotingToken>,
    ballots: Coll<Ballot>,
    client: &State<Client>,
    config: &State<Config>,
) -> Result<Json<BallotReceipt>> {
    let request = request.into_inner();
    let election = election::fetch_election(&elections, id).await?;

    let now = Utc::now();
    election.check_accepting_votes(now)?;

    // Reject malformed answers before touching the credential.
    request.answer.validate(&election)?;

    let token_hash = token::credential_hash(&request.token, config);
    let voting_token = tokens
        .find_one(
            doc! { "election_id": id, "token_hash": token_hash.as_str() },
            None,
        )
        .await?
        .ok_or_else(|| Error::not_found("Unknown voting credential"))?;
    voting_token.check_redeemable(now)?;

    // Redemption and ballot insertion commit together or not at all. The
    // conditional update is the at-most-once guarantee: of two concurrent
    // redeemers, one matches zero documents.
    let ballot = Ballot {
        id: Id::new(),
        ballot: BallotCore {
            election_id: id,
            answer: request.answer,
            token_hash,
            cast_at: now,
        },
    };

    let mut session = client.start_session(None).await?;
    session.start_transaction(None).await?;

    // A concurrent close can commit between the check above and this point;
    // a fresh read inside the transaction makes the state error win.
    let live = elections
        .find_one_with_session(id.as_doc(), None, &mut session)
        .await?;
    if let Err(e) = election::confirm_accepting_votes(live.as_deref(), now) {
        session.abort_transaction().await?;
        return Err(e);
    }

    let redeemed = tokens
        .update_one_with_session(
            doc! { "_id": voting_token.id, "used": false },
            doc! { "$set": { "used": true } },
            None,
            &mut session,
        )
        .await?;
    if redeemed.modified_count == 0 {
        session.abort_transaction().await?;
        return Err(Error::AlreadyUsed);
    }
    ballots
        .insert_one_with_session(&ballot, None, &mut session)
        .await?;

    session.commit_transaction().await?;

    info!("Ballot {} cast in election {id}", ballot.id);
    Ok(Json(BallotReceipt {
        ballot_id: ballot.id,
        cast_at: now,
    }))
}

#[get("/elections/<id>/results", rank = 1)]
pub async fn results_admin(
    auth: AuthToken<Admin>,
    id: Id,
    db: &State<Database>,
    correlation: &CorrelationId,
) -> Result<Json<TallyResult>> {
    run_tally(db, id, Performer::Admin(auth.id), correlation).await
}

#[get("/elections/<id>/results", rank = 2)]
pub async fn results_voter(
    auth: AuthToken<Voter>,
    id: Id,
    db: &State<Database>,
    correlation: &CorrelationId,
) -> Result<Json<TallyResult>> {
    run_tally(db, id, Performer::Voter(auth.id), correlation).await
}

/// Count the ballots. The ballot set is immutable, so any two runs over the
/// same election agree; running early just shows the count so far.
async fn run_tally(
    db: &Database,
    id: Id,
    performer: Performer,
    correlation: &CorrelationId,
) -> Result<Json<TallyResult>> {
    let election = election::fetch_election(&Coll::from_db(db), id).await?;
    if matches!(
        election.state,
        ElectionState::Draft | ElectionState::Published
    ) {
        return Err(Error::state(
            "Results are only available once the election has opened",
        ));
    }

    let ballots: Vec<Ballot> = Coll::<Ballot>::from_db(db)
        .find(doc! { "election_id": id }, None)
        .await?
        .try_collect()
        .await?;
    let answers: Vec<BallotAnswer> = ballots.into_iter().map(|b| b.ballot.answer).collect();
    let result = tally::tally(&election, &answers);

    audit::append(
        &Coll::from_db(db),
        AuditEntryCore::new(
            AuditAction::TallyRun,
            performer,
            id,
            doc! { "ballots": answers.len() as i64 },
            correlation.to_string(),
        ),
    )
    .await?;

    Ok(Json(result))
}
