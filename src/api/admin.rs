//! Election administration endpoints.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc};
use mongodb::options::FindOptions;
use mongodb::{Client, Database};
use rocket::{futures::TryStreamExt, serde::json::Json, State};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::CorrelationId;
use crate::model::{
    admin::Admin,
    audit::{self, AuditAction, AuditEntryCore, AuditEntryView, AuditLogEntry, Performer},
    auth::{AuthToken, Capability},
    election::{
        self, Election, ElectionDescription, ElectionSpec, ElectionState, OpenOutcome,
    },
    mongodb::{Coll, Id},
    voter::Voter,
};

#[post("/elections", format = "json", data = "<spec>")]
pub async fn create_election(
    token: AuthToken<Admin>,
    spec: Json<ElectionSpec>,
    elections: Coll<Election>,
    audit_log: Coll<AuditEntryCore>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    token.require(Capability::ManageElections)?;

    let election = Election {
        id: Id::new(),
        election: spec.into_inner().into_draft(token.id, Utc::now()),
    };
    elections.insert_one(&election, None).await?;

    audit::append(
        &audit_log,
        AuditEntryCore::new(
            AuditAction::ElectionCreated,
            Performer::Admin(token.id),
            election.id,
            doc! { "title": election.title.as_str() },
            correlation.to_string(),
        ),
    )
    .await?;

    info!("Election {} created", election.id);
    Ok(Json(election.into()))
}

#[get("/elections?<archived>", rank = 1)]
pub async fn list_elections_admin(
    _token: AuthToken<Admin>,
    archived: Option<bool>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let filter = if archived.unwrap_or(false) {
        doc! {}
    } else {
        doc! { "state": { "$ne": ElectionState::Archived } }
    };
    list_elections(&elections, filter).await
}

/// Voters only see elections that have been announced; drafts and the
/// archive stay behind the admin view.
#[get("/elections?<archived>", rank = 2)]
pub async fn list_elections_voter(
    _token: AuthToken<Voter>,
    archived: Option<bool>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let _ = archived;
    let filter = doc! { "state": { "$nin": [ElectionState::Draft, ElectionState::Archived] } };
    list_elections(&elections, filter).await
}

async fn list_elections(
    elections: &Coll<Election>,
    filter: bson::Document,
) -> Result<Json<Vec<ElectionDescription>>> {
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .build();
    let found: Vec<Election> = elections.find(filter, options).await?.try_collect().await?;
    Ok(Json(found.into_iter().map(Into::into).collect()))
}

#[get("/elections/<id>", rank = 1)]
pub async fn get_election_admin(
    _token: AuthToken<Admin>,
    id: Id,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election = election::fetch_election(&elections, id).await?;
    Ok(Json(election.into()))
}

#[get("/elections/<id>", rank = 2)]
pub async fn get_election_voter(
    _token: AuthToken<Voter>,
    id: Id,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election = election::fetch_election(&elections, id).await?;
    if matches!(
        election.state,
        ElectionState::Draft | ElectionState::Archived
    ) {
        return Err(Error::not_found(format!("No election with id {id}")));
    }
    Ok(Json(election.into()))
}

/// The voting window may be supplied with the publish call rather than at
/// creation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishSpec {
    pub voting_start: Option<DateTime<Utc>>,
    pub voting_end: Option<DateTime<Utc>>,
}

#[post("/elections/<id>/publish", data = "<window>")]
pub async fn publish(
    token: AuthToken<Admin>,
    id: Id,
    window: Option<Json<PublishSpec>>,
    db: &State<Database>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    token.require(Capability::ManageElections)?;

    if let Some(window) = window {
        let window = window.into_inner();
        let mut set = doc! {};
        if let Some(start) = window.voting_start {
            set.insert("voting_start", bson::DateTime::from_chrono(start));
        }
        if let Some(end) = window.voting_end {
            set.insert("voting_end", bson::DateTime::from_chrono(end));
        }
        if !set.is_empty() {
            let updated = Coll::<Election>::from_db(db)
                .update_one(
                    doc! { "_id": id, "state": ElectionState::Draft },
                    doc! { "$set": set },
                    None,
                )
                .await?;
            if updated.matched_count == 0 {
                return Err(Error::state(
                    "The voting window can only be set while the election is a draft",
                ));
            }
        }
    }

    let election = election::transition(
        db,
        id,
        ElectionState::Published,
        Performer::Admin(token.id),
        correlation.to_string(),
    )
    .await?;
    Ok(Json(election.into()))
}

/// Response to an open request: either the election opened, or the window
/// has not started and the open is now scheduled.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OpenResponse {
    Opened { election: ElectionDescription },
    Scheduled { open_at: DateTime<Utc> },
}

#[post("/elections/<id>/open")]
pub async fn open(
    token: AuthToken<Admin>,
    id: Id,
    db: &State<Database>,
    config: &State<Config>,
    scheduler: &State<crate::scheduler::ElectionScheduler>,
    correlation: &CorrelationId,
) -> Result<Json<OpenResponse>> {
    token.require(Capability::ManageElections)?;

    let outcome = election::open_election(
        db,
        config,
        scheduler.courier(),
        id,
        Performer::Admin(token.id),
        correlation.to_string(),
    )
    .await?;

    match outcome {
        OpenOutcome::Opened(election) => {
            if let Some((_, end)) = election.window() {
                scheduler.schedule_close(election.id, end).await;
            }
            Ok(Json(OpenResponse::Opened {
                election: election.into(),
            }))
        }
        OpenOutcome::Deferred(open_at) => {
            scheduler.schedule_open(id, open_at).await;
            Ok(Json(OpenResponse::Scheduled { open_at }))
        }
    }
}

#[post("/elections/<id>/pause")]
pub async fn pause(
    token: AuthToken<Admin>,
    id: Id,
    db: &State<Database>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    token.require(Capability::ManageElections)?;
    transition_to(db, id, ElectionState::Paused, &token, correlation).await
}

#[post("/elections/<id>/resume")]
pub async fn resume(
    token: AuthToken<Admin>,
    id: Id,
    db: &State<Database>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    token.require(Capability::ManageElections)?;
    transition_to(db, id, ElectionState::Open, &token, correlation).await
}

#[post("/elections/<id>/close")]
pub async fn close(
    token: AuthToken<Admin>,
    id: Id,
    db: &State<Database>,
    scheduler: &State<crate::scheduler::ElectionScheduler>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    token.require(Capability::ManageElections)?;
    let response = transition_to(db, id, ElectionState::Closed, &token, correlation).await?;
    // The automatic close at window end has nothing left to do.
    scheduler.cancel(id).await;
    Ok(response)
}

#[post("/elections/<id>/archive")]
pub async fn archive(
    token: AuthToken<Admin>,
    id: Id,
    db: &State<Database>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    token.require(Capability::ManageElections)?;
    transition_to(db, id, ElectionState::Archived, &token, correlation).await
}

#[post("/elections/<id>/unarchive")]
pub async fn unarchive(
    token: AuthToken<Admin>,
    id: Id,
    db: &State<Database>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    token.require(Capability::Unarchive)?;
    transition_to(db, id, ElectionState::Closed, &token, correlation).await
}

async fn transition_to(
    db: &Database,
    id: Id,
    to: ElectionState,
    token: &AuthToken<Admin>,
    correlation: &CorrelationId,
) -> Result<Json<ElectionDescription>> {
    let election = election::transition(
        db,
        id,
        to,
        Performer::Admin(token.id),
        correlation.to_string(),
    )
    .await?;
    Ok(Json(election.into()))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeleteRequest {
    pub confirmation: String,
}

#[delete("/elections/<id>", format = "json", data = "<request>")]
pub async fn delete_election(
    token: AuthToken<Admin>,
    id: Id,
    request: Json<DeleteRequest>,
    client: &State<Client>,
    db: &State<Database>,
    scheduler: &State<crate::scheduler::ElectionScheduler>,
    correlation: &CorrelationId,
) -> Result<()> {
    token.require(Capability::HardDelete)?;

    election::hard_delete(
        client,
        db,
        id,
        &request.confirmation,
        Performer::Admin(token.id),
        correlation.to_string(),
    )
    .await?;
    scheduler.cancel(id).await;
    Ok(())
}

#[get("/elections/<id>/audit")]
pub async fn audit_trail(
    token: AuthToken<Admin>,
    id: Id,
    elections: Coll<Election>,
    audit_log: Coll<AuditLogEntry>,
) -> Result<Json<Vec<AuditEntryView>>> {
    token.require(Capability::ViewAuditLog)?;

    // 404 for elections that never existed; deleted ones keep their trail.
    let exists = elections.find_one(id.as_doc(), None).await?.is_some();
    let options = FindOptions::builder()
        .sort(doc! { "timestamp": 1 })
        .build();
    let entries: Vec<AuditLogEntry> = audit_log
        .find(doc! { "election_id": id }, options)
        .await?
        .try_collect()
        .await?;
    if !exists && entries.is_empty() {
        return Err(Error::not_found(format!("No election with id {id}")));
    }
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
