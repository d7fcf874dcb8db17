use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::election::ElectionState;
use crate::model::mongodb::{opt_chrono_datetime_as_bson_datetime, Id};

/// How many answers an election question may carry.
pub const MIN_ANSWERS: usize = 2;
pub const MAX_ANSWERS: usize = 20;

/// A candidate answer to the election question. IDs are assigned at creation,
/// are unique within the election, and are the only way ballots refer to
/// answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: u32,
    pub text: String,
}

/// The counting method of an election, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VotingMethod {
    /// One answer per ballot, plurality count.
    SingleChoice,
    /// Up to `max_selections` distinct answers per ballot, approval-style
    /// count.
    MultiChoice { max_selections: u32 },
    /// Full or partial ranking, tallied by single transferable vote filling
    /// `seats` seats.
    Ranked { seats: u32 },
}

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub question: String,
    pub answers: Vec<Answer>,
    pub method: VotingMethod,
    pub state: ElectionState,
    /// Start of the voting window. Nullable while the election is a draft.
    #[serde(with = "opt_chrono_datetime_as_bson_datetime")]
    pub voting_start: Option<DateTime<Utc>>,
    /// End of the voting window. Nullable while the election is a draft.
    #[serde(with = "opt_chrono_datetime_as_bson_datetime")]
    pub voting_end: Option<DateTime<Utc>>,
    pub created_by: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl ElectionCore {
    /// Check the completeness rules that publishing demands. Drafts may be
    /// arbitrarily incomplete; published elections may not.
    pub fn validate_for_publish(&self) -> Result<(), Error> {
        if self.title.trim().is_empty() {
            return Err(Error::validation("Election title must not be empty"));
        }
        if self.question.trim().is_empty() {
            return Err(Error::validation("Election question must not be empty"));
        }
        if self.answers.len() < MIN_ANSWERS || self.answers.len() > MAX_ANSWERS {
            return Err(Error::validation(format!(
                "Elections must offer between {MIN_ANSWERS} and {MAX_ANSWERS} answers, got {}",
                self.answers.len()
            )));
        }
        match (self.voting_start, self.voting_end) {
            (Some(start), Some(end)) if start < end => {}
            (Some(_), Some(_)) => {
                return Err(Error::validation(
                    "The voting window must start before it ends",
                ));
            }
            _ => {
                return Err(Error::validation(
                    "Published elections need a complete voting window",
                ));
            }
        }
        match self.method {
            VotingMethod::SingleChoice => {}
            VotingMethod::MultiChoice { max_selections } => {
                if max_selections == 0 || max_selections as usize > self.answers.len() {
                    return Err(Error::validation(format!(
                        "max_selections must be between 1 and the number of answers, got \
                         {max_selections}"
                    )));
                }
            }
            VotingMethod::Ranked { seats } => {
                if seats == 0 || seats as usize > self.answers.len() {
                    return Err(Error::validation(format!(
                        "Seat count must be between 1 and the number of answers, got {seats}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Is this election accepting votes right now? Checked before the
    /// credential is even looked at, so a vote against a closed election
    /// reports the state problem rather than anything about the credential.
    pub fn check_accepting_votes(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.state != ElectionState::Open {
            return Err(Error::state(format!(
                "Votes can only be cast in an open election, this one is {:?}",
                self.state
            )));
        }
        // The scheduled close may not have fired yet; the window still binds.
        if let Some((_, end)) = self.window() {
            if now >= end {
                return Err(Error::state("The voting window has ended"));
            }
        }
        Ok(())
    }

    /// Look an answer up by ID.
    pub fn answer(&self, id: u32) -> Option<&Answer> {
        self.answers.iter().find(|a| a.id == id)
    }

    /// The voting window, if fully specified.
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.voting_start.zip(self.voting_end)
    }
}

/// Re-check vote acceptance against a fresh read taken inside the redemption
/// transaction. A close, pause or hard delete can commit between the
/// handler's first state check and the transaction opening; the fresh read
/// makes the state error win over redemption.
pub fn confirm_accepting_votes(
    election: Option<&ElectionCore>,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    match election {
        Some(election) => election.check_accepting_votes(now),
        None => Err(Error::state("This election no longer exists")),
    }
}

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

#[cfg(test)]
pub(crate) mod examples {
    use super::*;
    use chrono::TimeZone;

    /// A well-formed election core for tests, two hours into its window.
    pub fn ballot_box(method: VotingMethod, answers: usize) -> ElectionCore {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        ElectionCore {
            title: "Board election".to_string(),
            question: "Who should sit on the board?".to_string(),
            answers: (1..=answers as u32)
                .map(|id| Answer {
                    id,
                    text: format!("Candidate {id}"),
                })
                .collect(),
            method,
            state: ElectionState::Open,
            voting_start: Some(start),
            voting_end: Some(start + chrono::Duration::days(7)),
            created_by: Id::default(),
            created_at: start - chrono::Duration::days(3),
            updated_at: start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::examples::ballot_box;
    use super::*;

    #[test]
    fn complete_election_publishes() {
        let election = ballot_box(VotingMethod::SingleChoice, 3);
        assert!(election.validate_for_publish().is_ok());
    }

    #[test]
    fn publish_demands_title_question_and_window() {
        let mut election = ballot_box(VotingMethod::SingleChoice, 3);
        election.title = "  ".to_string();
        assert!(election.validate_for_publish().is_err());

        let mut election = ballot_box(VotingMethod::SingleChoice, 3);
        election.question = String::new();
        assert!(election.validate_for_publish().is_err());

        let mut election = ballot_box(VotingMethod::SingleChoice, 3);
        election.voting_end = None;
        assert!(election.validate_for_publish().is_err());

        let mut election = ballot_box(VotingMethod::SingleChoice, 3);
        std::mem::swap(&mut election.voting_start, &mut election.voting_end);
        assert!(election.validate_for_publish().is_err());
    }

    #[test]
    fn closed_elections_do_not_accept_votes() {
        let mut election = ballot_box(VotingMethod::SingleChoice, 3);
        let now = election.voting_start.unwrap() + chrono::Duration::hours(2);
        assert!(election.check_accepting_votes(now).is_ok());

        election.state = ElectionState::Closed;
        assert!(matches!(
            election.check_accepting_votes(now),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn votes_after_window_end_are_rejected_even_while_open() {
        let election = ballot_box(VotingMethod::SingleChoice, 3);
        let late = election.voting_end.unwrap() + chrono::Duration::seconds(1);
        assert!(matches!(
            election.check_accepting_votes(late),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn concurrently_closed_or_deleted_elections_fail_the_recheck() {
        let mut election = ballot_box(VotingMethod::SingleChoice, 3);
        let now = election.voting_start.unwrap() + chrono::Duration::hours(2);
        assert!(confirm_accepting_votes(Some(&election), now).is_ok());

        // Closed between the handler's check and the transaction.
        election.state = ElectionState::Closed;
        assert!(matches!(
            confirm_accepting_votes(Some(&election), now),
            Err(Error::State(_))
        ));

        // Hard-deleted in the same gap.
        assert!(matches!(
            confirm_accepting_votes(None, now),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn publish_bounds_answer_count() {
        let too_few = ballot_box(VotingMethod::SingleChoice, 1);
        assert!(too_few.validate_for_publish().is_err());

        let too_many = ballot_box(VotingMethod::SingleChoice, 21);
        assert!(too_many.validate_for_publish().is_err());
    }

    #[test]
    fn publish_bounds_method_parameters() {
        let wide = ballot_box(VotingMethod::MultiChoice { max_selections: 4 }, 3);
        assert!(wide.validate_for_publish().is_err());

        let zero = ballot_box(VotingMethod::MultiChoice { max_selections: 0 }, 3);
        assert!(zero.validate_for_publish().is_err());

        let over_seated = ballot_box(VotingMethod::Ranked { seats: 5 }, 3);
        assert!(over_seated.validate_for_publish().is_err());

        let fine = ballot_box(VotingMethod::Ranked { seats: 2 }, 3);
        assert!(fine.validate_for_publish().is_ok());
    }
}
