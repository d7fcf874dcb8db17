use std::collections::HashSet;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::election::{ElectionCore, VotingMethod};
use crate::model::mongodb::Id;

/// The voter's choice, shaped by the election's voting method. Validated at
/// the redemption boundary; stored ballots are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BallotAnswer {
    Single { selection: u32 },
    Multi { selections: Vec<u32> },
    /// Most-preferred first. Partial rankings are allowed.
    Ranked { ranking: Vec<u32> },
}

impl BallotAnswer {
    /// Check this answer against the election it claims to answer.
    pub fn validate(&self, election: &ElectionCore) -> Result<(), Error> {
        match (election.method, self) {
            (VotingMethod::SingleChoice, Self::Single { selection }) => {
                check_known(election, &[*selection])
            }
            (VotingMethod::MultiChoice { max_selections }, Self::Multi { selections }) => {
                if selections.is_empty() {
                    return Err(Error::validation("At least one answer must be selected"));
                }
                if selections.len() > max_selections as usize {
                    return Err(Error::validation(format!(
                        "At most {max_selections} answers may be selected, got {}",
                        selections.len()
                    )));
                }
                check_distinct(selections)?;
                check_known(election, selections)
            }
            (VotingMethod::Ranked { .. }, Self::Ranked { ranking }) => {
                if ranking.is_empty() {
                    return Err(Error::validation("A ranking must rank at least one answer"));
                }
                check_distinct(ranking)?;
                check_known(election, ranking)
            }
            (method, _) => Err(Error::validation(format!(
                "Ballot shape does not match the election's {method:?} voting method"
            ))),
        }
    }
}

fn check_known(election: &ElectionCore, ids: &[u32]) -> Result<(), Error> {
    for id in ids {
        if election.answer(*id).is_none() {
            return Err(Error::validation(format!("Unknown answer id {id}")));
        }
    }
    Ok(())
}

fn check_distinct(ids: &[u32]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::validation(format!(
                "Answer id {id} appears more than once"
            )));
        }
    }
    Ok(())
}

/// Core ballot data, as stored in the database. Carries the credential hash
/// it was redeemed with, never any voter identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCore {
    pub election_id: Id,
    pub answer: BallotAnswer,
    pub token_hash: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

/// A ballot from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub ballot: BallotCore,
}

impl Deref for Ballot {
    type Target = BallotCore;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::election::examples::ballot_box;

    #[test]
    fn single_choice_accepts_known_answer_only() {
        let election = ballot_box(VotingMethod::SingleChoice, 3);

        assert!(BallotAnswer::Single { selection: 2 }
            .validate(&election)
            .is_ok());
        assert!(BallotAnswer::Single { selection: 7 }
            .validate(&election)
            .is_err());
    }

    #[test]
    fn ballot_shape_must_match_method() {
        let election = ballot_box(VotingMethod::SingleChoice, 3);

        let err = BallotAnswer::Ranked {
            ranking: vec![1, 2],
        }
        .validate(&election)
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn multi_choice_enforces_bounds_and_distinctness() {
        let election = ballot_box(VotingMethod::MultiChoice { max_selections: 2 }, 4);

        assert!(BallotAnswer::Multi {
            selections: vec![1, 3]
        }
        .validate(&election)
        .is_ok());

        // Empty, too many, duplicated, unknown.
        assert!(BallotAnswer::Multi { selections: vec![] }
            .validate(&election)
            .is_err());
        assert!(BallotAnswer::Multi {
            selections: vec![1, 2, 3]
        }
        .validate(&election)
        .is_err());
        assert!(BallotAnswer::Multi {
            selections: vec![2, 2]
        }
        .validate(&election)
        .is_err());
        assert!(BallotAnswer::Multi {
            selections: vec![1, 9]
        }
        .validate(&election)
        .is_err());
    }

    #[test]
    fn rankings_may_be_partial_but_not_repeated() {
        let election = ballot_box(VotingMethod::Ranked { seats: 2 }, 4);

        assert!(BallotAnswer::Ranked { ranking: vec![3] }
            .validate(&election)
            .is_ok());
        assert!(BallotAnswer::Ranked {
            ranking: vec![4, 1, 2, 3]
        }
        .validate(&election)
        .is_ok());
        assert!(BallotAnswer::Ranked {
            ranking: vec![1, 2, 1]
        }
        .validate(&election)
        .is_err());
        assert!(BallotAnswer::Ranked { ranking: vec![] }
            .validate(&election)
            .is_err());
    }
}
