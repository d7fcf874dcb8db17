use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::election::{Answer, Election, ElectionCore, ElectionState, VotingMethod};
use crate::model::mongodb::Id;

/// An election as admins create it via the API. Drafts may be incomplete;
/// the completeness rules only bite at publish time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElectionSpec {
    pub title: String,
    pub question: String,
    pub answers: Vec<String>,
    pub method: VotingMethod,
    pub voting_start: Option<DateTime<Utc>>,
    pub voting_end: Option<DateTime<Utc>>,
}

impl ElectionSpec {
    /// Turn the spec into a draft record, assigning answer IDs in order.
    pub fn into_draft(self, created_by: Id, now: DateTime<Utc>) -> ElectionCore {
        ElectionCore {
            title: self.title,
            question: self.question,
            answers: self
                .answers
                .into_iter()
                .zip(1..)
                .map(|(text, id)| Answer { id, text })
                .collect(),
            method: self.method,
            state: ElectionState::Draft,
            voting_start: self.voting_start,
            voting_end: self.voting_end,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An election as the API presents it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: Id,
    pub title: String,
    pub question: String,
    pub answers: Vec<Answer>,
    pub method: VotingMethod,
    pub state: ElectionState,
    pub voting_start: Option<DateTime<Utc>>,
    pub voting_end: Option<DateTime<Utc>>,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        Self {
            id: election.id,
            title: election.election.title,
            question: election.election.question,
            answers: election.election.answers,
            method: election.election.method,
            state: election.election.state,
            voting_start: election.election.voting_start,
            voting_end: election.election.voting_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_conversion_assigns_sequential_answer_ids() {
        let spec = ElectionSpec {
            title: "AGM ballot".to_string(),
            question: "Accept the annual accounts?".to_string(),
            answers: vec!["Yes".to_string(), "No".to_string()],
            method: VotingMethod::SingleChoice,
            voting_start: None,
            voting_end: None,
        };

        let now = Utc::now();
        let draft = spec.into_draft(Id::default(), now);

        assert_eq!(draft.state, ElectionState::Draft);
        assert_eq!(
            draft.answers,
            vec![
                Answer {
                    id: 1,
                    text: "Yes".to_string()
                },
                Answer {
                    id: 2,
                    text: "No".to_string()
                },
            ]
        );
        assert_eq!(draft.created_at, now);
    }
}
