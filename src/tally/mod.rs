//! Counting ballots.
//!
//! Tallies are pure functions over the immutable ballot set, so recomputing
//! a result is always safe and always agrees with the previous run.

mod stv;

pub use stv::{CandidateVotes, StvRound, StvTally, Weight};

use serde::{Deserialize, Serialize};

use crate::model::{
    ballot::BallotAnswer,
    election::{ElectionCore, VotingMethod},
};

/// Per-answer standing in a plurality or multi-choice count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCount {
    pub answer_id: u32,
    pub text: String,
    pub count: u64,
    /// Share of ballots cast, in percent. Multi-choice percentages can sum
    /// past 100 since one ballot backs several answers.
    pub percentage: f64,
}

/// Ranking statistics for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStat {
    pub answer_id: u32,
    /// Ballots that put this candidate first.
    pub first_place: u64,
    /// Mean position (1-based) over the ballots that ranked this candidate
    /// at all; unranked ballots do not dilute it.
    pub average_rank: Option<f64>,
}

/// The outcome of a count, shaped by the election's voting method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TallyResult {
    Plurality {
        total_ballots: u64,
        counts: Vec<AnswerCount>,
    },
    Ranked {
        total_ballots: u64,
        seats: u32,
        tally: StvTally,
        stats: Vec<CandidateStat>,
    },
}

/// Count the given ballots under the election's voting method. Ballots were
/// validated when cast; any that do not match the method are ignored rather
/// than trusted.
pub fn tally(election: &ElectionCore, ballots: &[BallotAnswer]) -> TallyResult {
    match election.method {
        VotingMethod::SingleChoice => {
            let selections: Vec<&[u32]> = ballots
                .iter()
                .filter_map(|b| match b {
                    BallotAnswer::Single { selection } => Some(std::slice::from_ref(selection)),
                    _ => None,
                })
                .collect();
            plurality(election, &selections)
        }
        VotingMethod::MultiChoice { .. } => {
            let selections: Vec<&[u32]> = ballots
                .iter()
                .filter_map(|b| match b {
                    BallotAnswer::Multi { selections } => Some(selections.as_slice()),
                    _ => None,
                })
                .collect();
            plurality(election, &selections)
        }
        VotingMethod::Ranked { seats } => {
            let rankings: Vec<Vec<u32>> = ballots
                .iter()
                .filter_map(|b| match b {
                    BallotAnswer::Ranked { ranking } => Some(ranking.clone()),
                    _ => None,
                })
                .collect();
            ranked(election, seats, rankings)
        }
    }
}

fn plurality(election: &ElectionCore, ballots: &[&[u32]]) -> TallyResult {
    let total_ballots = ballots.len() as u64;
    let counts = election
        .answers
        .iter()
        .map(|answer| {
            let count = ballots
                .iter()
                .filter(|selections| selections.contains(&answer.id))
                .count() as u64;
            let percentage = if total_ballots == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total_ballots as f64
            };
            AnswerCount {
                answer_id: answer.id,
                text: answer.text.clone(),
                count,
                percentage,
            }
        })
        .collect();
    TallyResult::Plurality {
        total_ballots,
        counts,
    }
}

fn ranked(election: &ElectionCore, seats: u32, rankings: Vec<Vec<u32>>) -> TallyResult {
    let candidates: Vec<u32> = election.answers.iter().map(|a| a.id).collect();
    let tally = stv::run(&candidates, &rankings, seats);

    let stats = candidates
        .iter()
        .map(|&answer_id| {
            let first_place = rankings
                .iter()
                .filter(|r| r.first() == Some(&answer_id))
                .count() as u64;
            let positions: Vec<usize> = rankings
                .iter()
                .filter_map(|r| r.iter().position(|&id| id == answer_id))
                .collect();
            let average_rank = if positions.is_empty() {
                None
            } else {
                Some(positions.iter().map(|p| (p + 1) as f64).sum::<f64>() / positions.len() as f64)
            };
            CandidateStat {
                answer_id,
                first_place,
                average_rank,
            }
        })
        .collect();

    TallyResult::Ranked {
        total_ballots: rankings.len() as u64,
        seats,
        tally,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::election::examples::ballot_box;

    #[test]
    fn plurality_six_four_split() {
        let election = ballot_box(VotingMethod::SingleChoice, 2);
        let mut ballots = Vec::new();
        ballots.extend(std::iter::repeat(BallotAnswer::Single { selection: 1 }).take(6));
        ballots.extend(std::iter::repeat(BallotAnswer::Single { selection: 2 }).take(4));

        let TallyResult::Plurality {
            total_ballots,
            counts,
        } = tally(&election, &ballots)
        else {
            panic!("single choice must tally as plurality");
        };

        assert_eq!(total_ballots, 10);
        assert_eq!(counts[0].count, 6);
        assert_eq!(counts[0].percentage, 60.0);
        assert_eq!(counts[1].count, 4);
        assert_eq!(counts[1].percentage, 40.0);
    }

    #[test]
    fn plurality_of_nothing_is_all_zeroes() {
        let election = ballot_box(VotingMethod::SingleChoice, 3);

        let TallyResult::Plurality {
            total_ballots,
            counts,
        } = tally(&election, &[])
        else {
            panic!("single choice must tally as plurality");
        };

        assert_eq!(total_ballots, 0);
        assert!(counts.iter().all(|c| c.count == 0 && c.percentage == 0.0));
    }

    #[test]
    fn multi_choice_counts_each_selection() {
        let election = ballot_box(VotingMethod::MultiChoice { max_selections: 2 }, 3);
        let ballots = vec![
            BallotAnswer::Multi {
                selections: vec![1, 2],
            },
            BallotAnswer::Multi {
                selections: vec![2],
            },
        ];

        let TallyResult::Plurality { counts, .. } = tally(&election, &ballots) else {
            panic!("multi choice must tally as plurality");
        };

        assert_eq!(counts[0].count, 1);
        assert_eq!(counts[1].count, 2);
        // Both ballots backed answer 2.
        assert_eq!(counts[1].percentage, 100.0);
        assert_eq!(counts[2].count, 0);
    }

    #[test]
    fn ranked_stats_ignore_unranked_ballots() {
        let election = ballot_box(VotingMethod::Ranked { seats: 1 }, 3);
        let ballots = vec![
            BallotAnswer::Ranked {
                ranking: vec![1, 3],
            },
            BallotAnswer::Ranked {
                ranking: vec![3, 1],
            },
            BallotAnswer::Ranked { ranking: vec![1] },
        ];

        let TallyResult::Ranked { stats, .. } = tally(&election, &ballots) else {
            panic!("ranked must tally as ranked");
        };

        let c1 = &stats[0];
        assert_eq!(c1.first_place, 2);
        // Ranked 1st, 2nd and 1st across the three ballots that placed it.
        assert_eq!(c1.average_rank, Some(4.0 / 3.0));

        let c2 = &stats[1];
        assert_eq!(c2.first_place, 0);
        assert_eq!(c2.average_rank, None);
    }

    #[test]
    fn first_place_counts_sum_to_valid_ballots() {
        let election = ballot_box(VotingMethod::Ranked { seats: 2 }, 4);
        let ballots: Vec<BallotAnswer> = vec![
            BallotAnswer::Ranked {
                ranking: vec![2, 1],
            },
            BallotAnswer::Ranked { ranking: vec![4] },
            BallotAnswer::Ranked {
                ranking: vec![2, 3, 4],
            },
            BallotAnswer::Ranked { ranking: vec![1] },
        ];

        let TallyResult::Ranked {
            total_ballots,
            stats,
            ..
        } = tally(&election, &ballots)
        else {
            panic!("ranked must tally as ranked");
        };

        let first_places: u64 = stats.iter().map(|s| s.first_place).sum();
        assert_eq!(first_places, total_ballots);
    }

    #[test]
    fn recounting_gives_identical_results() {
        let election = ballot_box(VotingMethod::Ranked { seats: 2 }, 4);
        let ballots: Vec<BallotAnswer> = (0..20)
            .map(|i| BallotAnswer::Ranked {
                ranking: match i % 4 {
                    0 => vec![1, 2, 3],
                    1 => vec![2, 1],
                    2 => vec![3, 4, 1],
                    _ => vec![4],
                },
            })
            .collect();

        assert_eq!(tally(&election, &ballots), tally(&election, &ballots));
    }
}
