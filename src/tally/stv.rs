//! Single transferable vote.
//!
//! All round arithmetic is integral over micro-votes so recounts are exactly
//! reproducible; floats only ever appear in presentation code.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// A vote weight in micro-votes (10^-6 of a ballot).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Weight(u64);

impl Weight {
    pub const SCALE: u64 = 1_000_000;
    pub const ZERO: Weight = Weight(0);

    pub fn from_ballots(count: u64) -> Self {
        Self(count * Self::SCALE)
    }

    pub fn micro_votes(self) -> u64 {
        self.0
    }

    /// `self * numerator / denominator`, rounding down. Used for the Gregory
    /// surplus fraction; the widening to u128 makes overflow unreachable for
    /// any realistic electorate.
    pub fn scale_by(self, numerator: Weight, denominator: Weight) -> Weight {
        debug_assert!(denominator.0 > 0);
        Self((u128::from(self.0) * u128::from(numerator.0) / u128::from(denominator.0)) as u64)
    }

    /// Lossy conversion for presentation only.
    pub fn as_votes(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl Add for Weight {
    type Output = Weight;

    fn add(self, rhs: Weight) -> Weight {
        Weight(self.0 + rhs.0)
    }
}

impl AddAssign for Weight {
    fn add_assign(&mut self, rhs: Weight) {
        self.0 += rhs.0;
    }
}

impl Sub for Weight {
    type Output = Weight;

    fn sub(self, rhs: Weight) -> Weight {
        Weight(self.0 - rhs.0)
    }
}

impl Sum for Weight {
    fn sum<I: Iterator<Item = Weight>>(iter: I) -> Weight {
        iter.fold(Weight::ZERO, Add::add)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

/// A candidate's standing within one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVotes {
    pub answer_id: u32,
    pub votes: Weight,
}

/// One round of the count: the tallies of the still-hopeful candidates
/// before any transfer, plus what the round decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StvRound {
    pub round: u32,
    pub tallies: Vec<CandidateVotes>,
    /// Candidates elected this round, in election order.
    pub elected: Vec<u32>,
    pub eliminated: Option<u32>,
    /// Weight sitting on ballots with no remaining hopeful preference.
    pub exhausted: Weight,
}

/// The full count: quota, winners in election order, and the round log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StvTally {
    pub quota: Weight,
    pub winners: Vec<u32>,
    pub rounds: Vec<StvRound>,
}

/// A ballot during the count: a preference list, a cursor, and the weight it
/// currently carries.
struct TrackedBallot {
    prefs: Vec<u32>,
    pos: usize,
    weight: Weight,
}

impl TrackedBallot {
    fn current(&self) -> Option<u32> {
        self.prefs.get(self.pos).copied()
    }

    /// Move the cursor to the next preference still in the running.
    fn advance(&mut self, hopeful: &BTreeSet<u32>) {
        while let Some(candidate) = self.current() {
            if hopeful.contains(&candidate) {
                return;
            }
            self.pos += 1;
        }
    }
}

/// Run the count over validated rankings (most-preferred first, all answer
/// ids known and distinct within each ballot).
///
/// With one seat this degenerates to instant-runoff: the Droop quota is a
/// strict majority and transfers only ever happen by elimination.
pub fn run(candidates: &[u32], ballots: &[Vec<u32>], seats: u32) -> StvTally {
    let valid = ballots.len() as u64;
    // Droop quota: the smallest total that only `seats` candidates can reach.
    let quota = Weight::from_ballots(valid / (u64::from(seats) + 1) + 1);

    // Raw first-preference ballot counts, fixed for the whole count; both
    // tie-break rules consult these.
    let first_prefs: BTreeMap<u32, u64> = candidates
        .iter()
        .map(|&id| {
            let count = ballots.iter().filter(|b| b.first() == Some(&id)).count() as u64;
            (id, count)
        })
        .collect();

    let mut hopeful: BTreeSet<u32> = candidates.iter().copied().collect();
    let mut tracked: Vec<TrackedBallot> = ballots
        .iter()
        .map(|prefs| {
            let mut ballot = TrackedBallot {
                prefs: prefs.clone(),
                pos: 0,
                weight: Weight::from_ballots(1),
            };
            ballot.advance(&hopeful);
            ballot
        })
        .collect();

    let mut winners: Vec<u32> = Vec::new();
    let mut rounds: Vec<StvRound> = Vec::new();

    while winners.len() < seats as usize && !hopeful.is_empty() {
        let round = rounds.len() as u32 + 1;

        let mut tallies: BTreeMap<u32, Weight> =
            hopeful.iter().map(|&id| (id, Weight::ZERO)).collect();
        let mut exhausted = Weight::ZERO;
        for ballot in &tracked {
            match ballot.current() {
                Some(candidate) => *tallies.get_mut(&candidate).expect(
                    "advanced ballots only ever sit on hopeful candidates",
                ) += ballot.weight,
                None => exhausted += ballot.weight,
            }
        }

        let snapshot: Vec<CandidateVotes> = tallies
            .iter()
            .map(|(&answer_id, &votes)| CandidateVotes { answer_id, votes })
            .collect();

        // Election order: strongest tally first, then the candidate with
        // more first preferences, then the lower answer id.
        let elect_order = |a: &u32, b: &u32| {
            tallies[b]
                .cmp(&tallies[a])
                .then(first_prefs[b].cmp(&first_prefs[a]))
                .then(a.cmp(b))
        };

        let seats_left = seats as usize - winners.len();
        if hopeful.len() <= seats_left {
            // Everyone still standing takes a seat.
            let mut rest: Vec<u32> = hopeful.iter().copied().collect();
            rest.sort_by(elect_order);
            winners.extend(&rest);
            rounds.push(StvRound {
                round,
                tallies: snapshot,
                elected: rest,
                eliminated: None,
                exhausted,
            });
            break;
        }

        let mut reached: Vec<u32> = hopeful
            .iter()
            .copied()
            .filter(|id| tallies[id] >= quota)
            .collect();
        if !reached.is_empty() {
            reached.sort_by(elect_order);
            for &id in &reached {
                hopeful.remove(&id);
                winners.push(id);
            }
            // Gregory transfers: every ballot of an elected candidate moves
            // on, carrying `weight * surplus / total`.
            for &id in &reached {
                let total = tallies[&id];
                let surplus = total - quota;
                for ballot in &mut tracked {
                    if ballot.current() == Some(id) {
                        ballot.weight = ballot.weight.scale_by(surplus, total);
                        ballot.advance(&hopeful);
                    }
                }
            }
            rounds.push(StvRound {
                round,
                tallies: snapshot,
                elected: reached,
                eliminated: None,
                exhausted,
            });
            continue;
        }

        // Nobody reached the quota: eliminate the weakest candidate and
        // transfer their ballots at full current weight. Ties break towards
        // the fewer first preferences, then the higher answer id.
        let loser = hopeful
            .iter()
            .copied()
            .min_by(|a, b| {
                tallies[a]
                    .cmp(&tallies[b])
                    .then(first_prefs[a].cmp(&first_prefs[b]))
                    .then(b.cmp(a))
            })
            .expect("the hopeful set is non-empty inside the loop");
        hopeful.remove(&loser);
        for ballot in &mut tracked {
            if ballot.current() == Some(loser) {
                ballot.advance(&hopeful);
            }
        }
        rounds.push(StvRound {
            round,
            tallies: snapshot,
            elected: Vec::new(),
            eliminated: Some(loser),
            exhausted,
        });
    }

    StvTally {
        quota,
        winners,
        rounds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANDIDATES: [u32; 4] = [1, 2, 3, 4];

    /// 9 ballots, 3 seats, quota 3. Candidate 1 is elected with a surplus of
    /// one vote spread over four ballots, candidate 2 reaches the quota
    /// exactly on the transfer, candidate 4 is eliminated and candidate 3
    /// takes the last seat.
    fn nine_ballots() -> Vec<Vec<u32>> {
        let mut ballots = Vec::new();
        ballots.extend(std::iter::repeat(vec![1, 2]).take(4));
        ballots.extend(std::iter::repeat(vec![2, 3]).take(2));
        ballots.extend(std::iter::repeat(vec![3, 4]).take(2));
        ballots.push(vec![4, 3]);
        ballots
    }

    #[test]
    fn surplus_transfer_fills_three_seats() {
        let tally = run(&CANDIDATES, &nine_ballots(), 3);

        assert_eq!(tally.quota, Weight::from_ballots(3));
        assert_eq!(tally.winners, vec![1, 2, 3]);
        assert_eq!(tally.rounds.len(), 4);

        // Round 1: candidate 1 clears the quota with 4 full ballots.
        assert_eq!(tally.rounds[0].elected, vec![1]);

        // Round 2: each of those ballots carried 0.25 votes on, putting
        // candidate 2 at exactly 3.
        let round_two = &tally.rounds[1];
        assert_eq!(round_two.elected, vec![2]);
        let c2 = round_two
            .tallies
            .iter()
            .find(|t| t.answer_id == 2)
            .unwrap();
        assert_eq!(c2.votes, Weight::from_ballots(3));

        // Round 3: nobody reaches the quota, candidate 4 goes out.
        assert_eq!(tally.rounds[2].eliminated, Some(4));

        // Candidate 2 was elected with zero surplus, so every ballot that
        // moved past it carries zero weight and nothing exhausts yet.
        assert_eq!(tally.rounds[2].exhausted, Weight::ZERO);
    }

    #[test]
    fn single_seat_is_instant_runoff() {
        let ballots = vec![
            vec![1],
            vec![1],
            vec![1],
            vec![2, 3],
            vec![2, 3],
            vec![3],
            vec![3],
        ];
        let tally = run(&[1, 2, 3], &ballots, 1);

        // Majority quota of 4 is never reached; the win comes from the field
        // thinning out.
        assert_eq!(tally.quota, Weight::from_ballots(4));
        assert_eq!(tally.winners, vec![1]);
        // First elimination is a 2-vote, 2-first-pref tie between candidates
        // 2 and 3; the higher id goes.
        assert_eq!(tally.rounds[0].eliminated, Some(3));
    }

    #[test]
    fn simultaneous_quota_orders_by_answer_id_last() {
        let ballots = vec![
            vec![1],
            vec![1],
            vec![1],
            vec![2],
            vec![2],
            vec![2],
        ];
        let tally = run(&[1, 2, 3], &ballots, 2);

        assert_eq!(tally.quota, Weight::from_ballots(3));
        assert_eq!(tally.rounds.len(), 1);
        // Equal tallies and equal first preferences: lower id first.
        assert_eq!(tally.winners, vec![1, 2]);
    }

    #[test]
    fn first_round_weight_is_conserved() {
        let ballots = nine_ballots();
        let tally = run(&CANDIDATES, &ballots, 3);

        let first_round = &tally.rounds[0];
        let total: Weight = first_round.tallies.iter().map(|t| t.votes).sum();
        assert_eq!(
            total + first_round.exhausted,
            Weight::from_ballots(ballots.len() as u64)
        );
    }

    #[test]
    fn fills_exactly_min_of_seats_and_candidates() {
        for seats in 1..=4 {
            let tally = run(&CANDIDATES, &nine_ballots(), seats);
            assert_eq!(tally.winners.len(), (seats as usize).min(CANDIDATES.len()));
        }
    }

    #[test]
    fn droop_quota_formula() {
        for (ballots, seats, expected) in [(9, 3, 3), (10, 1, 6), (100, 4, 21), (7, 2, 3)] {
            let rankings: Vec<Vec<u32>> = (0..ballots).map(|_| vec![1]).collect();
            let tally = run(&[1, 2], &rankings, seats);
            assert_eq!(
                tally.quota,
                Weight::from_ballots(expected),
                "quota for {ballots} ballots, {seats} seats"
            );
        }
    }

    #[test]
    fn recounts_are_identical() {
        let ballots = nine_ballots();
        assert_eq!(run(&CANDIDATES, &ballots, 3), run(&CANDIDATES, &ballots, 3));
    }
}
