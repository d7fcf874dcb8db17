use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// States in the election lifecycle.
///
/// `draft → published → open ⇄ paused → closed → archived`; hard deletion is
/// not a state but a cascading removal, reachable from any state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Still being put together; only admins can see it.
    Draft,
    /// Announced with its question and answers frozen; not yet taking votes.
    Published,
    /// Taking votes.
    Open,
    /// Temporarily not taking votes; existing credentials stay valid.
    Paused,
    /// No longer taking votes.
    Closed,
    /// Hidden from default listings, data retained.
    Archived,
}

impl ElectionState {
    pub const ALL: [ElectionState; 6] = [
        Self::Draft,
        Self::Published,
        Self::Open,
        Self::Paused,
        Self::Closed,
        Self::Archived,
    ];

    /// The transition table. Everything not listed here is a state error.
    /// `Archived → Closed` is the unarchive transition and is restricted to
    /// superadmins at the capability level.
    pub fn can_transition(self, next: ElectionState) -> bool {
        use ElectionState::*;
        matches!(
            (self, next),
            (Draft, Published)
                | (Published, Open)
                | (Open, Paused)
                | (Paused, Open)
                | (Open, Closed)
                | (Paused, Closed)
                | (Closed, Archived)
                | (Archived, Closed)
        )
    }
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ElectionState::*;

    /// Only the transitions in the table succeed; every other pair fails.
    #[test]
    fn transition_table_is_exhaustive() {
        let allowed = [
            (Draft, Published),
            (Published, Open),
            (Open, Paused),
            (Paused, Open),
            (Open, Closed),
            (Paused, Closed),
            (Closed, Archived),
            (Archived, Closed),
        ];

        for from in ElectionState::ALL {
            for to in ElectionState::ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition(to),
                    expected,
                    "transition {from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn no_self_transitions() {
        for state in ElectionState::ALL {
            assert!(!state.can_transition(state));
        }
    }

    #[test]
    fn pause_is_reversible() {
        assert!(Open.can_transition(Paused));
        assert!(Paused.can_transition(Open));
    }
}
