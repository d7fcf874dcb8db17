use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::model::{admin::Admin, mongodb::Id, voter::Voter};

/// A user of our application, having defined rights.
pub trait User {
    /// The minimum rights a token must carry to act as this user type.
    const REQUIRED: Rights;
    /// Get the user's ID.
    fn id(&self) -> Id;
    /// The rights this concrete user actually holds.
    fn rights(&self) -> Rights {
        Self::REQUIRED
    }
}

/// The closed set of privilege levels. Role checks go through
/// [`Rights::permits`]; there is no string comparison anywhere.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
    SuperAdmin = 2,
}

/// Everything a caller can be allowed to do, for the capability matrix.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Capability {
    /// Request a voting credential for oneself.
    RequestCredential,
    /// Create elections and drive the ordinary lifecycle transitions.
    ManageElections,
    /// Read the audit trail.
    ViewAuditLog,
    /// Reverse an archive.
    Unarchive,
    /// Hard-delete an election and everything it owns.
    HardDelete,
}

impl Rights {
    /// Does a token with these rights satisfy a guard requiring `required`?
    pub fn covers(self, required: Rights) -> bool {
        match required {
            // Admins are not voters; credential issuance needs a voter identity.
            Rights::Voter => self == Rights::Voter,
            Rights::Admin => matches!(self, Rights::Admin | Rights::SuperAdmin),
            Rights::SuperAdmin => self == Rights::SuperAdmin,
        }
    }

    /// The capability matrix. Exhaustive on both axes so adding a role or a
    /// capability forces this to be revisited.
    pub fn permits(self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Rights::Voter => matches!(capability, RequestCredential),
            Rights::Admin => matches!(capability, ManageElections | ViewAuditLog),
            Rights::SuperAdmin => {
                matches!(
                    capability,
                    ManageElections | ViewAuditLog | Unarchive | HardDelete
                )
            }
        }
    }
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
                Self::SuperAdmin => "superadmin",
            }
        )
    }
}

impl User for Voter {
    const REQUIRED: Rights = Rights::Voter;

    fn id(&self) -> Id {
        self.id
    }
}

impl User for Admin {
    const REQUIRED: Rights = Rights::Admin;

    fn id(&self) -> Id {
        self.id
    }

    fn rights(&self) -> Rights {
        self.rights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_rights_do_not_cover_voter_guards() {
        assert!(!Rights::Admin.covers(Rights::Voter));
        assert!(!Rights::SuperAdmin.covers(Rights::Voter));
        assert!(Rights::Voter.covers(Rights::Voter));
    }

    #[test]
    fn superadmin_covers_admin_but_not_vice_versa() {
        assert!(Rights::SuperAdmin.covers(Rights::Admin));
        assert!(Rights::Admin.covers(Rights::Admin));
        assert!(!Rights::Admin.covers(Rights::SuperAdmin));
        assert!(!Rights::Voter.covers(Rights::Admin));
    }

    #[test]
    fn capability_matrix() {
        use Capability::*;

        assert!(Rights::Voter.permits(RequestCredential));
        assert!(!Rights::Voter.permits(ManageElections));
        assert!(!Rights::Voter.permits(HardDelete));

        assert!(Rights::Admin.permits(ManageElections));
        assert!(Rights::Admin.permits(ViewAuditLog));
        assert!(!Rights::Admin.permits(Unarchive));
        assert!(!Rights::Admin.permits(HardDelete));
        assert!(!Rights::Admin.permits(RequestCredential));

        assert!(Rights::SuperAdmin.permits(ManageElections));
        assert!(Rights::SuperAdmin.permits(Unarchive));
        assert!(Rights::SuperAdmin.permits(HardDelete));
        assert!(!Rights::SuperAdmin.permits(RequestCredential));
    }
}
