use std::ops::{Deref, DerefMut};

use argon2::Config as Argon2Config;
use mongodb::error::Error as DbError;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::{auth::Rights, mongodb::{Coll, Id}};

pub const DEFAULT_SUPERADMIN_USERNAME: &str = "superadmin";
/// Password of the bootstrap superadmin. Deployment is expected to log in
/// and replace it immediately.
pub const DEFAULT_SUPERADMIN_PASSWORD: &str = "superadmin";

/// Core admin user data, as stored in the database.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    pub username: String,
    pub password_hash: String,
    pub rights: Rights,
}

impl AdminCore {
    /// Check whether the given password is correct. `into_admin` only ever
    /// stores well-formed hashes, but records also arrive by deserialization,
    /// so a malformed hash simply fails to verify.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }
}

/// Raw admin credentials, received from a user. These are never stored
/// directly, since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl AdminCredentials {
    /// Hash into a storable admin record with the given rights.
    /// Fails on empty username or password.
    pub fn into_admin(self, rights: Rights) -> Option<AdminCore> {
        if self.username.is_empty() || self.password.is_empty() {
            return None;
        }
        // 16 bytes of salt is the recommendation for argon2.
        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let password_hash =
            argon2::hash_encoded(self.password.as_bytes(), &salt, &Argon2Config::default())
                .expect("the default argon2 config is valid");
        Some(AdminCore {
            username: self.username,
            password_hash,
            rights,
        })
    }
}

/// An admin user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

impl DerefMut for Admin {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.admin
    }
}

/// Ensure there is at least one administrator, inserting the bootstrap
/// superadmin into an empty collection.
pub async fn ensure_admin_exists(admins: &Coll<AdminCore>) -> Result<(), DbError> {
    let count = admins.count_documents(None, None).await?;
    if count == 0 {
        warn!("No admin users found, creating default superadmin; change its password now");
        let default = AdminCredentials {
            username: DEFAULT_SUPERADMIN_USERNAME.to_string(),
            password: DEFAULT_SUPERADMIN_PASSWORD.to_string(),
        }
        .into_admin(Rights::SuperAdmin)
        .expect("default credentials are non-empty");
        admins.insert_one(default, None).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let admin = AdminCredentials {
            username: "coordinator".to_string(),
            password: "hunter2".to_string(),
        }
        .into_admin(Rights::Admin)
        .unwrap();

        assert!(admin.verify_password("hunter2"));
        assert!(!admin.verify_password("hunter3"));
        assert_eq!(admin.rights, Rights::Admin);
    }

    #[test]
    fn malformed_stored_hash_fails_verification() {
        let admin = AdminCore {
            username: "coordinator".to_string(),
            password_hash: "not an argon2 hash".to_string(),
            rights: Rights::Admin,
        };
        assert!(!admin.verify_password("hunter2"));
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let no_user = AdminCredentials {
            username: "".to_string(),
            password: "pw".to_string(),
        };
        assert!(no_user.into_admin(Rights::Admin).is_none());

        let no_pass = AdminCredentials {
            username: "user".to_string(),
            password: "".to_string(),
        };
        assert!(no_pass.into_admin(Rights::Admin).is_none());
    }
}
