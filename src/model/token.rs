//! One-time voting credentials.
//!
//! The server hands a voter the credential plaintext exactly once and keeps
//! only a keyed hash. Ballots are linked to the hash, never to the voter, so
//! the issuance record and the ballot record cannot be joined into a
//! "who voted for what".

use std::ops::Deref;

use chrono::{DateTime, Utc};
use data_encoding::{BASE32_NOPAD, HEXLOWER};
use hmac::{Hmac, Mac};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime};
use mongodb::error::Error as DbError;
use rand::RngCore;
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::Config;
use crate::error::Error;
use crate::model::{
    election::{Election, ElectionState},
    mongodb::{Coll, Id},
    voter::Voter,
};

type HmacSha256 = Hmac<Sha256>;

/// Entropy of a credential. 32 bytes is 256 bits, far beyond guessing range.
pub const CREDENTIAL_BYTES: usize = 32;

/// Generate a fresh credential plaintext: 32 random bytes, base32 without
/// padding so it survives being read out over the phone.
pub fn generate_credential() -> String {
    let mut bytes = [0_u8; CREDENTIAL_BYTES];
    // `thread_rng` is a CSPRNG.
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// The stored form of a credential: HMAC-SHA256 under the configured secret,
/// hex-encoded. The secret acts as a server-side salt, so a leaked collection
/// cannot be brute-forced offline against the credential alphabet.
pub fn credential_hash(credential: &str, config: &Config) -> String {
    let mut mac = HmacSha256::new_from_slice(config.credential_secret())
        .expect("HMAC accepts keys of any length");
    mac.update(credential.as_bytes());
    HEXLOWER.encode(&mac.finalize().into_bytes())
}

/// Core voting credential data, as stored in the database. The plaintext is
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCore {
    pub election_id: Id,
    pub voter_id: Id,
    pub token_hash: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl TokenCore {
    /// Create a credential record. The expiry is `now + token_ttl`, clamped
    /// to the end of the voting window.
    pub fn new(
        election_id: Id,
        voter_id: Id,
        token_hash: String,
        now: DateTime<Utc>,
        config: &Config,
        window_end: DateTime<Utc>,
    ) -> Self {
        let expires_at = std::cmp::min(now + config.token_ttl(), window_end);
        Self {
            election_id,
            voter_id,
            token_hash,
            issued_at: now,
            expires_at,
            used: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Live means still redeemable: neither used nor expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }

    /// Why a credential cannot be redeemed, if it cannot. A used credential
    /// reports as used even once it has also expired: it bought a ballot
    /// that still counts, and expiry of a spent credential means nothing.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.used {
            return Err(Error::AlreadyUsed);
        }
        if self.is_expired(now) {
            return Err(Error::Expired);
        }
        Ok(())
    }
}

/// A voting credential from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingToken {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub token: TokenCore,
}

impl Deref for VotingToken {
    type Target = TokenCore;

    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

/// Credential metadata safe to show the holder again. The plaintext is
/// deliberately absent; it cannot be recovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub expires_at: DateTime<Utc>,
}

impl From<&TokenCore> for TokenMetadata {
    fn from(token: &TokenCore) -> Self {
        Self {
            expires_at: token.expires_at,
        }
    }
}

/// Result of an issuance request.
pub enum Issuance {
    /// A credential was just minted; this is the only time the plaintext
    /// exists outside the caller's hands.
    Fresh {
        credential: String,
        metadata: TokenMetadata,
    },
    /// The voter already holds a live credential.
    Existing(TokenMetadata),
}

/// Delivery channel for bulk-issued credential plaintexts. In production
/// this is the external messaging collaborator; the default implementation
/// only logs volume.
pub trait CredentialCourier: Send + Sync {
    fn deliver(&self, member_ref: &str, credential: &str, expires_at: DateTime<Utc>);
}

pub struct LogCourier;

impl CredentialCourier for LogCourier {
    fn deliver(&self, member_ref: &str, _credential: &str, expires_at: DateTime<Utc>) {
        debug!("Issued credential for member {member_ref}, expires {expires_at}");
    }
}

/// Decide an issuance request from whatever record the voter already holds:
/// a live credential comes back as metadata only, a used or expired one is a
/// conflict (the voter had their chance with it), and no record at all means
/// a fresh credential should be minted.
fn existing_disposition(
    existing: Option<&TokenCore>,
    now: DateTime<Utc>,
) -> Result<Option<TokenMetadata>, Error> {
    match existing {
        Some(token) if token.used => Err(Error::Conflict(
            "This credential has already been redeemed".to_string(),
        )),
        Some(token) if token.is_expired(now) => Err(Error::Conflict(
            "This voter's credential has expired".to_string(),
        )),
        Some(token) => Ok(Some(TokenMetadata::from(token))),
        None => Ok(None),
    }
}

/// Issue a credential to a single voter on request.
///
/// The disposition of any existing record is [`existing_disposition`].
/// Concurrent requests collapse onto the unique `(election_id, voter_id)`
/// index and the loser re-reads the surviving record.
pub async fn issue_for_voter(
    tokens: &Coll<VotingToken>,
    config: &Config,
    election: &Election,
    voter: &Voter,
    now: DateTime<Utc>,
) -> Result<Issuance, Error> {
    if !matches!(
        election.state,
        ElectionState::Published | ElectionState::Open
    ) {
        return Err(Error::state(format!(
            "Credentials are only issued for published or open elections, not {:?}",
            election.state
        )));
    }
    if !voter.active {
        return Err(Error::Permission(
            "Only active members may request voting credentials".to_string(),
        ));
    }
    // Published elections always carry a complete window.
    let (_, window_end) = election
        .window()
        .ok_or_else(|| Error::state("Election has no voting window"))?;

    loop {
        let existing = tokens
            .find_one(
                doc! {
                    "election_id": election.id,
                    "voter_id": voter.id,
                },
                None,
            )
            .await?;
        if let Some(metadata) = existing_disposition(existing.as_deref(), now)? {
            return Ok(Issuance::Existing(metadata));
        }

        let credential = generate_credential();
        let token = TokenCore::new(
            election.id,
            voter.id,
            credential_hash(&credential, config),
            now,
            config,
            window_end,
        );
        match tokens.insert_one(&VotingToken {
            id: Id::new(),
            token: token.clone(),
        }, None).await {
            Ok(_) => {
                return Ok(Issuance::Fresh {
                    credential,
                    metadata: TokenMetadata::from(&token),
                });
            }
            // Lost an issuance race; the surviving record wins.
            Err(e) if is_duplicate_key(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Issue credentials for every active voter without one, delivering the
/// plaintexts through the courier. Voters with any existing credential record
/// are skipped, which makes re-running this idempotent.
///
/// Returns the number of credentials issued.
pub async fn bulk_issue(
    tokens: &Coll<VotingToken>,
    voters: &Coll<Voter>,
    config: &Config,
    courier: &dyn CredentialCourier,
    election: &Election,
    now: DateTime<Utc>,
) -> Result<u64, Error> {
    let (_, window_end) = election
        .window()
        .ok_or_else(|| Error::state("Election has no voting window"))?;

    let mut issued = 0;
    let mut cursor = voters.find(doc! {"active": true}, None).await?;
    while let Some(voter) = cursor.try_next().await? {
        let existing = tokens
            .find_one(
                doc! {
                    "election_id": election.id,
                    "voter_id": voter.id,
                },
                None,
            )
            .await?;
        if existing.is_some() {
            continue;
        }

        let credential = generate_credential();
        let token = TokenCore::new(
            election.id,
            voter.id,
            credential_hash(&credential, config),
            now,
            config,
            window_end,
        );
        let expires_at = token.expires_at;
        match tokens.insert_one(&VotingToken {
            id: Id::new(),
            token,
        }, None).await {
            Ok(_) => {
                courier.deliver(&voter.member_ref, &credential, expires_at);
                issued += 1;
            }
            // A concurrent single-voter request beat us to it.
            Err(e) if is_duplicate_key(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    info!(
        "Issued {issued} voting credentials for election {}",
        election.id
    );
    Ok(issued)
}

fn is_duplicate_key(err: &DbError) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn credentials_are_base32_of_32_bytes() {
        let credential = generate_credential();
        let bytes = BASE32_NOPAD.decode(credential.as_bytes()).unwrap();
        assert_eq!(bytes.len(), CREDENTIAL_BYTES);

        // Vanishingly unlikely to collide.
        assert_ne!(credential, generate_credential());
    }

    #[test]
    fn hashing_is_stable_and_keyed() {
        let config = Config::for_testing();
        let credential = generate_credential();

        let first = credential_hash(&credential, &config);
        let second = credential_hash(&credential, &config);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64); // SHA256 in hex

        let other = credential_hash(&generate_credential(), &config);
        assert_ne!(first, other);
    }

    #[test]
    fn expiry_is_clamped_to_window_end() {
        let config = Config::for_testing();
        let now = Utc::now();

        let far_end = now + Duration::days(30);
        let token = TokenCore::new(Id::new(), Id::new(), "h".into(), now, &config, far_end);
        assert_eq!(token.expires_at, now + config.token_ttl());

        let near_end = now + Duration::hours(2);
        let token = TokenCore::new(Id::new(), Id::new(), "h".into(), now, &config, near_end);
        assert_eq!(token.expires_at, near_end);
    }

    fn live_token(now: DateTime<Utc>) -> TokenCore {
        let config = Config::for_testing();
        TokenCore::new(
            Id::new(),
            Id::new(),
            "h".into(),
            now,
            &config,
            now + Duration::days(7),
        )
    }

    #[test]
    fn repeat_issuance_returns_metadata_for_a_live_credential() {
        let now = Utc::now();
        let token = live_token(now);

        let metadata = existing_disposition(Some(&token), now)
            .unwrap()
            .expect("a live credential has metadata");
        assert_eq!(metadata.expires_at, token.expires_at);
    }

    #[test]
    fn repeat_issuance_conflicts_on_a_spent_or_expired_credential() {
        let now = Utc::now();

        let mut token = live_token(now);
        token.used = true;
        assert!(matches!(
            existing_disposition(Some(&token), now),
            Err(Error::Conflict(_))
        ));

        let token = live_token(now);
        let later = token.expires_at + Duration::seconds(1);
        assert!(matches!(
            existing_disposition(Some(&token), later),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn first_issuance_mints_a_fresh_credential() {
        assert!(existing_disposition(None, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn a_spent_credential_reports_used_even_after_expiry() {
        let now = Utc::now();
        let mut token = live_token(now);

        assert!(token.check_redeemable(now).is_ok());

        token.used = true;
        let after_expiry = token.expires_at + Duration::hours(1);
        assert!(matches!(
            token.check_redeemable(after_expiry),
            Err(Error::AlreadyUsed)
        ));

        token.used = false;
        assert!(matches!(
            token.check_redeemable(after_expiry),
            Err(Error::Expired)
        ));
    }

    #[test]
    fn liveness_requires_unused_and_unexpired() {
        let config = Config::for_testing();
        let now = Utc::now();
        let mut token = TokenCore::new(
            Id::new(),
            Id::new(),
            "h".into(),
            now,
            &config,
            now + Duration::days(7),
        );

        assert!(token.is_live(now));
        assert!(!token.is_live(now + Duration::days(2)));

        token.used = true;
        assert!(!token.is_live(now));
    }
}
