use std::io::Cursor;

use rocket::{
    http::{ContentType, Status},
    response::Responder,
    serde::json::serde_json::json,
    Request, Response,
};
use thiserror::Error;

use crate::logging::CorrelationId;

pub type Result<T> = std::result::Result<T, Error>;

/// The full error taxonomy surfaced by this service. Every user-visible
/// failure is one of these typed kinds; internal errors are logged with the
/// request's correlation id and surfaced without detail.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-shape input, rejected before any transaction opens.
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The operation is invalid for the election's current status.
    #[error("State error: {0}")]
    State(String),
    /// The voting credential has already been redeemed.
    #[error("Credential already used")]
    AlreadyUsed,
    /// The voting credential is past its expiry.
    #[error("Credential expired")]
    Expired,
    /// Duplicate issuance against an existing used or expired credential.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Permission denied: {0}")]
    Permission(String),
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// The wire name of this error kind, stable for callers to localize on.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::State(_) => "STATE_ERROR",
            Self::AlreadyUsed => "ALREADY_USED",
            Self::Expired => "EXPIRED",
            Self::Conflict(_) => "CONFLICT",
            Self::Permission(_) => "PERMISSION_ERROR",
            Self::Db(_) | Self::Jwt(_) => "INTERNAL_ERROR",
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let correlation = req.local_cache(CorrelationId::next);
        let status = match self {
            Self::Validation(_) => Status::UnprocessableEntity,
            Self::NotFound(_) => Status::NotFound,
            Self::State(_) | Self::AlreadyUsed | Self::Conflict(_) => Status::Conflict,
            Self::Expired => Status::Gone,
            Self::Permission(_) => Status::Forbidden,
            Self::Db(_) | Self::Jwt(_) => Status::InternalServerError,
        };
        let message = match &self {
            Self::Db(e) => {
                error!("{correlation} database error: {e}");
                "Internal error".to_string()
            }
            Self::Jwt(e) => {
                error!("{correlation} token error: {e}");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "error": self.kind(),
            "message": message,
        })
        .to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::validation("x").kind(), "VALIDATION_ERROR");
        assert_eq!(Error::not_found("x").kind(), "NOT_FOUND");
        assert_eq!(Error::state("x").kind(), "STATE_ERROR");
        assert_eq!(Error::AlreadyUsed.kind(), "ALREADY_USED");
        assert_eq!(Error::Expired.kind(), "EXPIRED");
        assert_eq!(Error::Conflict("x".into()).kind(), "CONFLICT");
        assert_eq!(Error::Permission("x".into()).kind(), "PERMISSION_ERROR");
    }
}
