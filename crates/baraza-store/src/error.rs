use thiserror::Error;

/// Store-level failures, classified so the degradation guard can tell
/// "relation not yet deployed" apart from genuine data errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The queried relation has not been created in this environment yet
    /// (incremental schema rollout). Callers behind the degradation guard
    /// treat this as an empty result.
    #[error("relation does not exist: {relation}")]
    MissingRelation { relation: String },

    /// Constraint violation. Always propagated — never softened.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A stored value failed to parse back into its typed form.
    #[error("malformed row: {0}")]
    MalformedRow(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    pub fn is_missing_relation(&self) -> bool {
        matches!(self, Self::MissingRelation { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table") => {
                let relation = msg
                    .rsplit(": ")
                    .next()
                    .unwrap_or(msg)
                    .to_string();
                Self::MissingRelation { relation }
            }
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Constraint(msg.clone().unwrap_or_else(|| code.to_string()))
            }
            _ => Self::Sqlite(err),
        }
    }
}
