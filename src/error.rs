use std::fmt;

/// Flat classification of an [`EngineError`], the shape the client surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidTransition,
    NotAvailable,
    AlreadyReserved,
    AlreadyAssigned,
    Duplicate,
    AlreadyFinalized,
    InvalidInput,
    StorageUnavailable,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("listing is not available")]
    NotAvailable,
    #[error("listing is already reserved by another trade")]
    AlreadyReserved,
    #[error("trade already has an active inspection assignment")]
    AlreadyAssigned,
    #[error("rating already submitted for this trade")]
    Duplicate,
    #[error("{0} is already finalized")]
    AlreadyFinalized(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("stored record could not be encoded or decoded: {0}")]
    Codec(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::NotAvailable => ErrorKind::NotAvailable,
            EngineError::AlreadyReserved => ErrorKind::AlreadyReserved,
            EngineError::AlreadyAssigned => ErrorKind::AlreadyAssigned,
            EngineError::Duplicate => ErrorKind::Duplicate,
            EngineError::AlreadyFinalized(_) => ErrorKind::AlreadyFinalized,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            // an unreadable record is a storage failure, never a rule violation
            EngineError::StorageUnavailable(_) | EngineError::Codec(_) => {
                ErrorKind::StorageUnavailable
            }
        }
    }

    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        EngineError::Forbidden(reason.into())
    }

    pub(crate) fn invalid_transition(
        entity: &'static str,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        EngineError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        tracing::error!(error = %err, "ledger storage failure");
        EngineError::StorageUnavailable(err.to_string())
    }
}

impl From<minicbor::decode::Error> for EngineError {
    fn from(err: minicbor::decode::Error) -> Self {
        EngineError::Codec(err.to_string())
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for EngineError {
    fn from(err: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        EngineError::Codec(err.to_string())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::InvalidTransition => "InvalidTransition",
            ErrorKind::NotAvailable => "NotAvailable",
            ErrorKind::AlreadyReserved => "AlreadyReserved",
            ErrorKind::AlreadyAssigned => "AlreadyAssigned",
            ErrorKind::Duplicate => "Duplicate",
            ErrorKind::AlreadyFinalized => "AlreadyFinalized",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::StorageUnavailable => "StorageUnavailable",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_failures_surface_as_storage_unavailable() {
        let err = EngineError::Codec("truncated".into());
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = EngineError::invalid_transition("trade", "REQUESTED", "SHIPPED");
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(err.to_string(), "trade cannot move from REQUESTED to SHIPPED");
    }
}
