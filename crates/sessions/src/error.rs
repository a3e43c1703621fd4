/// Failures of registry lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session, connect first")]
    NoSession,
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("already logged in")]
    AlreadyAuthenticated,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("tenant not found")]
    TenantNotFound,
    #[error("connection error: {0:#}")]
    Connection(#[source] anyhow::Error),
    #[error("persistence error: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

impl SessionError {
    /// Stable machine-readable reason for API responses.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::NotConnected => "not_connected",
            Self::AlreadyConnected => "already_connected",
            Self::AlreadyAuthenticated => "already_authenticated",
            Self::NotAuthenticated => "not_authenticated",
            Self::TenantNotFound => "tenant_not_found",
            Self::Connection(_) => "connection_error",
            Self::Persistence(_) => "persistence_error",
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_keep_context_in_message() {
        let err = SessionError::Connection(
            anyhow::anyhow!("socket closed").context("failed to connect"),
        );
        assert_eq!(err.reason(), "connection_error");
        assert_eq!(
            err.to_string(),
            "connection error: failed to connect: socket closed"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn precondition_reasons_are_stable() {
        assert_eq!(SessionError::NoSession.reason(), "no_session");
        assert_eq!(SessionError::NotConnected.reason(), "not_connected");
        assert_eq!(SessionError::AlreadyConnected.reason(), "already_connected");
        assert_eq!(
            SessionError::AlreadyAuthenticated.reason(),
            "already_authenticated"
        );
    }
}
