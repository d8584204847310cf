use thiserror::Error;

/// Convenience alias for `Result<T, PlanError>`.
pub type PlanResult<T> = Result<T, PlanError>;

/// Error classification for the caller.
///
/// - `UserError`: malformed or unsupported statement shape, surfaced verbatim
/// - `InternalBug`: a state that should be unreachable by construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    InternalBug,
}

/// RPC-style status code attached to every planning failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    FailedPrecondition,
    InvalidArgument,
    Unimplemented,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Errors produced while parsing a statement or building its plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("syntax error: {0}")]
    Parse(String),

    #[error("table {0} not found")]
    UnknownTable(String),

    #[error("symbol {0} not found")]
    UnknownColumn(String),

    #[error("ambiguous symbol reference: {0}")]
    AmbiguousColumn(String),

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    InvalidArgument(String),

    /// MySQL ER_CANT_USE_OPTION_HERE.
    #[error("Incorrect usage/placement of '{0}'")]
    IncorrectPlacement(&'static str),

    #[error("no keyspace in vschema")]
    NoKeyspace,

    #[error("keyspace {0} not found in vschema")]
    KeyspaceNotFound(String),

    #[error("vschema error: {0}")]
    VSchema(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl PlanError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        PlanError::Unsupported(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        PlanError::InternalInvariant(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PlanError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            PlanError::Parse(_)
            | PlanError::AmbiguousColumn(_)
            | PlanError::DuplicateSymbol(_)
            | PlanError::InvalidArgument(_)
            | PlanError::IncorrectPlacement(_)
            | PlanError::VSchema(_) => ErrorCode::InvalidArgument,
            PlanError::Unsupported(_) => ErrorCode::Unimplemented,
            PlanError::UnknownTable(_)
            | PlanError::UnknownColumn(_)
            | PlanError::NoKeyspace
            | PlanError::KeyspaceNotFound(_) => ErrorCode::NotFound,
            PlanError::InternalInvariant(_) => ErrorCode::Internal,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::InternalInvariant(_) => ErrorKind::InternalBug,
            _ => ErrorKind::UserError,
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::UserError
    }

    /// MySQL error number reported to the client.
    pub fn mysql_errno(&self) -> u16 {
        match self {
            PlanError::Parse(_) => 1064,
            PlanError::UnknownTable(_) => 1146,
            PlanError::UnknownColumn(_) => 1054,
            PlanError::AmbiguousColumn(_) => 1052,
            PlanError::DuplicateSymbol(_) => 1066,
            PlanError::IncorrectPlacement(_) => 1234,
            PlanError::Unsupported(_) => 1235,
            _ => 1105,
        }
    }

    /// SQLSTATE reported alongside [`PlanError::mysql_errno`].
    pub fn sqlstate(&self) -> &'static str {
        match self {
            PlanError::UnknownTable(_) => "42S02",
            PlanError::UnknownColumn(_) => "42S22",
            PlanError::AmbiguousColumn(_) => "23000",
            PlanError::Parse(_)
            | PlanError::DuplicateSymbol(_)
            | PlanError::IncorrectPlacement(_)
            | PlanError::Unsupported(_) => "42000",
            _ => "HY000",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_display_has_prefix() {
        let err = PlanError::unsupported("cross-shard correlated subquery");
        assert_eq!(err.to_string(), "unsupported: cross-shard correlated subquery");
        assert_eq!(err.code(), ErrorCode::Unimplemented);
    }

    #[test]
    fn test_incorrect_placement_mysql_mapping() {
        let err = PlanError::IncorrectPlacement("SQL_CALC_FOUND_ROWS");
        assert_eq!(
            err.to_string(),
            "Incorrect usage/placement of 'SQL_CALC_FOUND_ROWS'"
        );
        assert_eq!(err.mysql_errno(), 1234);
        assert_eq!(err.sqlstate(), "42000");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_invariant_is_internal_bug() {
        let err = PlanError::invariant("route is an atomic node");
        assert_eq!(err.kind(), ErrorKind::InternalBug);
        assert!(!err.is_user_error());
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.code().as_str(), "INTERNAL");
    }

    #[test]
    fn test_lookup_failures_are_not_found() {
        assert_eq!(PlanError::UnknownTable("t".into()).code(), ErrorCode::NotFound);
        assert_eq!(PlanError::UnknownColumn("c".into()).code(), ErrorCode::NotFound);
        assert_eq!(PlanError::NoKeyspace.code(), ErrorCode::NotFound);
        assert_eq!(PlanError::UnknownColumn("c".into()).sqlstate(), "42S22");
    }

    #[test]
    fn test_precondition_and_invalid_argument_codes() {
        let lock = PlanError::FailedPrecondition("get_lock('a', 1) allowed only with dual".into());
        assert_eq!(lock.code(), ErrorCode::FailedPrecondition);
        assert!(lock.is_user_error());
        let schema = PlanError::InvalidArgument("two predicates for table_schema not supported".into());
        assert_eq!(schema.code(), ErrorCode::InvalidArgument);
        assert_eq!(schema.mysql_errno(), 1105);
    }
}
