use smokelog_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The durable store could not complete the operation. Nothing in the
    /// in-memory projection was changed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Navigation targeted a day id with no session.
    #[error("day not found: {id}")]
    DayNotFound { id: i64 },
}

impl LedgerError {
    /// Short classification string for logging and API bodies.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::DayNotFound { .. } => "day_not_found",
        }
    }

    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::StoreUnavailable(_) => 500,
            Self::DayNotFound { .. } => 404,
        }
    }
}
