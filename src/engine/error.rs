use ulid::Ulid;

/// Coarse classification of a [`LedgerError`], stable for mapping onto
/// transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidRequest,
    AlreadyCancelled,
    AlreadyExists,
    InUse,
    LimitExceeded,
    Journal,
}

#[derive(Debug)]
pub enum LedgerError {
    /// Resource or reservation absent.
    NotFound(Ulid),
    /// Requested window overlaps the given active reservation.
    Conflict(Ulid),
    CapacityExceeded {
        requested: u32,
        remaining: u32,
    },
    InvalidRequest(&'static str),
    AlreadyCancelled(Ulid),
    AlreadyExists(Ulid),
    /// Resource still holds active reservations.
    InUse(Ulid),
    LimitExceeded(&'static str),
    Journal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Conflict(_) | LedgerError::CapacityExceeded { .. } => ErrorKind::Conflict,
            LedgerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            LedgerError::AlreadyCancelled(_) => ErrorKind::AlreadyCancelled,
            LedgerError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            LedgerError::InUse(_) => ErrorKind::InUse,
            LedgerError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            LedgerError::Journal(_) => ErrorKind::Journal,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::AlreadyCancelled => "already_cancelled",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InUse => "in_use",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::Journal => "journal",
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::NotFound(id) => write!(f, "not found: {id}"),
            LedgerError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            LedgerError::CapacityExceeded { requested, remaining } => {
                write!(f, "requested {requested} units but only {remaining} remain")
            }
            LedgerError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            LedgerError::AlreadyCancelled(id) => write!(f, "reservation {id} already cancelled"),
            LedgerError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            LedgerError::InUse(id) => {
                write!(f, "cannot delete resource {id}: has active reservations")
            }
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            LedgerError::Journal(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Journal(e.to_string())
    }
}
