use crate::model::{AppointmentId, CompanyId, RequestId};

/// What an error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Company(CompanyId),
    Appointment(AppointmentId),
    Request(RequestId),
    Service(String),
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Company(id) => write!(f, "company {id}"),
            Entity::Appointment(id) => write!(f, "appointment {id}"),
            Entity::Request(id) => write!(f, "request {id}"),
            Entity::Service(id) => write!(f, "service {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or misaligned time bounds.
    InvalidRange(&'static str),
    RangeOutOfBounds {
        start: usize,
        end: usize,
        slot_count: usize,
    },
    /// Store-level compare-and-set failure: the listed cells were not in an expected status.
    Conflict(Vec<usize>),
    /// Lifecycle-level face of `Conflict`.
    SlotUnavailable(Vec<usize>),
    NotFound(Entity),
    InvalidTransition {
        entity: Entity,
        from: &'static str,
        action: &'static str,
    },
    LimitExceeded(&'static str),
    /// Malformed caller-supplied data such as contact details.
    InvalidInput(String),
    InvalidConfig(String),
    Persistence(String),
}

impl EngineError {
    /// Stable machine-readable name, used on the wire and as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::RangeOutOfBounds { .. } => "range_out_of_bounds",
            EngineError::Conflict(_) => "conflict",
            EngineError::SlotUnavailable(_) => "slot_unavailable",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::Persistence(_) => "persistence",
        }
    }

    /// Cells that blocked the operation, if it failed on contention.
    pub fn conflicting_indices(&self) -> Option<&[usize]> {
        match self {
            EngineError::Conflict(ix) | EngineError::SlotUnavailable(ix) => Some(ix),
            _ => None,
        }
    }

    pub(crate) fn into_unavailable(self) -> Self {
        match self {
            EngineError::Conflict(ix) => EngineError::SlotUnavailable(ix),
            other => other,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange(msg) => write!(f, "invalid range: {msg}"),
            EngineError::RangeOutOfBounds {
                start,
                end,
                slot_count,
            } => write!(
                f,
                "range [{start}, {end}) outside slot grid of {slot_count} slots"
            ),
            EngineError::Conflict(ix) => write!(f, "conflict at slots {ix:?}"),
            EngineError::SlotUnavailable(ix) => write!(f, "slots {ix:?} are not available"),
            EngineError::NotFound(entity) => write!(f, "not found: {entity}"),
            EngineError::InvalidTransition {
                entity,
                from,
                action,
            } => write!(f, "cannot {action} {entity} in status {from}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            EngineError::Persistence(msg) => write!(f, "persistence error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
