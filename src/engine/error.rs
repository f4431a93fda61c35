use ulid::Ulid;

use crate::model::Stay;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateYear(i32),
    DuplicateName(String),
    /// No bed left in the room for the whole of the requested stay.
    RoomFull {
        room_id: Ulid,
        capacity: u32,
        overlapping: usize,
    },
    /// Entity belongs to another event than the one it is linked with.
    WrongEvent {
        id: Ulid,
        event_id: Ulid,
    },
    InvertedStay(Stay),
    InvalidDates(&'static str),
    AlreadyMember {
        workshop_id: Ulid,
        participant_id: Ulid,
    },
    NotMember {
        workshop_id: Ulid,
        participant_id: Ulid,
    },
    WorkshopRoomTaken(Ulid),
    Invalid(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateYear(year) => {
                write!(f, "an event for {year} already exists")
            }
            EngineError::DuplicateName(name) => write!(f, "name already in use: {name}"),
            EngineError::RoomFull {
                room_id,
                capacity,
                overlapping,
            } => write!(
                f,
                "room {room_id} is full for this period: {overlapping} of {capacity} beds taken"
            ),
            EngineError::WrongEvent { id, event_id } => {
                write!(f, "{id} does not belong to event {event_id}")
            }
            EngineError::InvertedStay(stay) => {
                write!(f, "arrival after departure: {stay}")
            }
            EngineError::InvalidDates(msg) => write!(f, "invalid dates: {msg}"),
            EngineError::AlreadyMember {
                workshop_id,
                participant_id,
            } => write!(f, "{participant_id} is already in workshop {workshop_id}"),
            EngineError::NotMember {
                workshop_id,
                participant_id,
            } => write!(f, "{participant_id} is not in workshop {workshop_id}"),
            EngineError::WorkshopRoomTaken(id) => {
                write!(f, "workshop room {id} is used by another workshop")
            }
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
