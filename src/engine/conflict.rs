use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::occupancy::{room_fit, RoomFit};
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    if stay.is_inverted() {
        return Err(EngineError::InvertedStay(*stay));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Invalid(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(text: &Option<String>) -> Result<(), EngineError> {
    if let Some(t) = text
        && t.len() > MAX_TEXT_LEN
    {
        return Err(EngineError::LimitExceeded("text too long"));
    }
    Ok(())
}

pub(crate) fn validate_capacity(capacity: u32) -> Result<(), EngineError> {
    if capacity == 0 {
        return Err(EngineError::Invalid("capacity must be at least 1".into()));
    }
    if capacity > MAX_ROOM_CAPACITY {
        return Err(EngineError::LimitExceeded("room capacity too large"));
    }
    Ok(())
}

pub(crate) fn validate_amount(amount_cents: Option<i64>) -> Result<(), EngineError> {
    if let Some(a) = amount_cents
        && !(0..=MAX_AMOUNT_CENTS).contains(&a)
    {
        return Err(EngineError::LimitExceeded("amount out of range"));
    }
    Ok(())
}

/// Capacity check for putting `participant_id` with `stay` into the room.
/// The participant's own entry, if any, is not counted.
pub(crate) fn check_room_fit(
    rs: &RoomState,
    participant_id: Ulid,
    stay: &Stay,
) -> Result<RoomFit, EngineError> {
    let others = rs.stays_except(participant_id);
    let fit = room_fit(rs.room.capacity, &others, stay);
    if !fit.has_space {
        return Err(EngineError::RoomFull {
            room_id: rs.room.id,
            capacity: rs.room.capacity,
            overlapping: fit.overlapping,
        });
    }
    Ok(fit)
}
