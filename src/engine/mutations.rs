use std::collections::HashSet;

use tracing::{debug, info};
use ulid::Ulid;

use crate::import::{self, ImportMode};
use crate::limits::*;
use crate::model::*;

use super::conflict::*;
use super::occupancy::RoomFit;
use super::{Engine, EngineError};

fn validate_event(event: &Event) -> Result<(), EngineError> {
    validate_name(&event.name, "event name")?;
    validate_name(&event.location, "location")?;
    if !(MIN_EVENT_YEAR..=MAX_EVENT_YEAR).contains(&event.year) {
        return Err(EngineError::LimitExceeded("year out of range"));
    }
    if event.start_date > event.end_date {
        return Err(EngineError::InvalidDates("event ends before it starts"));
    }
    validate_amount(event.fee_cents)
}

fn validate_room(room: &Room) -> Result<(), EngineError> {
    validate_name(&room.name, "room name")?;
    validate_capacity(room.capacity)?;
    validate_text(&room.floor)?;
    validate_text(&room.description)
}

fn validate_participant(p: &Participant) -> Result<(), EngineError> {
    validate_name(&p.first_name, "first name")?;
    validate_name(&p.last_name, "last name")?;
    for field in [
        &p.email,
        &p.phone,
        &p.street,
        &p.house_number,
        &p.postal_code,
        &p.city,
        &p.notes,
    ] {
        validate_text(field)?;
    }
    validate_stay(&p.stay)?;
    validate_amount(p.payment.amount_cents)
}

impl Engine {
    // ── Events ───────────────────────────────────────────

    pub async fn create_event(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        validate_event(&event)?;
        if self.events.len() >= MAX_EVENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many events"));
        }
        if self.events.contains_key(&event.id) {
            return Err(EngineError::AlreadyExists(event.id));
        }
        if self.events.iter().any(|e| e.year == event.year) {
            return Err(EngineError::DuplicateYear(event.year));
        }
        info!("event {} created: {} {}", event.id, event.name, event.year);
        self.persist(&Change::EventCreated(event)).await
    }

    pub async fn update_event(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        validate_event(&event)?;
        if !self.events.contains_key(&event.id) {
            return Err(EngineError::NotFound(event.id));
        }
        if self
            .events
            .iter()
            .any(|e| e.year == event.year && e.id != event.id)
        {
            return Err(EngineError::DuplicateYear(event.year));
        }
        self.persist(&Change::EventUpdated(event)).await
    }

    /// Delete an event with all its rooms, participants and workshops.
    pub async fn delete_event(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        let _catalog = self.catalog.lock().await;
        if !self.events.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let mut locks = self.lock_rooms(self.rooms_of_event(id)).await;
        self.persist_and_apply(&Change::EventDeleted { id }, &mut locks)
            .await?;
        info!("event {id} deleted");
        Ok(())
    }

    // ── Rooms ────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        validate_room(&room)?;
        if !self.events.contains_key(&room.event_id) {
            return Err(EngineError::NotFound(room.event_id));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        if self.rooms_of_event(room.event_id).len() >= MAX_ROOMS_PER_EVENT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        self.persist(&Change::RoomCreated(room)).await
    }

    /// Rename or resize a room. Lowering the capacity below the current
    /// occupancy is allowed; the room then simply has no free beds.
    pub async fn update_room(&self, room: Room) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        validate_room(&room)?;
        let mut locks = self.lock_rooms([room.id]).await;
        let current = locks.get(room.id).ok_or(EngineError::NotFound(room.id))?;
        if current.room.event_id != room.event_id {
            return Err(EngineError::WrongEvent {
                id: room.id,
                event_id: room.event_id,
            });
        }
        self.persist_and_apply(&Change::RoomUpdated(room), &mut locks)
            .await
    }

    /// Delete a room. Its occupants become unassigned.
    pub async fn delete_room(&self, id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        let mut locks = self.lock_rooms([id]).await;
        let unassigned = locks
            .get(id)
            .ok_or(EngineError::NotFound(id))?
            .occupants
            .len();
        self.persist_and_apply(&Change::RoomDeleted { id }, &mut locks)
            .await?;
        debug!("room {id} deleted, {unassigned} participants unassigned");
        Ok(unassigned)
    }

    // ── Participants ─────────────────────────────────────

    pub async fn register_participant(&self, participant: Participant) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        self.insert_participant(participant).await
    }

    /// Registration without taking the gate or the placement lock.
    /// A room given at registration goes through the same capacity check
    /// as a later assignment.
    pub(super) async fn insert_participant(&self, participant: Participant) -> Result<(), EngineError> {
        validate_participant(&participant)?;
        if !self.events.contains_key(&participant.event_id) {
            return Err(EngineError::NotFound(participant.event_id));
        }
        if self.participants.contains_key(&participant.id) {
            return Err(EngineError::AlreadyExists(participant.id));
        }
        let count = self
            .participants
            .iter()
            .filter(|p| p.event_id == participant.event_id)
            .count();
        if count >= MAX_PARTICIPANTS_PER_EVENT {
            return Err(EngineError::LimitExceeded("too many participants"));
        }

        let mut locks = self.lock_rooms(participant.room_id).await;
        if let Some(room_id) = participant.room_id {
            let rs = locks.get(room_id).ok_or(EngineError::NotFound(room_id))?;
            if rs.room.event_id != participant.event_id {
                return Err(EngineError::WrongEvent {
                    id: room_id,
                    event_id: participant.event_id,
                });
            }
            check_room_fit(rs, participant.id, &participant.stay)?;
        }
        self.persist_and_apply(&Change::ParticipantRegistered(participant), &mut locks)
            .await
    }

    /// Update a participant's own fields. A new stay is checked against the
    /// participant's current room.
    pub async fn update_participant(
        &self,
        id: Ulid,
        patch: &ParticipantPatch,
    ) -> Result<Participant, EngineError> {
        self.update_participant_and_room(id, patch, None).await
    }

    /// Patch a participant and optionally move them in one step.
    ///
    /// `room` is `None` to stay put, `Some(None)` to leave the room and
    /// `Some(Some(id))` to move. The patched stay is checked against the
    /// room the participant ends up in, under the write locks of both
    /// rooms. Nothing is logged unless every check passes.
    pub async fn update_participant_and_room(
        &self,
        id: Ulid,
        patch: &ParticipantPatch,
        room: Option<Option<Ulid>>,
    ) -> Result<Participant, EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        let current = self.participant(id)?;
        let mut updated = patch.apply_to(current.clone());
        validate_participant(&updated)?;

        let from = current.room_id;
        let to = room.unwrap_or(from);
        let mut locks = self.lock_rooms(from.into_iter().chain(to)).await;
        if let Some(target) = to
            && (to != from || updated.stay != current.stay)
        {
            let rs = locks.get(target).ok_or(EngineError::NotFound(target))?;
            if rs.room.event_id != updated.event_id {
                return Err(EngineError::WrongEvent {
                    id: target,
                    event_id: updated.event_id,
                });
            }
            check_room_fit(rs, id, &updated.stay)?;
        }

        if updated != current {
            self.persist_and_apply(&Change::ParticipantUpdated(updated.clone()), &mut locks)
                .await?;
        }
        if to != from {
            let change = Change::RoomAssigned {
                participant_id: id,
                from,
                to,
            };
            self.persist_and_apply(&change, &mut locks).await?;
            debug!("participant {id} moved from {from:?} to {to:?}");
        }
        updated.room_id = to;
        Ok(updated)
    }

    pub async fn delete_participant(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        self.remove_participant(id).await
    }

    pub(super) async fn remove_participant(&self, id: Ulid) -> Result<(), EngineError> {
        let current = self.participant(id)?;
        let mut locks = self.lock_rooms(current.room_id).await;
        self.persist_and_apply(&Change::ParticipantDeleted { id }, &mut locks)
            .await
    }

    /// Move a participant into a room, or out of any room with `None`.
    ///
    /// The capacity check and the write happen under the write locks of
    /// both rooms, so two assignments can never share the last bed.
    /// Returns the fit in the target room, or `None` when nothing moved
    /// into a room (unassigning, or assigning to the current room).
    pub async fn assign_room(
        &self,
        participant_id: Ulid,
        room_id: Option<Ulid>,
    ) -> Result<Option<RoomFit>, EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        let participant = self.participant(participant_id)?;
        let from = participant.room_id;
        if from == room_id {
            return Ok(None);
        }

        let mut locks = self.lock_rooms(from.into_iter().chain(room_id)).await;
        let fit = match room_id {
            Some(target) => {
                let rs = locks.get(target).ok_or(EngineError::NotFound(target))?;
                if rs.room.event_id != participant.event_id {
                    return Err(EngineError::WrongEvent {
                        id: target,
                        event_id: participant.event_id,
                    });
                }
                Some(check_room_fit(rs, participant_id, &participant.stay)?)
            }
            None => None,
        };

        let change = Change::RoomAssigned {
            participant_id,
            from,
            to: room_id,
        };
        self.persist_and_apply(&change, &mut locks).await?;
        debug!("participant {participant_id} moved from {from:?} to {room_id:?}");
        Ok(fit)
    }

    // ── Payment & check-in ───────────────────────────────

    pub async fn mark_paid(
        &self,
        participant_id: Ulid,
        amount_cents: Option<i64>,
        method: Option<PaymentMethod>,
    ) -> Result<Payment, EngineError> {
        let _gate = self.gate.read().await;
        validate_amount(amount_cents)?;
        self.participant(participant_id)?;
        let payment = Payment {
            has_paid: true,
            amount_cents,
            method,
            paid_at: Some(now_ms()),
        };
        self.persist(&Change::PaymentRecorded {
            participant_id,
            payment: payment.clone(),
        })
        .await?;
        Ok(payment)
    }

    /// Clears amount, method and timestamp along with the paid flag.
    pub async fn mark_unpaid(&self, participant_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        self.participant(participant_id)?;
        self.persist(&Change::PaymentRecorded {
            participant_id,
            payment: Payment::default(),
        })
        .await
    }

    pub async fn check_in(&self, participant_id: Ulid) -> Result<Ms, EngineError> {
        let _gate = self.gate.read().await;
        self.participant(participant_id)?;
        let at = now_ms();
        self.persist(&Change::CheckInChanged {
            participant_id,
            at: Some(at),
        })
        .await?;
        Ok(at)
    }

    pub async fn check_out(&self, participant_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        self.participant(participant_id)?;
        self.persist(&Change::CheckInChanged {
            participant_id,
            at: None,
        })
        .await
    }

    // ── CSV import ───────────────────────────────────────

    /// Import participants from CSV text.
    ///
    /// Rows whose first and last name already exist in the event are
    /// skipped in `Add` mode. `Replace` removes every participant of the
    /// event first. Rows that fail to parse are reported, not imported.
    pub async fn import_participants(
        &self,
        event_id: Ulid,
        csv: &str,
        mode: ImportMode,
    ) -> Result<ImportReport, EngineError> {
        if csv.len() > MAX_IMPORT_BYTES {
            return Err(EngineError::LimitExceeded("import too large"));
        }
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        let event = self.event(event_id)?;
        let parsed = import::parse_participants(csv, &event);
        if parsed.rows.len() > MAX_IMPORT_ROWS {
            return Err(EngineError::LimitExceeded("too many import rows"));
        }

        if mode == ImportMode::Replace {
            let existing: Vec<Ulid> = self
                .participants
                .iter()
                .filter(|p| p.event_id == event_id)
                .map(|p| p.id)
                .collect();
            for id in existing {
                self.remove_participant(id).await?;
            }
        }

        let mut known: HashSet<String> = self
            .participants
            .iter()
            .filter(|p| p.event_id == event_id)
            .map(|p| name_key(&p.first_name, &p.last_name))
            .collect();

        let mut report = ImportReport {
            errors: parsed.errors,
            ..Default::default()
        };
        for row in parsed.rows {
            let key = name_key(&row.first_name, &row.last_name);
            if known.contains(&key) {
                report.skipped += 1;
                continue;
            }
            let mut p = Participant::new(Ulid::new(), event_id, row.first_name, row.last_name);
            p.age = row.age;
            p.city = row.city;
            p.role = row.role;
            p.stay = row.stay;
            let name = p.full_name();
            match self.insert_participant(p).await {
                Ok(()) => {
                    known.insert(key);
                    report.added += 1;
                }
                Err(EngineError::WalError(e)) => return Err(EngineError::WalError(e)),
                Err(e) => report.errors.push(format!("Zeile {}: {name}: {e}", row.line)),
            }
        }
        info!(
            "import into event {event_id}: {} added, {} skipped, {} errors",
            report.added,
            report.skipped,
            report.errors.len()
        );
        Ok(report)
    }
}

fn name_key(first: &str, last: &str) -> String {
    format!("{} {}", first.trim().to_lowercase(), last.trim().to_lowercase())
}
