use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::*;
use super::queries::sort_by_name;
use super::{Engine, EngineError};

/// Rooms created by `seed_workshop_rooms`: WS1 to WS9.
const SEED_ROOM_COUNT: u32 = 9;

fn validate_workshop_room(room: &WorkshopRoom) -> Result<(), EngineError> {
    validate_name(&room.name, "workshop room name")?;
    validate_text(&room.description)?;
    if let Some(capacity) = room.capacity {
        validate_capacity(capacity)?;
    }
    Ok(())
}

fn validate_workshop(workshop: &Workshop) -> Result<(), EngineError> {
    validate_name(&workshop.name, "workshop name")?;
    validate_text(&workshop.description)?;
    validate_capacity(workshop.max_participants)
}

impl Engine {
    // ── Workshop rooms ───────────────────────────────────

    fn workshop_room_name_taken(&self, event_id: Ulid, name: &str, except: Ulid) -> bool {
        let name = name.trim().to_lowercase();
        self.workshop_rooms
            .iter()
            .any(|r| r.event_id == event_id && r.id != except && r.name.trim().to_lowercase() == name)
    }

    fn workshop_rooms_of_event(&self, event_id: Ulid) -> Vec<WorkshopRoom> {
        let mut rooms: Vec<WorkshopRoom> = self
            .workshop_rooms
            .iter()
            .filter(|r| r.event_id == event_id)
            .map(|r| r.value().clone())
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Create without taking locks. Callers hold the gate and the catalog.
    async fn insert_workshop_room(&self, room: WorkshopRoom) -> Result<(), EngineError> {
        validate_workshop_room(&room)?;
        if !self.events.contains_key(&room.event_id) {
            return Err(EngineError::NotFound(room.event_id));
        }
        if self.workshop_rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        if self.workshop_room_name_taken(room.event_id, &room.name, room.id) {
            return Err(EngineError::DuplicateName(room.name));
        }
        if self.workshop_rooms_of_event(room.event_id).len() >= MAX_WORKSHOPS_PER_EVENT {
            return Err(EngineError::LimitExceeded("too many workshop rooms"));
        }
        self.persist(&Change::WorkshopRoomCreated(room)).await
    }

    pub async fn create_workshop_room(&self, room: WorkshopRoom) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        self.insert_workshop_room(room).await
    }

    pub async fn update_workshop_room(&self, room: WorkshopRoom) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        validate_workshop_room(&room)?;
        let current = self.workshop_room(room.id)?;
        if current.event_id != room.event_id {
            return Err(EngineError::WrongEvent {
                id: room.id,
                event_id: room.event_id,
            });
        }
        if self.workshop_room_name_taken(room.event_id, &room.name, room.id) {
            return Err(EngineError::DuplicateName(room.name));
        }
        self.persist(&Change::WorkshopRoomUpdated(room)).await
    }

    /// Delete a workshop room. A workshop using it keeps running without a room.
    pub async fn delete_workshop_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        self.workshop_room(id)?;
        self.persist(&Change::WorkshopRoomDeleted { id }).await
    }

    pub fn workshop_room(&self, id: Ulid) -> Result<WorkshopRoom, EngineError> {
        self.workshop_rooms
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    pub fn list_workshop_rooms(&self, event_id: Ulid) -> Vec<WorkshopRoom> {
        self.workshop_rooms_of_event(event_id)
    }

    /// Workshop rooms not used by any workshop. The room of `keep_for`
    /// stays in the list so an edit form can show the current choice.
    pub fn available_workshop_rooms(
        &self,
        event_id: Ulid,
        keep_for: Option<Ulid>,
    ) -> Vec<WorkshopRoom> {
        let mut rooms = self.workshop_rooms_of_event(event_id);
        rooms.retain(|room| {
            !self.workshops.iter().any(|ws| {
                ws.workshop.workshop_room_id == Some(room.id) && Some(ws.workshop.id) != keep_for
            })
        });
        rooms
    }

    /// Create the standard rooms WS1..WS9, skipping names that already exist.
    pub async fn seed_workshop_rooms(&self, event_id: Ulid) -> Result<BulkReport, EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        self.event(event_id)?;
        let mut report = BulkReport::default();
        for i in 1..=SEED_ROOM_COUNT {
            let room = WorkshopRoom {
                id: Ulid::new(),
                event_id,
                name: format!("WS{i}"),
                description: Some(format!("Workshop-Raum {i}")),
                capacity: None,
            };
            match self.insert_workshop_room(room).await {
                Ok(()) => report.added += 1,
                Err(EngineError::DuplicateName(_)) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }
        debug!(
            "seeded workshop rooms for event {event_id}: {} added, {} skipped",
            report.added, report.skipped
        );
        Ok(report)
    }

    // ── Workshops ────────────────────────────────────────

    /// The workshop room must belong to the same event and not be used by
    /// another workshop.
    fn check_workshop_room(&self, workshop: &Workshop) -> Result<(), EngineError> {
        let Some(room_id) = workshop.workshop_room_id else {
            return Ok(());
        };
        let room = self.workshop_room(room_id)?;
        if room.event_id != workshop.event_id {
            return Err(EngineError::WrongEvent {
                id: room_id,
                event_id: workshop.event_id,
            });
        }
        let taken = self.workshops.iter().any(|ws| {
            ws.workshop.id != workshop.id && ws.workshop.workshop_room_id == Some(room_id)
        });
        if taken {
            return Err(EngineError::WorkshopRoomTaken(room_id));
        }
        Ok(())
    }

    pub async fn create_workshop(&self, workshop: Workshop) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        validate_workshop(&workshop)?;
        if !self.events.contains_key(&workshop.event_id) {
            return Err(EngineError::NotFound(workshop.event_id));
        }
        if self.workshops.contains_key(&workshop.id) {
            return Err(EngineError::AlreadyExists(workshop.id));
        }
        let count = self
            .workshops
            .iter()
            .filter(|ws| ws.workshop.event_id == workshop.event_id)
            .count();
        if count >= MAX_WORKSHOPS_PER_EVENT {
            return Err(EngineError::LimitExceeded("too many workshops"));
        }
        self.check_workshop_room(&workshop)?;
        info!("workshop {} created: {}", workshop.id, workshop.name);
        self.persist(&Change::WorkshopCreated(workshop)).await
    }

    /// Update name, description, size or room. Leaders and members stay.
    pub async fn update_workshop(&self, workshop: Workshop) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        validate_workshop(&workshop)?;
        let current = self.workshop(workshop.id)?;
        if current.workshop.event_id != workshop.event_id {
            return Err(EngineError::WrongEvent {
                id: workshop.id,
                event_id: workshop.event_id,
            });
        }
        self.check_workshop_room(&workshop)?;
        self.persist(&Change::WorkshopUpdated(workshop)).await
    }

    pub async fn delete_workshop(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        self.workshop(id)?;
        self.persist(&Change::WorkshopDeleted { id }).await
    }

    pub fn workshop(&self, id: Ulid) -> Result<WorkshopState, EngineError> {
        self.workshops
            .get(&id)
            .map(|ws| ws.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Workshops of an event by name, with leaders and members.
    pub fn list_workshops(&self, event_id: Ulid) -> Vec<WorkshopState> {
        let mut list: Vec<WorkshopState> = self
            .workshops
            .iter()
            .filter(|ws| ws.workshop.event_id == event_id)
            .map(|ws| ws.value().clone())
            .collect();
        list.sort_by(|a, b| a.workshop.name.cmp(&b.workshop.name));
        list
    }

    // ── Leaders & members ────────────────────────────────

    /// Workshop and participant must exist and share an event.
    fn workshop_and_participant(
        &self,
        workshop_id: Ulid,
        participant_id: Ulid,
    ) -> Result<(WorkshopState, Participant), EngineError> {
        let ws = self.workshop(workshop_id)?;
        let p = self.participant(participant_id)?;
        if p.event_id != ws.workshop.event_id {
            return Err(EngineError::WrongEvent {
                id: participant_id,
                event_id: ws.workshop.event_id,
            });
        }
        Ok((ws, p))
    }

    pub async fn add_leader(&self, workshop_id: Ulid, participant_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        let (ws, _) = self.workshop_and_participant(workshop_id, participant_id)?;
        if ws.leaders.contains(&participant_id) {
            return Err(EngineError::AlreadyMember {
                workshop_id,
                participant_id,
            });
        }
        self.persist(&Change::LeaderAdded {
            workshop_id,
            participant_id,
        })
        .await
    }

    pub async fn remove_leader(&self, workshop_id: Ulid, participant_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        if !self.workshop(workshop_id)?.leaders.contains(&participant_id) {
            return Err(EngineError::NotMember {
                workshop_id,
                participant_id,
            });
        }
        self.persist(&Change::LeaderRemoved {
            workshop_id,
            participant_id,
        })
        .await
    }

    /// Add without taking locks. Callers hold the gate and placement.
    async fn insert_member(
        &self,
        workshop_id: Ulid,
        participant_id: Ulid,
        is_helper: bool,
    ) -> Result<(), EngineError> {
        let (ws, _) = self.workshop_and_participant(workshop_id, participant_id)?;
        if ws.has_member(participant_id) {
            return Err(EngineError::AlreadyMember {
                workshop_id,
                participant_id,
            });
        }
        self.persist(&Change::MemberAdded {
            workshop_id,
            member: Member {
                participant_id,
                is_helper,
            },
        })
        .await
    }

    /// Add a member. `max_participants` is not enforced here; a full
    /// workshop is only reported as such.
    pub async fn add_member(
        &self,
        workshop_id: Ulid,
        participant_id: Ulid,
        is_helper: bool,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        self.insert_member(workshop_id, participant_id, is_helper).await
    }

    /// Add several members at once. Existing members and participants that
    /// cannot join are skipped.
    pub async fn add_members(
        &self,
        workshop_id: Ulid,
        participant_ids: &[Ulid],
        is_helper: bool,
    ) -> Result<BulkReport, EngineError> {
        if participant_ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("too many members in one batch"));
        }
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        self.workshop(workshop_id)?;
        let mut report = BulkReport::default();
        for &participant_id in participant_ids {
            match self.insert_member(workshop_id, participant_id, is_helper).await {
                Ok(()) => report.added += 1,
                Err(EngineError::WalError(e)) => return Err(EngineError::WalError(e)),
                Err(_) => report.skipped += 1,
            }
        }
        Ok(report)
    }

    pub async fn remove_member(&self, workshop_id: Ulid, participant_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        if !self.workshop(workshop_id)?.has_member(participant_id) {
            return Err(EngineError::NotMember {
                workshop_id,
                participant_id,
            });
        }
        self.persist(&Change::MemberRemoved {
            workshop_id,
            participant_id,
        })
        .await
    }

    /// Mark a member as the one looking after the workshop's ABI leaders.
    pub async fn set_member_helper(
        &self,
        workshop_id: Ulid,
        participant_id: Ulid,
        is_helper: bool,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        self.write_member_helper(workshop_id, participant_id, |_| is_helper)
            .await
            .map(|_| ())
    }

    /// Flip the helper flag and return the new value.
    pub async fn toggle_member_helper(
        &self,
        workshop_id: Ulid,
        participant_id: Ulid,
    ) -> Result<bool, EngineError> {
        let _gate = self.gate.read().await;
        let _placement = self.placement.lock().await;
        self.write_member_helper(workshop_id, participant_id, |current| !current)
            .await
    }

    async fn write_member_helper(
        &self,
        workshop_id: Ulid,
        participant_id: Ulid,
        next: impl FnOnce(bool) -> bool,
    ) -> Result<bool, EngineError> {
        let member = self
            .workshop(workshop_id)?
            .members
            .into_iter()
            .find(|m| m.participant_id == participant_id)
            .ok_or(EngineError::NotMember {
                workshop_id,
                participant_id,
            })?;
        let is_helper = next(member.is_helper);
        self.persist(&Change::MemberHelperSet {
            workshop_id,
            participant_id,
            is_helper,
        })
        .await?;
        Ok(is_helper)
    }

    // ── Workshop queries ─────────────────────────────────

    /// ABI participants of the workshop's event not yet leading it.
    pub fn available_leaders(&self, workshop_id: Ulid) -> Result<Vec<Participant>, EngineError> {
        let ws = self.workshop(workshop_id)?;
        let mut list: Vec<Participant> = self
            .participants
            .iter()
            .filter(|p| {
                p.event_id == ws.workshop.event_id
                    && p.role == Role::Abi
                    && !ws.leaders.contains(&p.id)
            })
            .map(|p| p.value().clone())
            .collect();
        sort_by_name(&mut list);
        Ok(list)
    }

    /// Participants of the workshop's event not yet members.
    pub fn available_members(&self, workshop_id: Ulid) -> Result<Vec<Participant>, EngineError> {
        let ws = self.workshop(workshop_id)?;
        let mut list: Vec<Participant> = self
            .participants
            .iter()
            .filter(|p| p.event_id == ws.workshop.event_id && !ws.has_member(p.id))
            .map(|p| p.value().clone())
            .collect();
        sort_by_name(&mut list);
        Ok(list)
    }

    pub fn workshop_stats(&self, event_id: Ulid) -> Result<WorkshopStats, EngineError> {
        self.event(event_id)?;
        let workshops: Vec<WorkshopSummary> = self
            .list_workshops(event_id)
            .into_iter()
            .map(|ws| WorkshopSummary {
                leaders: ws.leaders.len(),
                members: ws.members.len(),
                is_full: ws.is_full(),
                workshop: ws.workshop,
            })
            .collect();
        Ok(WorkshopStats {
            total_workshops: workshops.len(),
            total_leaders: workshops.iter().map(|w| w.leaders).sum(),
            total_members: workshops.iter().map(|w| w.members).sum(),
            workshops,
        })
    }
}
