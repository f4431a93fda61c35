use chrono::Datelike;
use ulid::Ulid;

use crate::model::*;

use super::occupancy::{room_fit, RoomFit};
use super::{Engine, EngineError};

fn by_name(a: &Participant, b: &Participant) -> std::cmp::Ordering {
    a.last_name
        .to_lowercase()
        .cmp(&b.last_name.to_lowercase())
        .then_with(|| a.first_name.to_lowercase().cmp(&b.first_name.to_lowercase()))
}

pub(super) fn sort_by_name(participants: &mut [Participant]) {
    participants.sort_by(by_name);
}

impl Engine {
    pub fn event(&self, id: Ulid) -> Result<Event, EngineError> {
        self.events
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// All events, newest year first.
    pub fn list_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by(|a, b| b.year.cmp(&a.year));
        events
    }

    /// The event of the current calendar year, otherwise the latest one.
    pub fn current_event(&self) -> Option<Event> {
        self.current_event_for_year(chrono::Utc::now().year())
    }

    pub fn current_event_for_year(&self, year: i32) -> Option<Event> {
        let events = self.list_events();
        events
            .iter()
            .find(|e| e.year == year)
            .or_else(|| events.first())
            .cloned()
    }

    pub fn participant(&self, id: Ulid) -> Result<Participant, EngineError> {
        self.participants
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Participants of an event matching `filter`, sorted by last name.
    pub fn list_participants(&self, event_id: Ulid, filter: &ParticipantFilter) -> Vec<Participant> {
        let mut list: Vec<Participant> = self
            .participants
            .iter()
            .filter(|p| p.event_id == event_id && filter.matches(p))
            .map(|p| p.value().clone())
            .collect();
        sort_by_name(&mut list);
        list
    }

    /// Most recently registered participants, newest first.
    pub fn recent_participants(&self, event_id: Ulid, limit: usize) -> Vec<Participant> {
        let mut list: Vec<Participant> = self
            .participants
            .iter()
            .filter(|p| p.event_id == event_id)
            .map(|p| p.value().clone())
            .collect();
        list.sort_by(|a, b| b.id.cmp(&a.id));
        list.truncate(limit);
        list
    }

    async fn room_states(&self, event_id: Ulid) -> Vec<RoomState> {
        let mut states = Vec::new();
        for room_id in self.rooms_of_event(event_id) {
            if let Some(rs) = self.get_room(&room_id) {
                states.push(rs.read().await.clone());
            }
        }
        states.sort_by(|a, b| a.room.name.cmp(&b.room.name));
        states
    }

    pub async fn room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// Rooms of an event by name, each with its occupants.
    pub async fn list_rooms(&self, event_id: Ulid) -> Vec<RoomWithOccupants> {
        self.room_states(event_id)
            .await
            .into_iter()
            .map(|rs| {
                let mut occupants: Vec<Participant> = rs
                    .occupants
                    .iter()
                    .filter_map(|o| self.participants.get(&o.participant_id).map(|p| p.value().clone()))
                    .collect();
                sort_by_name(&mut occupants);
                RoomWithOccupants {
                    room: rs.room,
                    occupants,
                }
            })
            .collect()
    }

    /// Headcount per room, ignoring stay dates.
    pub async fn room_occupancy(&self, event_id: Ulid) -> Vec<RoomOccupancy> {
        self.room_states(event_id)
            .await
            .into_iter()
            .map(|rs| {
                let occupied = rs.occupants.len();
                let capacity = rs.room.capacity as usize;
                RoomOccupancy {
                    occupied,
                    available: capacity.saturating_sub(occupied),
                    is_full: occupied >= capacity,
                    room: rs.room,
                }
            })
            .collect()
    }

    /// Fit of a stay into every room of the event. `exclude` is left out of
    /// the counts, so a participant never competes with themselves.
    pub async fn room_availability(
        &self,
        event_id: Ulid,
        stay: &Stay,
        exclude: Option<Ulid>,
    ) -> Result<Vec<(Room, RoomFit)>, EngineError> {
        self.event(event_id)?;
        if stay.is_inverted() {
            return Err(EngineError::InvertedStay(*stay));
        }
        let exclude = exclude.unwrap_or(Ulid::nil());
        Ok(self
            .room_states(event_id)
            .await
            .into_iter()
            .map(|rs| {
                let fit = room_fit(rs.room.capacity, &rs.stays_except(exclude), stay);
                (rs.room, fit)
            })
            .collect())
    }

    /// Fit of a participant's own stay into every room of their event.
    pub async fn room_availability_for(
        &self,
        participant_id: Ulid,
    ) -> Result<Vec<(Room, RoomFit)>, EngineError> {
        let p = self.participant(participant_id)?;
        self.room_availability(p.event_id, &p.stay, Some(p.id)).await
    }
}
