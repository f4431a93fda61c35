mod conflict;
mod error;
mod mutations;
pub mod occupancy;
mod queries;
mod reports;
#[cfg(test)]
mod tests;
mod workshops;

pub use error::EngineError;
pub use occupancy::{max_occupancy_during_period, periods_overlap, room_fit, RoomFit};
pub use reports::country_for;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        change: Change,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        changes: Vec<Change>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Waits for one append, drains whatever else is queued, then commits the
/// whole batch with a single fsync before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { change, response } => {
                let mut batch = vec![(change, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { change, response }) => {
                            batch.push((change, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Change, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} changes: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Change, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (change, _) in batch {
        if let Err(e) = wal.append_buffered(change) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so stale bytes never reach the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { changes, response } => {
            let result = Wal::write_compact_file(wal.path(), &changes)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { change, response } => {
            let mut batch = vec![(change, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Room locks ───────────────────────────────────────────

/// Write guards on a set of rooms, always taken in id order.
pub(super) struct RoomLocks {
    guards: Vec<OwnedRwLockWriteGuard<RoomState>>,
}

impl RoomLocks {
    pub(super) fn get(&self, id: Ulid) -> Option<&RoomState> {
        self.guards.iter().find(|g| g.room.id == id).map(|g| &**g)
    }

    pub(super) fn get_mut(&mut self, id: Ulid) -> Option<&mut RoomState> {
        self.guards
            .iter_mut()
            .find(|g| g.room.id == id)
            .map(|g| &mut **g)
    }
}

fn sorted_ids(ids: impl IntoIterator<Item = Ulid>) -> Vec<Ulid> {
    let mut ids: Vec<Ulid> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Per-tenant state: events and everything that hangs off them.
pub struct Engine {
    pub(super) events: DashMap<Ulid, Event>,
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// Reverse lookup: room id → event id. Fixed at room creation.
    pub(super) room_event: DashMap<Ulid, Ulid>,
    pub(super) participants: DashMap<Ulid, Participant>,
    pub(super) workshop_rooms: DashMap<Ulid, WorkshopRoom>,
    pub(super) workshops: DashMap<Ulid, WorkshopState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared, compaction holds it exclusively, so a
    /// snapshot never misses a change that is already in the old log.
    pub(super) gate: RwLock<()>,
    /// Serializes every change to a participant's room, stay or existence.
    /// Lock order: gate, placement, catalog, then room locks by id.
    pub(super) placement: Mutex<()>,
    /// Serializes changes whose validity depends on other entities, such as
    /// unique event years or a workshop room used by one workshop only.
    pub(super) catalog: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let changes = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            events: DashMap::new(),
            rooms: DashMap::new(),
            room_event: DashMap::new(),
            participants: DashMap::new(),
            workshop_rooms: DashMap::new(),
            workshops: DashMap::new(),
            wal_tx,
            gate: RwLock::new(()),
            placement: Mutex::new(()),
            catalog: Mutex::new(()),
        };

        // Replay runs before anyone else can see the engine, so every
        // try_write succeeds. Never block here: this may run inside the runtime.
        for change in &changes {
            let mut locks = engine.lock_rooms_now(engine.touched_rooms(change))?;
            engine.apply(change, &mut locks);
        }
        if !changes.is_empty() {
            tracing::info!("replayed {} changes from {}", changes.len(), wal_path.display());
        }

        Ok(engine)
    }

    /// Write a change to the WAL via the background group-commit writer.
    async fn wal_append(&self, change: &Change) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                change: change.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL append followed by apply. Callers hold the write locks of every
    /// room in `touched_rooms(change)`.
    pub(super) async fn persist_and_apply(
        &self,
        change: &Change,
        locks: &mut RoomLocks,
    ) -> Result<(), EngineError> {
        self.wal_append(change).await?;
        self.apply(change, locks);
        Ok(())
    }

    pub(super) async fn persist(&self, change: &Change) -> Result<(), EngineError> {
        let mut locks = RoomLocks { guards: Vec::new() };
        self.persist_and_apply(change, &mut locks).await
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Acquire write locks on the given rooms in id order.
    /// Rooms deleted while waiting are left out.
    pub(super) async fn lock_rooms(&self, ids: impl IntoIterator<Item = Ulid>) -> RoomLocks {
        let mut guards = Vec::new();
        for id in sorted_ids(ids) {
            if let Some(rs) = self.get_room(&id) {
                guards.push(rs.write_owned().await);
            }
        }
        guards.retain(|g| self.rooms.contains_key(&g.room.id));
        RoomLocks { guards }
    }

    fn lock_rooms_now(&self, ids: Vec<Ulid>) -> io::Result<RoomLocks> {
        let mut guards = Vec::new();
        for id in sorted_ids(ids) {
            if let Some(rs) = self.get_room(&id) {
                let guard = rs
                    .try_write_owned()
                    .map_err(|_| io::Error::other("replay: room lock contended"))?;
                guards.push(guard);
            }
        }
        Ok(RoomLocks { guards })
    }

    /// Rooms whose state a change modifies.
    fn touched_rooms(&self, change: &Change) -> Vec<Ulid> {
        match change {
            Change::RoomUpdated(room) => vec![room.id],
            Change::RoomDeleted { id } => vec![*id],
            Change::ParticipantRegistered(p) => p.room_id.into_iter().collect(),
            Change::ParticipantUpdated(Participant { id, .. }) | Change::ParticipantDeleted { id } => self
                .participants
                .get(id)
                .and_then(|p| p.room_id)
                .into_iter()
                .collect(),
            Change::RoomAssigned { from, to, .. } => from.iter().chain(to.iter()).copied().collect(),
            Change::EventDeleted { id } => self.rooms_of_event(*id),
            _ => Vec::new(),
        }
    }

    pub(super) fn rooms_of_event(&self, event_id: Ulid) -> Vec<Ulid> {
        self.room_event
            .iter()
            .filter(|e| *e.value() == event_id)
            .map(|e| *e.key())
            .collect()
    }

    /// Apply a change to in-memory state. Never fails: validation happened
    /// before the change was logged.
    fn apply(&self, change: &Change, locks: &mut RoomLocks) {
        match change {
            Change::EventCreated(event) | Change::EventUpdated(event) => {
                self.events.insert(event.id, event.clone());
            }
            Change::EventDeleted { id } => {
                self.events.remove(id);
                for room_id in self.rooms_of_event(*id) {
                    self.rooms.remove(&room_id);
                    self.room_event.remove(&room_id);
                }
                self.participants.retain(|_, p| p.event_id != *id);
                self.workshop_rooms.retain(|_, r| r.event_id != *id);
                self.workshops.retain(|_, w| w.workshop.event_id != *id);
            }
            Change::RoomCreated(room) => {
                self.room_event.insert(room.id, room.event_id);
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Change::RoomUpdated(room) => {
                if let Some(rs) = locks.get_mut(room.id) {
                    rs.room = room.clone();
                }
            }
            Change::RoomDeleted { id } => {
                if let Some(rs) = locks.get_mut(*id) {
                    rs.occupants.clear();
                }
                for mut p in self.participants.iter_mut() {
                    if p.room_id == Some(*id) {
                        p.room_id = None;
                    }
                }
                self.rooms.remove(id);
                self.room_event.remove(id);
            }
            Change::ParticipantRegistered(p) => {
                if let Some(room_id) = p.room_id
                    && let Some(rs) = locks.get_mut(room_id)
                {
                    rs.add_occupant(Occupant {
                        participant_id: p.id,
                        stay: p.stay,
                    });
                }
                self.participants.insert(p.id, p.clone());
            }
            Change::ParticipantUpdated(p) => {
                let mut p = p.clone();
                // Room, payment and check-in have their own changes.
                if let Some(existing) = self.participants.get(&p.id) {
                    p.room_id = existing.room_id;
                    p.payment = existing.payment.clone();
                    p.checked_in_at = existing.checked_in_at;
                }
                if let Some(room_id) = p.room_id
                    && let Some(rs) = locks.get_mut(room_id)
                {
                    rs.add_occupant(Occupant {
                        participant_id: p.id,
                        stay: p.stay,
                    });
                }
                self.participants.insert(p.id, p);
            }
            Change::ParticipantDeleted { id } => {
                if let Some((_, p)) = self.participants.remove(id)
                    && let Some(room_id) = p.room_id
                    && let Some(rs) = locks.get_mut(room_id)
                {
                    rs.remove_occupant(*id);
                }
                for mut ws in self.workshops.iter_mut() {
                    ws.leaders.retain(|l| l != id);
                    ws.members.retain(|m| m.participant_id != *id);
                }
            }
            Change::RoomAssigned {
                participant_id,
                from,
                to,
            } => {
                let Some(mut p) = self.participants.get_mut(participant_id) else {
                    return;
                };
                if let Some(from) = from
                    && let Some(rs) = locks.get_mut(*from)
                {
                    rs.remove_occupant(*participant_id);
                }
                if let Some(to) = to
                    && let Some(rs) = locks.get_mut(*to)
                {
                    rs.add_occupant(Occupant {
                        participant_id: *participant_id,
                        stay: p.stay,
                    });
                }
                p.room_id = *to;
            }
            Change::PaymentRecorded {
                participant_id,
                payment,
            } => {
                if let Some(mut p) = self.participants.get_mut(participant_id) {
                    p.payment = payment.clone();
                }
            }
            Change::CheckInChanged { participant_id, at } => {
                if let Some(mut p) = self.participants.get_mut(participant_id) {
                    p.checked_in_at = *at;
                }
            }
            Change::WorkshopRoomCreated(room) | Change::WorkshopRoomUpdated(room) => {
                self.workshop_rooms.insert(room.id, room.clone());
            }
            Change::WorkshopRoomDeleted { id } => {
                self.workshop_rooms.remove(id);
                for mut ws in self.workshops.iter_mut() {
                    if ws.workshop.workshop_room_id == Some(*id) {
                        ws.workshop.workshop_room_id = None;
                    }
                }
            }
            Change::WorkshopCreated(workshop) => {
                self.workshops
                    .insert(workshop.id, WorkshopState::new(workshop.clone()));
            }
            Change::WorkshopUpdated(workshop) => {
                if let Some(mut ws) = self.workshops.get_mut(&workshop.id) {
                    ws.workshop = workshop.clone();
                }
            }
            Change::WorkshopDeleted { id } => {
                self.workshops.remove(id);
            }
            Change::LeaderAdded {
                workshop_id,
                participant_id,
            } => {
                if let Some(mut ws) = self.workshops.get_mut(workshop_id)
                    && !ws.leaders.contains(participant_id)
                {
                    ws.leaders.push(*participant_id);
                }
            }
            Change::LeaderRemoved {
                workshop_id,
                participant_id,
            } => {
                if let Some(mut ws) = self.workshops.get_mut(workshop_id) {
                    ws.leaders.retain(|l| l != participant_id);
                }
            }
            Change::MemberAdded { workshop_id, member } => {
                if let Some(mut ws) = self.workshops.get_mut(workshop_id)
                    && !ws.has_member(member.participant_id)
                {
                    ws.members.push(*member);
                }
            }
            Change::MemberRemoved {
                workshop_id,
                participant_id,
            } => {
                if let Some(mut ws) = self.workshops.get_mut(workshop_id) {
                    ws.members.retain(|m| m.participant_id != *participant_id);
                }
            }
            Change::MemberHelperSet {
                workshop_id,
                participant_id,
                is_helper,
            } => {
                if let Some(mut ws) = self.workshops.get_mut(workshop_id)
                    && let Some(m) = ws
                        .members
                        .iter_mut()
                        .find(|m| m.participant_id == *participant_id)
                {
                    m.is_helper = *is_helper;
                }
            }
        }
    }

    // ── Compaction ───────────────────────────────────────

    /// Minimal list of changes that rebuilds the current state.
    async fn snapshot(&self) -> Vec<Change> {
        let mut changes = Vec::new();

        let mut events: Vec<Event> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by_key(|e| e.id);
        changes.extend(events.into_iter().map(Change::EventCreated));

        let mut room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort();
        for id in room_ids {
            if let Some(rs) = self.get_room(&id) {
                changes.push(Change::RoomCreated(rs.read().await.room.clone()));
            }
        }

        let mut participants: Vec<Participant> =
            self.participants.iter().map(|e| e.value().clone()).collect();
        participants.sort_by_key(|p| p.id);
        changes.extend(participants.into_iter().map(Change::ParticipantRegistered));

        let mut workshop_rooms: Vec<WorkshopRoom> =
            self.workshop_rooms.iter().map(|e| e.value().clone()).collect();
        workshop_rooms.sort_by_key(|r| r.id);
        changes.extend(workshop_rooms.into_iter().map(Change::WorkshopRoomCreated));

        let mut workshops: Vec<WorkshopState> =
            self.workshops.iter().map(|e| e.value().clone()).collect();
        workshops.sort_by_key(|w| w.workshop.id);
        for ws in workshops {
            let workshop_id = ws.workshop.id;
            changes.push(Change::WorkshopCreated(ws.workshop));
            for participant_id in ws.leaders {
                changes.push(Change::LeaderAdded {
                    workshop_id,
                    participant_id,
                });
            }
            for member in ws.members {
                changes.push(Change::MemberAdded {
                    workshop_id,
                    member,
                });
            }
        }

        changes
    }

    /// Rewrite the WAL so it holds only the current state.
    pub async fn compact(&self) -> Result<usize, EngineError> {
        let _gate = self.gate.write().await;
        let changes = self.snapshot().await;
        let count = changes.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                changes,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(count)
    }

    pub async fn appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
