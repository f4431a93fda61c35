use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for check-in and payment timestamps.
pub type Ms = i64;

/// Lower end of a stay. An unknown arrival sorts before every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lower {
    Unbounded,
    Day(NaiveDate),
}

/// Upper end of a stay. An unknown departure sorts after every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Upper {
    Day(NaiveDate),
    Unbounded,
}

impl Lower {
    /// True if a period starting here has begun by the time a period ending at `upper` is over.
    pub fn at_or_before(self, upper: Upper) -> bool {
        match (self, upper) {
            (Lower::Day(a), Upper::Day(b)) => a <= b,
            _ => true,
        }
    }
}

/// Closed date interval `[arrival, departure]` of one participant.
/// Both ends are optional: an absent arrival means "from the beginning",
/// an absent departure means "until the end".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub arrival: Option<NaiveDate>,
    pub departure: Option<NaiveDate>,
}

impl Stay {
    pub fn new(arrival: Option<NaiveDate>, departure: Option<NaiveDate>) -> Self {
        Self { arrival, departure }
    }

    /// Stay with both ends open: the whole event.
    pub fn open() -> Self {
        Self::default()
    }

    /// Single-day stay, used for "present on day" checks.
    pub fn day(day: NaiveDate) -> Self {
        Self::new(Some(day), Some(day))
    }

    pub fn lower(&self) -> Lower {
        self.arrival.map_or(Lower::Unbounded, Lower::Day)
    }

    pub fn upper(&self) -> Upper {
        self.departure.map_or(Upper::Unbounded, Upper::Day)
    }

    /// Arrival after departure. Such stays are rejected on write.
    pub fn is_inverted(&self) -> bool {
        matches!((self.arrival, self.departure), (Some(a), Some(d)) if a > d)
    }
}

impl std::fmt::Display for Stay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.arrival, self.departure) {
            (Some(a), Some(d)) => write!(f, "{a} - {d}"),
            (Some(a), None) => write!(f, "{a} - open"),
            (None, Some(d)) => write!(f, "open - {d}"),
            (None, None) => write!(f, "whole event"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Regular,
    Helper,
    /// Alumni guest ("Abi"). Workshop leaders are recruited from this group.
    Abi,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Regular, Role::Helper, Role::Abi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Regular => "REGULAR",
            Role::Helper => "HELPER",
            Role::Abi => "ABI",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_uppercase().as_str() {
            "REGULAR" => Some(Role::Regular),
            "HELPER" => Some(Role::Helper),
            "ABI" => Some(Role::Abi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<PaymentMethod> {
        match s.trim().to_uppercase().as_str() {
            "CASH" | "BAR" => Some(PaymentMethod::Cash),
            "TRANSFER" | "UEBERWEISUNG" | "ÜBERWEISUNG" => Some(PaymentMethod::Transfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub name: String,
    pub year: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub location: String,
    /// Full participation fee in cents. Payments below it count as partial.
    pub fee_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub event_id: Ulid,
    pub name: String,
    pub floor: Option<String>,
    pub capacity: u32,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub has_paid: bool,
    pub amount_cents: Option<i64>,
    pub method: Option<PaymentMethod>,
    pub paid_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Ulid,
    pub event_id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub notes: Option<String>,
    pub role: Role,
    pub age: Option<u32>,
    pub birth_date: Option<NaiveDate>,
    pub stay: Stay,
    pub room_id: Option<Ulid>,
    pub payment: Payment,
    pub checked_in_at: Option<Ms>,
}

impl Participant {
    /// A blank registration with only the required fields set.
    pub fn new(id: Ulid, event_id: Ulid, first_name: String, last_name: String) -> Self {
        Self {
            id,
            event_id,
            first_name,
            last_name,
            email: None,
            phone: None,
            street: None,
            house_number: None,
            postal_code: None,
            city: None,
            notes: None,
            role: Role::Regular,
            age: None,
            birth_date: None,
            stay: Stay::open(),
            room_id: None,
            payment: Payment::default(),
            checked_in_at: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_checked_in(&self) -> bool {
        self.checked_in_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkshopRoom {
    pub id: Ulid,
    pub event_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workshop {
    pub id: Ulid,
    pub event_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub max_participants: u32,
    pub workshop_room_id: Option<Ulid>,
}

pub const DEFAULT_WORKSHOP_SIZE: u32 = 30;

/// Partial update of a participant's own fields. `None` leaves a field as
/// is; for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub street: Option<Option<String>>,
    pub house_number: Option<Option<String>>,
    pub postal_code: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub role: Option<Role>,
    pub age: Option<Option<u32>>,
    pub birth_date: Option<Option<NaiveDate>>,
    pub arrival: Option<Option<NaiveDate>>,
    pub departure: Option<Option<NaiveDate>>,
}

impl ParticipantPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, mut p: Participant) -> Participant {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        set(&mut p.first_name, &self.first_name);
        set(&mut p.last_name, &self.last_name);
        set(&mut p.email, &self.email);
        set(&mut p.phone, &self.phone);
        set(&mut p.street, &self.street);
        set(&mut p.house_number, &self.house_number);
        set(&mut p.postal_code, &self.postal_code);
        set(&mut p.city, &self.city);
        set(&mut p.notes, &self.notes);
        set(&mut p.role, &self.role);
        set(&mut p.age, &self.age);
        set(&mut p.birth_date, &self.birth_date);
        set(&mut p.stay.arrival, &self.arrival);
        set(&mut p.stay.departure, &self.departure);
        p
    }
}

/// Field update of an event. `fee_cents: Some(None)` removes the fee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub fee_cents: Option<Option<i64>>,
}

impl EventPatch {
    pub fn apply_to(&self, mut e: Event) -> Event {
        if let Some(v) = &self.name {
            e.name = v.clone();
        }
        if let Some(v) = self.year {
            e.year = v;
        }
        if let Some(v) = self.start_date {
            e.start_date = v;
        }
        if let Some(v) = self.end_date {
            e.end_date = v;
        }
        if let Some(v) = &self.location {
            e.location = v.clone();
        }
        if let Some(v) = self.fee_cents {
            e.fee_cents = v;
        }
        e
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub floor: Option<Option<String>>,
    pub capacity: Option<u32>,
    pub description: Option<Option<String>>,
}

impl RoomPatch {
    pub fn apply_to(&self, mut r: Room) -> Room {
        if let Some(v) = &self.name {
            r.name = v.clone();
        }
        if let Some(v) = &self.floor {
            r.floor = v.clone();
        }
        if let Some(v) = self.capacity {
            r.capacity = v;
        }
        if let Some(v) = &self.description {
            r.description = v.clone();
        }
        r
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkshopRoomPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub capacity: Option<Option<u32>>,
}

impl WorkshopRoomPatch {
    pub fn apply_to(&self, mut r: WorkshopRoom) -> WorkshopRoom {
        if let Some(v) = &self.name {
            r.name = v.clone();
        }
        if let Some(v) = &self.description {
            r.description = v.clone();
        }
        if let Some(v) = self.capacity {
            r.capacity = v;
        }
        r
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkshopPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub max_participants: Option<u32>,
    pub workshop_room_id: Option<Option<Ulid>>,
}

impl WorkshopPatch {
    pub fn apply_to(&self, mut w: Workshop) -> Workshop {
        if let Some(v) = &self.name {
            w.name = v.clone();
        }
        if let Some(v) = &self.description {
            w.description = v.clone();
        }
        if let Some(v) = self.max_participants {
            w.max_participants = v;
        }
        if let Some(v) = self.workshop_room_id {
            w.workshop_room_id = v;
        }
        w
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantFilter {
    pub role: Option<Role>,
    pub has_paid: Option<bool>,
    pub room_id: Option<Ulid>,
    pub checked_in: Option<bool>,
}

impl ParticipantFilter {
    pub fn matches(&self, p: &Participant) -> bool {
        self.role.is_none_or(|r| p.role == r)
            && self.has_paid.is_none_or(|paid| p.payment.has_paid == paid)
            && self.room_id.is_none_or(|r| p.room_id == Some(r))
            && self.checked_in.is_none_or(|c| p.is_checked_in() == c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub participant_id: Ulid,
    pub is_helper: bool,
}

/// One entry in a room: who sleeps there and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupant {
    pub participant_id: Ulid,
    pub stay: Stay,
}

/// In-memory state of one room. Guarded by its own lock so that the
/// capacity check and the assignment happen as one step.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub occupants: Vec<Occupant>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            occupants: Vec::new(),
        }
    }

    pub fn add_occupant(&mut self, occupant: Occupant) {
        match self
            .occupants
            .iter_mut()
            .find(|o| o.participant_id == occupant.participant_id)
        {
            Some(existing) => existing.stay = occupant.stay,
            None => self.occupants.push(occupant),
        }
    }

    pub fn remove_occupant(&mut self, participant_id: Ulid) -> Option<Occupant> {
        let pos = self
            .occupants
            .iter()
            .position(|o| o.participant_id == participant_id)?;
        Some(self.occupants.remove(pos))
    }

    /// Stays of everyone in the room except `exclude`.
    pub fn stays_except(&self, exclude: Ulid) -> Vec<Stay> {
        self.occupants
            .iter()
            .filter(|o| o.participant_id != exclude)
            .map(|o| o.stay)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkshopState {
    pub workshop: Workshop,
    pub leaders: Vec<Ulid>,
    pub members: Vec<Member>,
}

impl WorkshopState {
    pub fn new(workshop: Workshop) -> Self {
        Self {
            workshop,
            leaders: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn has_member(&self, participant_id: Ulid) -> bool {
        self.members.iter().any(|m| m.participant_id == participant_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.workshop.max_participants as usize
    }
}

/// WAL record. Every state change of a tenant is one of these.
///
/// Cascades (event delete, room delete, participant delete) are applied
/// when the record is applied, so replay reproduces them without extra records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    EventCreated(Event),
    EventUpdated(Event),
    EventDeleted {
        id: Ulid,
    },
    RoomCreated(Room),
    RoomUpdated(Room),
    RoomDeleted {
        id: Ulid,
    },
    ParticipantRegistered(Participant),
    /// Field update. Room, payment and check-in are carried along unchanged.
    ParticipantUpdated(Participant),
    ParticipantDeleted {
        id: Ulid,
    },
    RoomAssigned {
        participant_id: Ulid,
        from: Option<Ulid>,
        to: Option<Ulid>,
    },
    PaymentRecorded {
        participant_id: Ulid,
        payment: Payment,
    },
    CheckInChanged {
        participant_id: Ulid,
        at: Option<Ms>,
    },
    WorkshopRoomCreated(WorkshopRoom),
    WorkshopRoomUpdated(WorkshopRoom),
    WorkshopRoomDeleted {
        id: Ulid,
    },
    WorkshopCreated(Workshop),
    WorkshopUpdated(Workshop),
    WorkshopDeleted {
        id: Ulid,
    },
    LeaderAdded {
        workshop_id: Ulid,
        participant_id: Ulid,
    },
    LeaderRemoved {
        workshop_id: Ulid,
        participant_id: Ulid,
    },
    MemberAdded {
        workshop_id: Ulid,
        member: Member,
    },
    MemberRemoved {
        workshop_id: Ulid,
        participant_id: Ulid,
    },
    MemberHelperSet {
        workshop_id: Ulid,
        participant_id: Ulid,
        is_helper: bool,
    },
}

// ── Query results ────────────────────────────────────────────

/// Headcount view of a room, ignoring dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOccupancy {
    pub room: Room,
    pub occupied: usize,
    pub available: usize,
    pub is_full: bool,
}

/// A room with the participants assigned to it, sorted by last name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomWithOccupants {
    pub room: Room,
    pub occupants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyReport {
    pub date: NaiveDate,
    /// Every room of the event with the occupants present on `date`.
    pub rooms: Vec<RoomWithOccupants>,
    /// Participants with a room whose stay contains `date`.
    pub present: Vec<Participant>,
    pub arrivals: Vec<Participant>,
    pub departures: Vec<Participant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStatistics {
    pub total_participants: usize,
    pub checked_in: usize,
    pub paid: usize,
    pub unpaid: usize,
    pub rooms: usize,
    pub occupied_beds: usize,
    pub total_beds: u64,
    pub helpers: usize,
    pub abi_guests: usize,
}

/// One bucket of a distribution (city, country, role).
#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    pub label: String,
    pub count: usize,
    /// Unrounded percentage of all participants.
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentStats {
    pub paid: usize,
    pub unpaid: usize,
    pub total_amount_cents: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePayment {
    pub role: Role,
    pub paid: usize,
    pub unpaid: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinanceStats {
    pub total: usize,
    pub paid: usize,
    pub unpaid: usize,
    pub paid_percentage: u32,
    pub fully_paid: usize,
    pub partially_paid: usize,
    pub paid_without_amount: usize,
    pub total_amount_cents: i64,
    pub cash_amount_cents: i64,
    pub transfer_amount_cents: i64,
    pub unknown_method_amount_cents: i64,
    pub cash_count: usize,
    pub transfer_count: usize,
    pub unknown_method_count: usize,
    pub by_role: Vec<RolePayment>,
    pub unpaid_list: Vec<Participant>,
    pub partially_paid_list: Vec<Participant>,
    pub full_payment_threshold_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkshopSummary {
    pub workshop: Workshop,
    pub leaders: usize,
    pub members: usize,
    pub is_full: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkshopStats {
    pub total_workshops: usize,
    pub total_leaders: usize,
    pub total_members: usize,
    pub workshops: Vec<WorkshopSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Outcome of bulk operations that skip what already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub added: usize,
    pub skipped: usize,
}
