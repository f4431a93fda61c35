use chrono::{Datelike, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::import::ImportMode;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertEvent(Event),
    UpdateEvent { id: Ulid, patch: EventPatch },
    DeleteEvent { id: Ulid },
    SelectEvents { id: Option<Ulid> },
    SelectCurrentEvent,

    InsertRoom(Room),
    UpdateRoom { id: Ulid, patch: RoomPatch },
    DeleteRoom { id: Ulid },
    SelectRooms { event_id: Ulid },
    SelectRoomOccupancy { event_id: Ulid },
    SelectRoomAvailability(AvailabilityTarget),

    InsertParticipant(Participant),
    /// `room: Some(..)` moves the participant after the field update.
    UpdateParticipant {
        id: Ulid,
        patch: ParticipantPatch,
        room: Option<Option<Ulid>>,
    },
    DeleteParticipant { id: Ulid },
    SelectParticipant { id: Ulid },
    SelectParticipants { event_id: Ulid, filter: ParticipantFilter },
    SelectRecentParticipants { event_id: Ulid },

    InsertPayment {
        participant_id: Ulid,
        amount_cents: Option<i64>,
        method: Option<PaymentMethod>,
    },
    DeletePayment { participant_id: Ulid },
    InsertCheckIn { participant_id: Ulid },
    DeleteCheckIn { participant_id: Ulid },
    ImportParticipants {
        event_id: Ulid,
        mode: ImportMode,
        csv: String,
    },

    InsertWorkshopRoom(WorkshopRoom),
    UpdateWorkshopRoom { id: Ulid, patch: WorkshopRoomPatch },
    DeleteWorkshopRoom { id: Ulid },
    SeedWorkshopRooms { event_id: Ulid },
    SelectWorkshopRooms { event_id: Ulid },
    SelectAvailableWorkshopRooms { event_id: Ulid, keep_for: Option<Ulid> },

    InsertWorkshop(Workshop),
    UpdateWorkshop { id: Ulid, patch: WorkshopPatch },
    DeleteWorkshop { id: Ulid },
    SelectWorkshops { event_id: Ulid },

    InsertLeader { workshop_id: Ulid, participant_id: Ulid },
    DeleteLeader { workshop_id: Ulid, participant_id: Ulid },
    SelectLeaders { workshop_id: Ulid },
    SelectAvailableLeaders { workshop_id: Ulid },

    InsertMember {
        workshop_id: Ulid,
        participant_id: Ulid,
        is_helper: bool,
    },
    BatchInsertMembers {
        workshop_id: Ulid,
        participant_ids: Vec<Ulid>,
        is_helper: bool,
    },
    UpdateMember {
        workshop_id: Ulid,
        participant_id: Ulid,
        is_helper: HelperUpdate,
    },
    DeleteMember { workshop_id: Ulid, participant_id: Ulid },
    SelectMembers { workshop_id: Ulid },
    SelectAvailableMembers { workshop_id: Ulid },

    SelectDailyReport { event_id: Ulid, date: NaiveDate },
    SelectStats { event_id: Ulid, kind: StatsKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityTarget {
    /// The participant's own stay, without counting them.
    Participant(Ulid),
    Stay { event_id: Ulid, stay: Stay },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperUpdate {
    Set(bool),
    Toggle,
}

/// Read-only report views keyed by `event_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsKind {
    Statistics,
    Cities,
    Countries,
    Roles,
    Payments,
    Finance,
    FinanceByRole,
    PartialPayments,
    Workshops,
}

impl StatsKind {
    fn from_table(table: &str) -> Option<StatsKind> {
        Some(match table {
            "statistics" => StatsKind::Statistics,
            "city_stats" => StatsKind::Cities,
            "country_stats" => StatsKind::Countries,
            "role_stats" => StatsKind::Roles,
            "payment_stats" => StatsKind::Payments,
            "finance_stats" => StatsKind::Finance,
            "finance_by_role" => StatsKind::FinanceByRole,
            "partial_payments" => StatsKind::PartialPayments,
            "workshop_stats" => StatsKind::Workshops,
            _ => return None,
        })
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table whose row shape a statement returns, if it returns rows at all.
/// Works on unbound statements, so `$n` placeholders are fine.
pub fn result_table(sql: &str) -> Option<String> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        Statement::Insert(insert) => {
            let table = insert_table_name(insert).ok()?;
            matches!(table.as_str(), "participant_imports" | "workshop_room_seeds").then_some(table)
        }
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

const EVENT_COLUMNS: &[&str] = &["id", "name", "year", "start_date", "end_date", "location", "fee", "fee_cents"];
const ROOM_COLUMNS: &[&str] = &["id", "event_id", "name", "capacity", "floor", "description"];
const PARTICIPANT_COLUMNS: &[&str] = &[
    "id", "event_id", "first_name", "last_name", "email", "phone", "street", "house_number",
    "postal_code", "city", "notes", "role", "age", "birth_date", "arrival", "departure", "room_id",
];
const PAYMENT_COLUMNS: &[&str] = &["participant_id", "amount", "amount_cents", "method"];
const IMPORT_COLUMNS: &[&str] = &["event_id", "mode", "csv"];
const WORKSHOP_ROOM_COLUMNS: &[&str] = &["id", "event_id", "name", "description", "capacity"];
const WORKSHOP_COLUMNS: &[&str] = &[
    "id", "event_id", "name", "description", "max_participants", "workshop_room_id",
];
const LEADER_COLUMNS: &[&str] = &["workshop_id", "participant_id"];
const MEMBER_COLUMNS: &[&str] = &["workshop_id", "participant_id", "is_helper"];

/// Column order assumed by an INSERT without a column list.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    Some(match table {
        "events" => &["id", "name", "year", "start_date", "end_date", "location", "fee"],
        "rooms" => &["id", "event_id", "name", "capacity", "floor", "description"],
        "participants" => &["id", "event_id", "first_name", "last_name", "arrival", "departure", "role"],
        "payments" => &["participant_id", "amount", "method"],
        "check_ins" => &["participant_id"],
        "participant_imports" => IMPORT_COLUMNS,
        "workshop_rooms" => WORKSHOP_ROOM_COLUMNS,
        "workshop_room_seeds" => &["event_id"],
        "workshops" => WORKSHOP_COLUMNS,
        "workshop_leaders" => LEADER_COLUMNS,
        "workshop_members" => MEMBER_COLUMNS,
        _ => return None,
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = insert_rows(&table, insert)?;

    if table == "workshop_members" && rows.len() > 1 {
        return batch_members(&rows);
    }
    let row = single_row(&table, rows)?;

    match table.as_str() {
        "events" => {
            row.only(EVENT_COLUMNS)?;
            let start_date = row.req("start_date", parse_date)?;
            Ok(Command::InsertEvent(Event {
                id: row.opt("id", parse_ulid_expr)?.unwrap_or_else(Ulid::new),
                name: row.req("name", parse_text)?,
                year: match row.opt("year", parse_i32)? {
                    Some(year) => year,
                    None => start_date.year(),
                },
                start_date,
                end_date: row.req("end_date", parse_date)?,
                location: row.opt("location", parse_text)?.unwrap_or_default(),
                fee_cents: row.money("fee", "fee_cents")?.flatten(),
            }))
        }
        "rooms" => {
            row.only(ROOM_COLUMNS)?;
            Ok(Command::InsertRoom(Room {
                id: row.opt("id", parse_ulid_expr)?.unwrap_or_else(Ulid::new),
                event_id: row.req("event_id", parse_ulid_expr)?,
                name: row.req("name", parse_text)?,
                floor: row.opt("floor", parse_text)?,
                capacity: row.req("capacity", parse_u32)?,
                description: row.opt("description", parse_text)?,
            }))
        }
        "participants" => {
            row.only(PARTICIPANT_COLUMNS)?;
            let mut p = Participant::new(
                row.opt("id", parse_ulid_expr)?.unwrap_or_else(Ulid::new),
                row.req("event_id", parse_ulid_expr)?,
                row.req("first_name", parse_text)?,
                row.req("last_name", parse_text)?,
            );
            p.email = row.opt("email", parse_text)?;
            p.phone = row.opt("phone", parse_text)?;
            p.street = row.opt("street", parse_text)?;
            p.house_number = row.opt("house_number", parse_text)?;
            p.postal_code = row.opt("postal_code", parse_text)?;
            p.city = row.opt("city", parse_text)?;
            p.notes = row.opt("notes", parse_text)?;
            p.role = row.opt("role", parse_role)?.unwrap_or_default();
            p.age = row.opt("age", parse_u32)?;
            p.birth_date = row.opt("birth_date", parse_date)?;
            p.stay = Stay::new(row.opt("arrival", parse_date)?, row.opt("departure", parse_date)?);
            p.room_id = row.opt("room_id", parse_ulid_expr)?;
            Ok(Command::InsertParticipant(p))
        }
        "payments" => {
            row.only(PAYMENT_COLUMNS)?;
            Ok(Command::InsertPayment {
                participant_id: row.req("participant_id", parse_ulid_expr)?,
                amount_cents: row.money("amount", "amount_cents")?.flatten(),
                method: row.opt("method", parse_method)?,
            })
        }
        "check_ins" => {
            row.only(&["participant_id"])?;
            Ok(Command::InsertCheckIn {
                participant_id: row.req("participant_id", parse_ulid_expr)?,
            })
        }
        "participant_imports" => {
            row.only(IMPORT_COLUMNS)?;
            Ok(Command::ImportParticipants {
                event_id: row.req("event_id", parse_ulid_expr)?,
                mode: row.opt("mode", parse_mode)?.unwrap_or(ImportMode::Add),
                csv: row.req("csv", parse_text)?,
            })
        }
        "workshop_rooms" => {
            row.only(WORKSHOP_ROOM_COLUMNS)?;
            Ok(Command::InsertWorkshopRoom(WorkshopRoom {
                id: row.opt("id", parse_ulid_expr)?.unwrap_or_else(Ulid::new),
                event_id: row.req("event_id", parse_ulid_expr)?,
                name: row.req("name", parse_text)?,
                description: row.opt("description", parse_text)?,
                capacity: row.opt("capacity", parse_u32)?,
            }))
        }
        "workshop_room_seeds" => {
            row.only(&["event_id"])?;
            Ok(Command::SeedWorkshopRooms {
                event_id: row.req("event_id", parse_ulid_expr)?,
            })
        }
        "workshops" => {
            row.only(WORKSHOP_COLUMNS)?;
            Ok(Command::InsertWorkshop(Workshop {
                id: row.opt("id", parse_ulid_expr)?.unwrap_or_else(Ulid::new),
                event_id: row.req("event_id", parse_ulid_expr)?,
                name: row.req("name", parse_text)?,
                description: row.opt("description", parse_text)?,
                max_participants: row
                    .opt("max_participants", parse_u32)?
                    .unwrap_or(DEFAULT_WORKSHOP_SIZE),
                workshop_room_id: row.opt("workshop_room_id", parse_ulid_expr)?,
            }))
        }
        "workshop_leaders" => {
            row.only(LEADER_COLUMNS)?;
            Ok(Command::InsertLeader {
                workshop_id: row.req("workshop_id", parse_ulid_expr)?,
                participant_id: row.req("participant_id", parse_ulid_expr)?,
            })
        }
        "workshop_members" => {
            row.only(MEMBER_COLUMNS)?;
            Ok(Command::InsertMember {
                workshop_id: row.req("workshop_id", parse_ulid_expr)?,
                participant_id: row.req("participant_id", parse_ulid_expr)?,
                is_helper: row.opt("is_helper", parse_bool)?.unwrap_or(false),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Multi-row INSERT into workshop_members. All rows must name the same
/// workshop and helper flag.
fn batch_members(rows: &[Fields]) -> Result<Command, SqlError> {
    let mut workshop_id = None;
    let mut is_helper = None;
    let mut participant_ids = Vec::with_capacity(rows.len());
    for row in rows {
        row.only(MEMBER_COLUMNS)?;
        let w = row.req("workshop_id", parse_ulid_expr)?;
        let h = row.opt("is_helper", parse_bool)?.unwrap_or(false);
        if *workshop_id.get_or_insert(w) != w || *is_helper.get_or_insert(h) != h {
            return Err(SqlError::Unsupported(
                "all rows of a member batch must share workshop_id and is_helper".into(),
            ));
        }
        participant_ids.push(row.req("participant_id", parse_ulid_expr)?);
    }
    Ok(Command::BatchInsertMembers {
        workshop_id: workshop_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?,
        participant_ids,
        is_helper: is_helper.unwrap_or(false),
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let set = assignment_fields(&table, assignments)?;
    let filter = where_fields(&table, selection)?;

    match table.as_str() {
        "events" => {
            set.only(&EVENT_COLUMNS[1..])?;
            Ok(Command::UpdateEvent {
                id: filter.req("id", parse_ulid_expr)?,
                patch: EventPatch {
                    name: set.opt("name", parse_text)?,
                    year: set.opt("year", parse_i32)?,
                    start_date: set.opt("start_date", parse_date)?,
                    end_date: set.opt("end_date", parse_date)?,
                    location: set.opt("location", parse_text)?,
                    fee_cents: set.money("fee", "fee_cents")?,
                },
            })
        }
        "rooms" => {
            set.only(&["name", "capacity", "floor", "description"])?;
            Ok(Command::UpdateRoom {
                id: filter.req("id", parse_ulid_expr)?,
                patch: RoomPatch {
                    name: set.opt("name", parse_text)?,
                    floor: set.patch("floor", parse_text)?,
                    capacity: set.opt("capacity", parse_u32)?,
                    description: set.patch("description", parse_text)?,
                },
            })
        }
        "participants" => {
            set.only(&PARTICIPANT_COLUMNS[2..])?;
            let patch = ParticipantPatch {
                first_name: set.opt("first_name", parse_text)?,
                last_name: set.opt("last_name", parse_text)?,
                email: set.patch("email", parse_text)?,
                phone: set.patch("phone", parse_text)?,
                street: set.patch("street", parse_text)?,
                house_number: set.patch("house_number", parse_text)?,
                postal_code: set.patch("postal_code", parse_text)?,
                city: set.patch("city", parse_text)?,
                notes: set.patch("notes", parse_text)?,
                role: set.opt("role", parse_role)?,
                age: set.patch("age", parse_u32)?,
                birth_date: set.patch("birth_date", parse_date)?,
                arrival: set.patch("arrival", parse_date)?,
                departure: set.patch("departure", parse_date)?,
            };
            Ok(Command::UpdateParticipant {
                id: filter.req("id", parse_ulid_expr)?,
                patch,
                room: set.patch("room_id", parse_ulid_expr)?,
            })
        }
        "workshop_rooms" => {
            set.only(&["name", "description", "capacity"])?;
            Ok(Command::UpdateWorkshopRoom {
                id: filter.req("id", parse_ulid_expr)?,
                patch: WorkshopRoomPatch {
                    name: set.opt("name", parse_text)?,
                    description: set.patch("description", parse_text)?,
                    capacity: set.patch("capacity", parse_u32)?,
                },
            })
        }
        "workshops" => {
            set.only(&WORKSHOP_COLUMNS[2..])?;
            Ok(Command::UpdateWorkshop {
                id: filter.req("id", parse_ulid_expr)?,
                patch: WorkshopPatch {
                    name: set.opt("name", parse_text)?,
                    description: set.patch("description", parse_text)?,
                    max_participants: set.opt("max_participants", parse_u32)?,
                    workshop_room_id: set.patch("workshop_room_id", parse_ulid_expr)?,
                },
            })
        }
        "workshop_members" => {
            set.only(&["is_helper"])?;
            let is_helper = match set.get("is_helper") {
                Some(Expr::UnaryOp {
                    op: UnaryOperator::Not,
                    expr,
                }) if expr_column_name(expr).as_deref() == Some("is_helper") => HelperUpdate::Toggle,
                _ => HelperUpdate::Set(set.req("is_helper", parse_bool)?),
            };
            Ok(Command::UpdateMember {
                workshop_id: filter.req("workshop_id", parse_ulid_expr)?,
                participant_id: filter.req("participant_id", parse_ulid_expr)?,
                is_helper,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filter = where_fields(&table, &delete.selection)?;

    match table.as_str() {
        "events" => Ok(Command::DeleteEvent { id: filter.req("id", parse_ulid_expr)? }),
        "rooms" => Ok(Command::DeleteRoom { id: filter.req("id", parse_ulid_expr)? }),
        "participants" => Ok(Command::DeleteParticipant { id: filter.req("id", parse_ulid_expr)? }),
        "payments" => Ok(Command::DeletePayment {
            participant_id: filter.req("participant_id", parse_ulid_expr)?,
        }),
        "check_ins" => Ok(Command::DeleteCheckIn {
            participant_id: filter.req("participant_id", parse_ulid_expr)?,
        }),
        "workshop_rooms" => Ok(Command::DeleteWorkshopRoom { id: filter.req("id", parse_ulid_expr)? }),
        "workshops" => Ok(Command::DeleteWorkshop { id: filter.req("id", parse_ulid_expr)? }),
        "workshop_leaders" => Ok(Command::DeleteLeader {
            workshop_id: filter.req("workshop_id", parse_ulid_expr)?,
            participant_id: filter.req("participant_id", parse_ulid_expr)?,
        }),
        "workshop_members" => Ok(Command::DeleteMember {
            workshop_id: filter.req("workshop_id", parse_ulid_expr)?,
            participant_id: filter.req("participant_id", parse_ulid_expr)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filter = where_fields(&table, &select.selection)?;

    if let Some(kind) = StatsKind::from_table(&table) {
        filter.only(&["event_id"])?;
        return Ok(Command::SelectStats {
            event_id: filter.req("event_id", parse_ulid_expr)?,
            kind,
        });
    }

    match table.as_str() {
        "events" => {
            filter.only(&["id"])?;
            Ok(Command::SelectEvents { id: filter.opt("id", parse_ulid_expr)? })
        }
        "current_event" => {
            filter.only(&[])?;
            Ok(Command::SelectCurrentEvent)
        }
        "rooms" => {
            filter.only(&["event_id"])?;
            Ok(Command::SelectRooms { event_id: filter.req("event_id", parse_ulid_expr)? })
        }
        "room_occupancy" => {
            filter.only(&["event_id"])?;
            Ok(Command::SelectRoomOccupancy { event_id: filter.req("event_id", parse_ulid_expr)? })
        }
        "room_availability" => {
            filter.only(&["participant_id", "event_id", "arrival", "departure"])?;
            if let Some(participant_id) = filter.opt("participant_id", parse_ulid_expr)? {
                return Ok(Command::SelectRoomAvailability(AvailabilityTarget::Participant(
                    participant_id,
                )));
            }
            Ok(Command::SelectRoomAvailability(AvailabilityTarget::Stay {
                event_id: filter.req("event_id", parse_ulid_expr)?,
                stay: Stay::new(filter.opt("arrival", parse_date)?, filter.opt("departure", parse_date)?),
            }))
        }
        "participants" => {
            filter.only(&["id", "event_id", "role", "has_paid", "room_id", "checked_in"])?;
            if let Some(id) = filter.opt("id", parse_ulid_expr)? {
                return Ok(Command::SelectParticipant { id });
            }
            Ok(Command::SelectParticipants {
                event_id: filter.req("event_id", parse_ulid_expr)?,
                filter: ParticipantFilter {
                    role: filter.opt("role", parse_role)?,
                    has_paid: filter.opt("has_paid", parse_bool)?,
                    room_id: filter.opt("room_id", parse_ulid_expr)?,
                    checked_in: filter.opt("checked_in", parse_bool)?,
                },
            })
        }
        "recent_participants" => {
            filter.only(&["event_id"])?;
            Ok(Command::SelectRecentParticipants {
                event_id: filter.req("event_id", parse_ulid_expr)?,
            })
        }
        "workshop_rooms" => {
            filter.only(&["event_id"])?;
            Ok(Command::SelectWorkshopRooms { event_id: filter.req("event_id", parse_ulid_expr)? })
        }
        "available_workshop_rooms" => {
            filter.only(&["event_id", "workshop_id"])?;
            Ok(Command::SelectAvailableWorkshopRooms {
                event_id: filter.req("event_id", parse_ulid_expr)?,
                keep_for: filter.opt("workshop_id", parse_ulid_expr)?,
            })
        }
        "workshops" => {
            filter.only(&["event_id"])?;
            Ok(Command::SelectWorkshops { event_id: filter.req("event_id", parse_ulid_expr)? })
        }
        "workshop_leaders" | "workshop_members" | "available_leaders" | "available_members" => {
            filter.only(&["workshop_id"])?;
            let workshop_id = filter.req("workshop_id", parse_ulid_expr)?;
            Ok(match table.as_str() {
                "workshop_leaders" => Command::SelectLeaders { workshop_id },
                "workshop_members" => Command::SelectMembers { workshop_id },
                "available_leaders" => Command::SelectAvailableLeaders { workshop_id },
                _ => Command::SelectAvailableMembers { workshop_id },
            })
        }
        "daily_report" => {
            filter.only(&["event_id", "date"])?;
            Ok(Command::SelectDailyReport {
                event_id: filter.req("event_id", parse_ulid_expr)?,
                date: filter.req("date", parse_date)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Column/value pairs ────────────────────────────────────────

/// Named values of one INSERT row, an UPDATE's SET list or a WHERE clause.
/// Absent and NULL both read as `None`, except through `patch`, where NULL
/// means "clear".
struct Fields {
    table: String,
    entries: Vec<(String, Expr)>,
}

impl Fields {
    fn get(&self, col: &str) -> Option<&Expr> {
        self.entries.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn only(&self, known: &[&str]) -> Result<(), SqlError> {
        match self.entries.iter().find(|(c, _)| !known.contains(&c.as_str())) {
            Some((col, _)) => Err(SqlError::UnknownColumn(self.table.clone(), col.clone())),
            None => Ok(()),
        }
    }

    fn opt<T>(
        &self,
        col: &str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        match self.get(col) {
            None => Ok(None),
            Some(e) if is_null(e) => Ok(None),
            Some(e) => parse(e).map(Some).map_err(|err| err.in_column(col)),
        }
    }

    fn req<T>(
        &self,
        col: &'static str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        self.opt(col, parse)?.ok_or(SqlError::MissingColumn(col))
    }

    fn patch<T>(
        &self,
        col: &str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<Option<T>>, SqlError> {
        match self.get(col) {
            None => Ok(None),
            Some(e) if is_null(e) => Ok(Some(None)),
            Some(e) => parse(e).map(|v| Some(Some(v))).map_err(|err| err.in_column(col)),
        }
    }

    /// Euros in `euros` or whole cents in `cents`, with patch semantics.
    fn money(&self, euros: &str, cents: &str) -> Result<Option<Option<i64>>, SqlError> {
        match self.patch(cents, parse_i64_expr)? {
            Some(v) => Ok(Some(v)),
            None => self.patch(euros, parse_cents),
        }
    }
}

fn insert_rows(table: &str, insert: &ast::Insert) -> Result<Vec<Fields>, SqlError> {
    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns(table)
            .ok_or_else(|| SqlError::UnknownTable(table.to_string()))?
            .iter()
            .map(|c| c.to_string())
            .collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };

    extract_all_insert_rows(insert)?
        .into_iter()
        .map(|values| {
            if values.len() > columns.len() {
                return Err(SqlError::WrongArity(table.to_string(), columns.len(), values.len()));
            }
            Ok(Fields {
                table: table.to_string(),
                entries: columns.iter().cloned().zip(values).collect(),
            })
        })
        .collect()
}

fn single_row(table: &str, mut rows: Vec<Fields>) -> Result<Fields, SqlError> {
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!(
            "{table}: one row per INSERT, got {}",
            rows.len()
        )));
    }
    rows.pop().ok_or(SqlError::Empty)
}

fn assignment_fields(table: &str, assignments: &[ast::Assignment]) -> Result<Fields, SqlError> {
    let mut entries = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        entries.push((col, a.value.clone()));
    }
    Ok(Fields {
        table: table.to_string(),
        entries,
    })
}

/// `col = value` conditions joined by AND.
fn where_fields(table: &str, selection: &Option<Expr>) -> Result<Fields, SqlError> {
    let mut entries = Vec::new();
    if let Some(expr) = selection {
        collect_filters(expr, &mut entries)?;
    }
    Ok(Fields {
        table: table.to_string(),
        entries,
    })
}

fn collect_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, out)?;
                collect_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let (col, value) = match (expr_column_name(left), expr_column_name(right)) {
                    (Some(col), _) => (col, right),
                    (None, Some(col)) => (col, left),
                    (None, None) => return Err(SqlError::Unsupported(format!("filter {expr}"))),
                };
                out.push((col, value.as_ref().clone()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        },
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s))
        | Some(Value::EscapedStringLiteral(s))
        | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::DollarQuotedString(s)) => Ok(s.value.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64_expr(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// ISO `YYYY-MM-DD`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_cents(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_cents(expr)?);
    }
    cents_from_decimal(&parse_text(expr)?)
}

/// Decimal euros with `.` or `,` and at most two fraction digits, in cents.
fn cents_from_decimal(s: &str) -> Result<i64, SqlError> {
    let bad = || SqlError::Parse(format!("bad amount: {s}"));
    let trimmed = s.trim().trim_end_matches('€').trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let normalized = digits.replace(',', ".");
    let (whole, frac) = normalized.split_once('.').unwrap_or((&normalized, ""));
    if (whole.is_empty() && frac.is_empty())
        || frac.len() > 2
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(bad());
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| bad())? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| bad())? * 10,
        _ => frac.parse().map_err(|_| bad())?,
    };
    let cents = whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(bad)?;
    Ok(if negative { -cents } else { cents })
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_text(expr)?;
    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown role: {s}")))
}

fn parse_method(expr: &Expr) -> Result<PaymentMethod, SqlError> {
    let s = parse_text(expr)?;
    PaymentMethod::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown payment method: {s}")))
}

fn parse_mode(expr: &Expr) -> Result<ImportMode, SqlError> {
    let s = parse_text(expr)?;
    ImportMode::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown import mode: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String, String),
    WrongArity(String, usize, usize),
    MissingColumn(&'static str),
    BadValue(String, String),
}

impl SqlError {
    fn in_column(self, col: &str) -> SqlError {
        match self {
            SqlError::Parse(msg) => SqlError::BadValue(col.to_string(), msg),
            other => other,
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing value for {col}"),
            SqlError::BadValue(col, msg) => write!(f, "{col}: {msg}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const EV: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const P1: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const P2: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parse_insert_event() {
        let sql = format!(
            "INSERT INTO events (id, name, start_date, end_date, location, fee) \
             VALUES ('{EV}', 'Winterfreizeit', '2025-12-22', '2025-12-28', 'Aachen', '150,50')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertEvent(e) => {
                assert_eq!(e.id.to_string(), EV);
                assert_eq!(e.year, 2025);
                assert_eq!(e.start_date, d("2025-12-22"));
                assert_eq!(e.fee_cents, Some(15_050));
            }
            _ => panic!("expected InsertEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_event_positional() {
        let sql = format!(
            "INSERT INTO events VALUES ('{EV}', 'Sommerlager', 2026, '2026-07-01', '2026-07-10', 'Eifel')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertEvent(e) => {
                assert_eq!(e.name, "Sommerlager");
                assert_eq!(e.year, 2026);
                assert_eq!(e.fee_cents, None);
            }
            _ => panic!("expected InsertEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_event_clears_fee() {
        let sql = format!("UPDATE events SET location = 'Köln', fee = NULL WHERE id = '{EV}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateEvent { id, patch } => {
                assert_eq!(id.to_string(), EV);
                assert_eq!(patch.location.as_deref(), Some("Köln"));
                assert_eq!(patch.fee_cents, Some(None));
                assert_eq!(patch.name, None);
            }
            _ => panic!("expected UpdateEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room() {
        let sql = format!(
            "INSERT INTO rooms (event_id, name, capacity, floor) VALUES ('{EV}', '101', 4, 'EG')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertRoom(r) => {
                assert_eq!(r.event_id.to_string(), EV);
                assert_eq!(r.capacity, 4);
                assert_eq!(r.floor.as_deref(), Some("EG"));
                assert_eq!(r.description, None);
            }
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_participant_with_open_end() {
        let sql = format!(
            "INSERT INTO participants (event_id, first_name, last_name, role, arrival, departure, city) \
             VALUES ('{EV}', 'Ayşe', 'Yılmaz', 'helper', '2025-12-22', NULL, 'Köln')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertParticipant(p) => {
                assert_eq!(p.first_name, "Ayşe");
                assert_eq!(p.role, Role::Helper);
                assert_eq!(p.stay, Stay::new(Some(d("2025-12-22")), None));
                assert_eq!(p.city.as_deref(), Some("Köln"));
                assert_eq!(p.room_id, None);
            }
            _ => panic!("expected InsertParticipant, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_participant_assigns_room() {
        let sql = format!("UPDATE participants SET room_id = '{P2}', departure = NULL WHERE id = '{P1}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateParticipant { id, patch, room } => {
                assert_eq!(id.to_string(), P1);
                assert_eq!(room, Some(Some(Ulid::from_string(P2).unwrap())));
                assert_eq!(patch.departure, Some(None));
                assert_eq!(patch.arrival, None);
            }
            _ => panic!("expected UpdateParticipant, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_participant_unassigns_room() {
        let sql = format!("UPDATE participants SET room_id = NULL WHERE id = '{P1}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateParticipant { patch, room, .. } => {
                assert_eq!(room, Some(None));
                assert!(patch.is_empty());
            }
            _ => panic!("expected UpdateParticipant, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_participants_with_filters() {
        let sql = format!(
            "SELECT * FROM participants WHERE event_id = '{EV}' AND role = 'abi' AND has_paid = false"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectParticipants { event_id, filter } => {
                assert_eq!(event_id.to_string(), EV);
                assert_eq!(filter.role, Some(Role::Abi));
                assert_eq!(filter.has_paid, Some(false));
                assert_eq!(filter.checked_in, None);
            }
            _ => panic!("expected SelectParticipants, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_single_participant() {
        let sql = format!("SELECT * FROM participants WHERE id = '{P1}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectParticipant { id: Ulid::from_string(P1).unwrap() }
        );
    }

    #[test]
    fn parse_room_availability_by_stay() {
        let sql = format!(
            "SELECT * FROM room_availability WHERE event_id = '{EV}' AND departure = '2025-12-24'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectRoomAvailability(AvailabilityTarget::Stay { stay, .. }) => {
                assert_eq!(stay, Stay::new(None, Some(d("2025-12-24"))));
            }
            _ => panic!("expected SelectRoomAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_room_availability_by_participant() {
        let sql = format!("SELECT * FROM room_availability WHERE participant_id = '{P1}'");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectRoomAvailability(AvailabilityTarget::Participant(
                Ulid::from_string(P1).unwrap()
            ))
        );
    }

    #[test]
    fn parse_payment_amounts() {
        for (amount, cents) in [("150", 15_000), ("150.5", 15_050), ("'150,50'", 15_050), ("'0,05'", 5)] {
            let sql = format!("INSERT INTO payments (participant_id, amount, method) VALUES ('{P1}', {amount}, 'cash')");
            let cmd = parse_sql(&sql).unwrap();
            match cmd {
                Command::InsertPayment { amount_cents, method, .. } => {
                    assert_eq!(amount_cents, Some(cents), "amount {amount}");
                    assert_eq!(method, Some(PaymentMethod::Cash));
                }
                _ => panic!("expected InsertPayment, got {cmd:?}"),
            }
        }
    }

    #[test]
    fn bad_amount_names_column() {
        let sql = format!("INSERT INTO payments (participant_id, amount) VALUES ('{P1}', '1,234')");
        let err = parse_sql(&sql).unwrap_err();
        assert!(matches!(err, SqlError::BadValue(ref col, _) if col == "amount"), "{err}");
    }

    #[test]
    fn parse_delete_payment_and_check_in() {
        let id = Ulid::from_string(P1).unwrap();
        let sql = format!("DELETE FROM payments WHERE participant_id = '{P1}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeletePayment { participant_id: id });
        let sql = format!("INSERT INTO check_ins (participant_id) VALUES ('{P1}')");
        assert_eq!(parse_sql(&sql).unwrap(), Command::InsertCheckIn { participant_id: id });
        let sql = format!("DELETE FROM check_ins WHERE participant_id = '{P1}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteCheckIn { participant_id: id });
    }

    #[test]
    fn parse_import() {
        let sql = format!(
            "INSERT INTO participant_imports (event_id, mode, csv) VALUES ('{EV}', 'replace', E'Vorname;Nachname\\nAli;Kaya')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::ImportParticipants { mode, csv, .. } => {
                assert_eq!(mode, ImportMode::Replace);
                assert_eq!(csv, "Vorname;Nachname\nAli;Kaya");
            }
            _ => panic!("expected ImportParticipants, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_members() {
        let sql = format!(
            "INSERT INTO workshop_members (workshop_id, participant_id) VALUES ('{EV}', '{P1}'), ('{EV}', '{P2}')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::BatchInsertMembers { participant_ids, is_helper, .. } => {
                assert_eq!(participant_ids.len(), 2);
                assert!(!is_helper);
            }
            _ => panic!("expected BatchInsertMembers, got {cmd:?}"),
        }
    }

    #[test]
    fn batch_members_must_share_workshop() {
        let sql = format!(
            "INSERT INTO workshop_members (workshop_id, participant_id) VALUES ('{EV}', '{P1}'), ('{P2}', '{P1}')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_toggle_helper() {
        let sql = format!(
            "UPDATE workshop_members SET is_helper = NOT is_helper WHERE workshop_id = '{EV}' AND participant_id = '{P1}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateMember { is_helper, .. } => assert_eq!(is_helper, HelperUpdate::Toggle),
            _ => panic!("expected UpdateMember, got {cmd:?}"),
        }

        let sql = format!(
            "UPDATE workshop_members SET is_helper = true WHERE workshop_id = '{EV}' AND participant_id = '{P1}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateMember { is_helper, .. } => assert_eq!(is_helper, HelperUpdate::Set(true)),
            _ => panic!("expected UpdateMember, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_workshop_with_default_size() {
        let sql = format!("INSERT INTO workshops (event_id, name) VALUES ('{EV}', 'Kalligraphie')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertWorkshop(w) => {
                assert_eq!(w.max_participants, DEFAULT_WORKSHOP_SIZE);
                assert_eq!(w.workshop_room_id, None);
            }
            _ => panic!("expected InsertWorkshop, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_stats_views() {
        let id = Ulid::from_string(EV).unwrap();
        for (table, kind) in [
            ("statistics", StatsKind::Statistics),
            ("city_stats", StatsKind::Cities),
            ("country_stats", StatsKind::Countries),
            ("finance_stats", StatsKind::Finance),
            ("workshop_stats", StatsKind::Workshops),
        ] {
            let sql = format!("SELECT * FROM {table} WHERE event_id = '{EV}'");
            assert_eq!(parse_sql(&sql).unwrap(), Command::SelectStats { event_id: id, kind });
        }
    }

    #[test]
    fn parse_daily_report() {
        let sql = format!("SELECT * FROM daily_report WHERE date = '2025-12-24' AND event_id = '{EV}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectDailyReport { date, .. } => assert_eq!(date, d("2025-12-24")),
            _ => panic!("expected SelectDailyReport, got {cmd:?}"),
        }
    }

    #[test]
    fn missing_filter_reported() {
        let err = parse_sql("SELECT * FROM rooms").unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("event_id")));
        let err = parse_sql("DELETE FROM events").unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("id")));
    }

    #[test]
    fn unknown_column_rejected() {
        let sql = format!("INSERT INTO rooms (event_id, name, capacity, beds) VALUES ('{EV}', '1', 2, 2)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(_, ref c)) if c == "beds"));
    }

    #[test]
    fn range_filters_unsupported() {
        let sql = format!("SELECT * FROM rooms WHERE event_id = '{EV}' AND capacity > 2");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn unknown_table() {
        let err = parse_sql("SELECT * FROM bookings WHERE id = '1'").unwrap_err();
        assert!(matches!(err, SqlError::UnknownTable(ref t) if t == "bookings"));
    }

    #[test]
    fn result_table_with_placeholders() {
        assert_eq!(
            result_table("SELECT * FROM room_availability WHERE participant_id = $1").as_deref(),
            Some("room_availability")
        );
        assert_eq!(
            result_table("INSERT INTO participant_imports (event_id, mode, csv) VALUES ($1, $2, $3)").as_deref(),
            Some("participant_imports")
        );
        assert_eq!(result_table("DELETE FROM rooms WHERE id = $1"), None);
    }

    #[test]
    fn decimal_amounts() {
        assert_eq!(cents_from_decimal("150").unwrap(), 15_000);
        assert_eq!(cents_from_decimal(" 12,5 € ").unwrap(), 1_250);
        assert_eq!(cents_from_decimal(",99").unwrap(), 99);
        assert_eq!(cents_from_decimal("-3").unwrap(), -300);
        assert!(cents_from_decimal("1.234").is_err());
        assert!(cents_from_decimal("abc").is_err());
        assert!(cents_from_decimal("").is_err());
    }
}
