use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::HerbergeAuthSource;
use crate::engine::{Engine, RoomFit};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, AvailabilityTarget, Command, HelperUpdate, StatsKind};
use crate::tenant::TenantManager;

/// Rows shown by `recent_participants`.
const RECENT_LIMIT: usize = 5;

pub struct HerbergeHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<HerbergeQueryParser>,
}

impl HerbergeHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(HerbergeQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(|e| {
            metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::debug!("{label} failed: {e}");
        }
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            // ── Events ──
            Command::InsertEvent(event) => {
                engine.create_event(event).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::UpdateEvent { id, patch } => {
                let current = engine.event(id).map_err(engine_err)?;
                engine
                    .update_event(patch.apply_to(current))
                    .await
                    .map_err(engine_err)?;
                Ok(done("UPDATE", 1))
            }
            Command::DeleteEvent { id } => {
                engine.delete_event(id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::SelectEvents { id } => {
                let events = match id {
                    Some(id) => vec![engine.event(id).map_err(engine_err)?],
                    None => engine.list_events(),
                };
                Ok(query_response(&event_schema(), events, encode_event))
            }
            Command::SelectCurrentEvent => Ok(query_response(
                &event_schema(),
                engine.current_event(),
                encode_event,
            )),

            // ── Rooms ──
            Command::InsertRoom(room) => {
                engine.create_room(room).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::UpdateRoom { id, patch } => {
                let current = engine.room(id).await.map_err(engine_err)?;
                engine
                    .update_room(patch.apply_to(current))
                    .await
                    .map_err(engine_err)?;
                Ok(done("UPDATE", 1))
            }
            Command::DeleteRoom { id } => {
                let unassigned = engine.delete_room(id).await.map_err(engine_err)?;
                tracing::debug!("room {id} deleted, {unassigned} participants unassigned");
                Ok(done("DELETE", 1))
            }
            Command::SelectRooms { event_id } => {
                let rooms = engine.list_rooms(event_id).await;
                Ok(query_response(&room_schema(), rooms, |enc, r| {
                    let occupants: Vec<_> = r
                        .occupants
                        .iter()
                        .map(|p| serde_json::json!({ "id": p.id.to_string(), "name": p.full_name() }))
                        .collect();
                    encode_room(enc, &r.room)?;
                    enc.encode_field(&(r.occupants.len() as i64))?;
                    enc.encode_field(&serde_json::Value::Array(occupants).to_string())
                }))
            }
            Command::SelectRoomOccupancy { event_id } => {
                let rows = engine.room_occupancy(event_id).await;
                Ok(query_response(&occupancy_schema(), rows, |enc, o| {
                    enc.encode_field(&o.room.id.to_string())?;
                    enc.encode_field(&o.room.name)?;
                    enc.encode_field(&i64::from(o.room.capacity))?;
                    enc.encode_field(&(o.occupied as i64))?;
                    enc.encode_field(&(o.available as i64))?;
                    enc.encode_field(&o.is_full)
                }))
            }
            Command::SelectRoomAvailability(target) => {
                let fits = match target {
                    AvailabilityTarget::Participant(id) => engine.room_availability_for(id).await,
                    AvailabilityTarget::Stay { event_id, stay } => {
                        engine.room_availability(event_id, &stay, None).await
                    }
                }
                .map_err(engine_err)?;
                Ok(query_response(
                    &availability_schema(),
                    fits,
                    |enc, (room, fit): (Room, RoomFit)| {
                        enc.encode_field(&room.id.to_string())?;
                        enc.encode_field(&room.name)?;
                        enc.encode_field(&i64::from(room.capacity))?;
                        enc.encode_field(&(fit.overlapping as i64))?;
                        enc.encode_field(&i64::from(fit.free_slots))?;
                        enc.encode_field(&fit.has_space)
                    },
                ))
            }

            // ── Participants ──
            Command::InsertParticipant(p) => {
                engine.register_participant(p).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::UpdateParticipant { id, patch, room } => {
                let updated = engine
                    .update_participant_and_room(id, &patch, room)
                    .await
                    .map_err(engine_err)?;
                if room.is_some() {
                    tracing::debug!("participant {id} now in room {:?}", updated.room_id);
                }
                Ok(done("UPDATE", 1))
            }
            Command::DeleteParticipant { id } => {
                engine.delete_participant(id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::SelectParticipant { id } => {
                let p = engine.participant(id).map_err(engine_err)?;
                Ok(participant_rows(vec![p]))
            }
            Command::SelectParticipants { event_id, filter } => {
                Ok(participant_rows(engine.list_participants(event_id, &filter)))
            }
            Command::SelectRecentParticipants { event_id } => Ok(participant_rows(
                engine.recent_participants(event_id, RECENT_LIMIT),
            )),

            // ── Payments, check-in, import ──
            Command::InsertPayment {
                participant_id,
                amount_cents,
                method,
            } => {
                engine
                    .mark_paid(participant_id, amount_cents, method)
                    .await
                    .map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::DeletePayment { participant_id } => {
                engine.mark_unpaid(participant_id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::InsertCheckIn { participant_id } => {
                engine.check_in(participant_id).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::DeleteCheckIn { participant_id } => {
                engine.check_out(participant_id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::ImportParticipants {
                event_id,
                mode,
                csv,
            } => {
                let report = engine
                    .import_participants(event_id, &csv, mode)
                    .await
                    .map_err(engine_err)?;
                tracing::info!(
                    "import into {event_id}: {} added, {} skipped, {} errors",
                    report.added,
                    report.skipped,
                    report.errors.len()
                );
                Ok(query_response(&import_schema(), [report], |enc, r| {
                    enc.encode_field(&(r.added as i64))?;
                    enc.encode_field(&(r.skipped as i64))?;
                    enc.encode_field(&r.errors.join("\n"))
                }))
            }

            // ── Workshop rooms ──
            Command::InsertWorkshopRoom(room) => {
                engine.create_workshop_room(room).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::UpdateWorkshopRoom { id, patch } => {
                let current = engine.workshop_room(id).map_err(engine_err)?;
                engine
                    .update_workshop_room(patch.apply_to(current))
                    .await
                    .map_err(engine_err)?;
                Ok(done("UPDATE", 1))
            }
            Command::DeleteWorkshopRoom { id } => {
                engine.delete_workshop_room(id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::SeedWorkshopRooms { event_id } => {
                let report = engine.seed_workshop_rooms(event_id).await.map_err(engine_err)?;
                Ok(query_response(&bulk_schema(), [report], |enc, r| {
                    enc.encode_field(&(r.added as i64))?;
                    enc.encode_field(&(r.skipped as i64))
                }))
            }
            Command::SelectWorkshopRooms { event_id } => Ok(query_response(
                &workshop_room_schema(),
                engine.list_workshop_rooms(event_id),
                encode_workshop_room,
            )),
            Command::SelectAvailableWorkshopRooms { event_id, keep_for } => Ok(query_response(
                &workshop_room_schema(),
                engine.available_workshop_rooms(event_id, keep_for),
                encode_workshop_room,
            )),

            // ── Workshops ──
            Command::InsertWorkshop(workshop) => {
                engine.create_workshop(workshop).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::UpdateWorkshop { id, patch } => {
                let current = engine.workshop(id).map_err(engine_err)?.workshop;
                engine
                    .update_workshop(patch.apply_to(current))
                    .await
                    .map_err(engine_err)?;
                Ok(done("UPDATE", 1))
            }
            Command::DeleteWorkshop { id } => {
                engine.delete_workshop(id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::SelectWorkshops { event_id } => Ok(query_response(
                &workshop_schema(),
                engine.list_workshops(event_id),
                |enc, ws| {
                    let w = &ws.workshop;
                    enc.encode_field(&w.id.to_string())?;
                    enc.encode_field(&w.event_id.to_string())?;
                    enc.encode_field(&w.name)?;
                    enc.encode_field(&w.description)?;
                    enc.encode_field(&i64::from(w.max_participants))?;
                    enc.encode_field(&w.workshop_room_id.map(|id| id.to_string()))?;
                    enc.encode_field(&(ws.leaders.len() as i64))?;
                    enc.encode_field(&(ws.members.len() as i64))?;
                    enc.encode_field(&ws.is_full())
                },
            )),

            // ── Leaders & members ──
            Command::InsertLeader {
                workshop_id,
                participant_id,
            } => {
                engine
                    .add_leader(workshop_id, participant_id)
                    .await
                    .map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::DeleteLeader {
                workshop_id,
                participant_id,
            } => {
                engine
                    .remove_leader(workshop_id, participant_id)
                    .await
                    .map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::SelectLeaders { workshop_id } => {
                let ws = engine.workshop(workshop_id).map_err(engine_err)?;
                let leaders = ws
                    .leaders
                    .iter()
                    .filter_map(|id| engine.participant(*id).ok())
                    .collect();
                Ok(participant_rows(leaders))
            }
            Command::SelectAvailableLeaders { workshop_id } => Ok(participant_rows(
                engine.available_leaders(workshop_id).map_err(engine_err)?,
            )),
            Command::InsertMember {
                workshop_id,
                participant_id,
                is_helper,
            } => {
                engine
                    .add_member(workshop_id, participant_id, is_helper)
                    .await
                    .map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::BatchInsertMembers {
                workshop_id,
                participant_ids,
                is_helper,
            } => {
                let report = engine
                    .add_members(workshop_id, &participant_ids, is_helper)
                    .await
                    .map_err(engine_err)?;
                Ok(done("INSERT", report.added))
            }
            Command::UpdateMember {
                workshop_id,
                participant_id,
                is_helper,
            } => {
                match is_helper {
                    HelperUpdate::Set(flag) => engine
                        .set_member_helper(workshop_id, participant_id, flag)
                        .await
                        .map_err(engine_err)?,
                    HelperUpdate::Toggle => {
                        engine
                            .toggle_member_helper(workshop_id, participant_id)
                            .await
                            .map_err(engine_err)?;
                    }
                }
                Ok(done("UPDATE", 1))
            }
            Command::DeleteMember {
                workshop_id,
                participant_id,
            } => {
                engine
                    .remove_member(workshop_id, participant_id)
                    .await
                    .map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::SelectMembers { workshop_id } => {
                let ws = engine.workshop(workshop_id).map_err(engine_err)?;
                let members: Vec<(Participant, bool)> = ws
                    .members
                    .iter()
                    .filter_map(|m| engine.participant(m.participant_id).ok().map(|p| (p, m.is_helper)))
                    .collect();
                Ok(query_response(&member_schema(), members, |enc, (p, is_helper)| {
                    enc.encode_field(&p.id.to_string())?;
                    enc.encode_field(&p.first_name)?;
                    enc.encode_field(&p.last_name)?;
                    enc.encode_field(&p.role.as_str())?;
                    enc.encode_field(&is_helper)
                }))
            }
            Command::SelectAvailableMembers { workshop_id } => Ok(participant_rows(
                engine.available_members(workshop_id).map_err(engine_err)?,
            )),

            // ── Reports ──
            Command::SelectDailyReport { event_id, date } => {
                let report = engine.daily_report(event_id, date).await.map_err(engine_err)?;
                Ok(query_response(&daily_report_schema(), daily_rows(report), |enc, row| {
                    enc.encode_field(&row.section)?;
                    enc.encode_field(&row.room.as_ref().map(|r| r.id.to_string()))?;
                    enc.encode_field(&row.room.as_ref().map(|r| r.name.clone()))?;
                    let p = row.participant.as_ref();
                    enc.encode_field(&p.map(|p| p.id.to_string()))?;
                    enc.encode_field(&p.map(|p| p.first_name.clone()))?;
                    enc.encode_field(&p.map(|p| p.last_name.clone()))?;
                    enc.encode_field(&p.and_then(|p| p.stay.arrival).map(|d| d.to_string()))?;
                    enc.encode_field(&p.and_then(|p| p.stay.departure).map(|d| d.to_string()))
                }))
            }
            Command::SelectStats { event_id, kind } => self.stats(engine, event_id, kind).await,
        }
    }

    async fn stats(&self, engine: &Engine, event_id: Ulid, kind: StatsKind) -> PgWireResult<Response> {
        match kind {
            StatsKind::Statistics => {
                let s = engine.statistics(event_id).await.map_err(engine_err)?;
                Ok(query_response(&statistics_schema(), [s], |enc, s| {
                    enc.encode_field(&(s.total_participants as i64))?;
                    enc.encode_field(&(s.checked_in as i64))?;
                    enc.encode_field(&(s.paid as i64))?;
                    enc.encode_field(&(s.unpaid as i64))?;
                    enc.encode_field(&(s.rooms as i64))?;
                    enc.encode_field(&(s.occupied_beds as i64))?;
                    enc.encode_field(&(s.total_beds as i64))?;
                    enc.encode_field(&(s.helpers as i64))?;
                    enc.encode_field(&(s.abi_guests as i64))
                }))
            }
            StatsKind::Cities | StatsKind::Countries | StatsKind::Roles => {
                let shares = match kind {
                    StatsKind::Cities => engine.city_stats(event_id),
                    StatsKind::Countries => engine.country_stats(event_id),
                    _ => engine.role_stats(event_id),
                }
                .map_err(engine_err)?;
                Ok(query_response(&share_schema(), shares, |enc, s| {
                    enc.encode_field(&s.label)?;
                    enc.encode_field(&(s.count as i64))?;
                    enc.encode_field(&s.percentage)
                }))
            }
            StatsKind::Payments => {
                let s = engine.payment_stats(event_id).map_err(engine_err)?;
                Ok(query_response(&payment_stats_schema(), [s], |enc, s| {
                    enc.encode_field(&(s.paid as i64))?;
                    enc.encode_field(&(s.unpaid as i64))?;
                    enc.encode_field(&s.total_amount_cents)
                }))
            }
            StatsKind::Finance => {
                let f = engine.finance_stats(event_id).map_err(engine_err)?;
                Ok(query_response(&finance_schema(), [f], |enc, f| {
                    for n in [
                        f.total,
                        f.paid,
                        f.unpaid,
                        f.paid_percentage as usize,
                        f.fully_paid,
                        f.partially_paid,
                        f.paid_without_amount,
                    ] {
                        enc.encode_field(&(n as i64))?;
                    }
                    for cents in [
                        f.total_amount_cents,
                        f.cash_amount_cents,
                        f.transfer_amount_cents,
                        f.unknown_method_amount_cents,
                    ] {
                        enc.encode_field(&cents)?;
                    }
                    for n in [f.cash_count, f.transfer_count, f.unknown_method_count] {
                        enc.encode_field(&(n as i64))?;
                    }
                    enc.encode_field(&f.full_payment_threshold_cents)
                }))
            }
            StatsKind::FinanceByRole => {
                let f = engine.finance_stats(event_id).map_err(engine_err)?;
                Ok(query_response(&role_payment_schema(), f.by_role, |enc, r| {
                    enc.encode_field(&r.role.as_str())?;
                    enc.encode_field(&(r.paid as i64))?;
                    enc.encode_field(&(r.unpaid as i64))
                }))
            }
            StatsKind::PartialPayments => {
                let f = engine.finance_stats(event_id).map_err(engine_err)?;
                Ok(participant_rows(f.partially_paid_list))
            }
            StatsKind::Workshops => {
                let s = engine.workshop_stats(event_id).map_err(engine_err)?;
                Ok(query_response(&workshop_stats_schema(), s.workshops, |enc, w| {
                    enc.encode_field(&w.workshop.id.to_string())?;
                    enc.encode_field(&w.workshop.name)?;
                    enc.encode_field(&(w.leaders as i64))?;
                    enc.encode_field(&(w.members as i64))?;
                    enc.encode_field(&i64::from(w.workshop.max_participants))?;
                    enc.encode_field(&w.is_full)
                }))
            }
        }
    }
}

fn done(tag: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(tag).with_rows(rows))
}

/// Encode every item into a row of `schema`.
fn query_response<T>(
    schema: &[FieldInfo],
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema.to_vec());
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn participant_rows(participants: Vec<Participant>) -> Response {
    query_response(&participant_schema(), participants, |enc, p| {
        encode_participant(enc, &p)
    })
}

fn date_text(d: Option<chrono::NaiveDate>) -> Option<String> {
    d.map(|d| d.to_string())
}

fn encode_event(enc: &mut DataRowEncoder, e: Event) -> PgWireResult<()> {
    enc.encode_field(&e.id.to_string())?;
    enc.encode_field(&e.name)?;
    enc.encode_field(&e.year)?;
    enc.encode_field(&e.start_date.to_string())?;
    enc.encode_field(&e.end_date.to_string())?;
    enc.encode_field(&e.location)?;
    enc.encode_field(&e.fee_cents)
}

fn encode_room(enc: &mut DataRowEncoder, r: &Room) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.event_id.to_string())?;
    enc.encode_field(&r.name)?;
    enc.encode_field(&r.floor)?;
    enc.encode_field(&i64::from(r.capacity))?;
    enc.encode_field(&r.description)
}

fn encode_participant(enc: &mut DataRowEncoder, p: &Participant) -> PgWireResult<()> {
    enc.encode_field(&p.id.to_string())?;
    enc.encode_field(&p.event_id.to_string())?;
    enc.encode_field(&p.first_name)?;
    enc.encode_field(&p.last_name)?;
    enc.encode_field(&p.email)?;
    enc.encode_field(&p.phone)?;
    enc.encode_field(&p.street)?;
    enc.encode_field(&p.house_number)?;
    enc.encode_field(&p.postal_code)?;
    enc.encode_field(&p.city)?;
    enc.encode_field(&p.notes)?;
    enc.encode_field(&p.role.as_str())?;
    enc.encode_field(&p.age.map(i64::from))?;
    enc.encode_field(&date_text(p.birth_date))?;
    enc.encode_field(&date_text(p.stay.arrival))?;
    enc.encode_field(&date_text(p.stay.departure))?;
    enc.encode_field(&p.room_id.map(|id| id.to_string()))?;
    enc.encode_field(&p.payment.has_paid)?;
    enc.encode_field(&p.payment.amount_cents)?;
    enc.encode_field(&p.payment.method.map(|m| m.as_str()))?;
    enc.encode_field(&p.payment.paid_at)?;
    enc.encode_field(&p.checked_in_at)
}

fn encode_workshop_room(enc: &mut DataRowEncoder, r: WorkshopRoom) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.event_id.to_string())?;
    enc.encode_field(&r.name)?;
    enc.encode_field(&r.description)?;
    enc.encode_field(&r.capacity.map(i64::from))
}

struct DailyRow {
    section: &'static str,
    room: Option<Room>,
    participant: Option<Participant>,
}

/// One row per room occupant (or one empty row per empty room), then the
/// present, arrival and departure lists.
fn daily_rows(report: DailyReport) -> Vec<DailyRow> {
    let mut rows = Vec::new();
    for r in report.rooms {
        if r.occupants.is_empty() {
            rows.push(DailyRow { section: "room", room: Some(r.room), participant: None });
            continue;
        }
        for p in r.occupants {
            rows.push(DailyRow { section: "room", room: Some(r.room.clone()), participant: Some(p) });
        }
    }
    for (section, list) in [
        ("present", report.present),
        ("arrival", report.arrivals),
        ("departure", report.departures),
    ] {
        rows.extend(list.into_iter().map(|p| DailyRow { section, room: None, participant: Some(p) }));
    }
    rows
}

// ── Result schemas ───────────────────────────────────────────────

fn col(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text_cols(names: &[&str]) -> Vec<FieldInfo> {
    names.iter().map(|n| col(n, Type::VARCHAR)).collect()
}

fn event_schema() -> Vec<FieldInfo> {
    vec![
        col("id", Type::VARCHAR),
        col("name", Type::VARCHAR),
        col("year", Type::INT4),
        col("start_date", Type::VARCHAR),
        col("end_date", Type::VARCHAR),
        col("location", Type::VARCHAR),
        col("fee_cents", Type::INT8),
    ]
}

fn room_schema() -> Vec<FieldInfo> {
    let mut cols = text_cols(&["id", "event_id", "name", "floor"]);
    cols.push(col("capacity", Type::INT8));
    cols.push(col("description", Type::VARCHAR));
    cols.push(col("occupied", Type::INT8));
    cols.push(col("occupants", Type::VARCHAR));
    cols
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        col("room_id", Type::VARCHAR),
        col("name", Type::VARCHAR),
        col("capacity", Type::INT8),
        col("occupied", Type::INT8),
        col("available", Type::INT8),
        col("is_full", Type::BOOL),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        col("room_id", Type::VARCHAR),
        col("name", Type::VARCHAR),
        col("capacity", Type::INT8),
        col("overlapping", Type::INT8),
        col("free_slots", Type::INT8),
        col("has_space", Type::BOOL),
    ]
}

fn participant_schema() -> Vec<FieldInfo> {
    let mut cols = text_cols(&[
        "id", "event_id", "first_name", "last_name", "email", "phone", "street", "house_number",
        "postal_code", "city", "notes", "role",
    ]);
    cols.push(col("age", Type::INT8));
    cols.extend(text_cols(&["birth_date", "arrival", "departure", "room_id"]));
    cols.push(col("has_paid", Type::BOOL));
    cols.push(col("amount_cents", Type::INT8));
    cols.push(col("payment_method", Type::VARCHAR));
    cols.push(col("paid_at", Type::INT8));
    cols.push(col("checked_in_at", Type::INT8));
    cols
}

fn member_schema() -> Vec<FieldInfo> {
    let mut cols = text_cols(&["participant_id", "first_name", "last_name", "role"]);
    cols.push(col("is_helper", Type::BOOL));
    cols
}

fn import_schema() -> Vec<FieldInfo> {
    vec![
        col("added", Type::INT8),
        col("skipped", Type::INT8),
        col("errors", Type::VARCHAR),
    ]
}

fn bulk_schema() -> Vec<FieldInfo> {
    vec![col("added", Type::INT8), col("skipped", Type::INT8)]
}

fn workshop_room_schema() -> Vec<FieldInfo> {
    let mut cols = text_cols(&["id", "event_id", "name", "description"]);
    cols.push(col("capacity", Type::INT8));
    cols
}

fn workshop_schema() -> Vec<FieldInfo> {
    let mut cols = text_cols(&["id", "event_id", "name", "description"]);
    cols.push(col("max_participants", Type::INT8));
    cols.push(col("workshop_room_id", Type::VARCHAR));
    cols.push(col("leaders", Type::INT8));
    cols.push(col("members", Type::INT8));
    cols.push(col("is_full", Type::BOOL));
    cols
}

fn daily_report_schema() -> Vec<FieldInfo> {
    text_cols(&[
        "section", "room_id", "room_name", "participant_id", "first_name", "last_name", "arrival",
        "departure",
    ])
}

fn statistics_schema() -> Vec<FieldInfo> {
    [
        "total_participants", "checked_in", "paid", "unpaid", "rooms", "occupied_beds",
        "total_beds", "helpers", "abi_guests",
    ]
    .iter()
    .map(|n| col(n, Type::INT8))
    .collect()
}

fn share_schema() -> Vec<FieldInfo> {
    vec![
        col("label", Type::VARCHAR),
        col("count", Type::INT8),
        col("percentage", Type::FLOAT8),
    ]
}

fn payment_stats_schema() -> Vec<FieldInfo> {
    vec![
        col("paid", Type::INT8),
        col("unpaid", Type::INT8),
        col("total_amount_cents", Type::INT8),
    ]
}

fn finance_schema() -> Vec<FieldInfo> {
    [
        "total", "paid", "unpaid", "paid_percentage", "fully_paid", "partially_paid",
        "paid_without_amount", "total_amount_cents", "cash_amount_cents", "transfer_amount_cents",
        "unknown_method_amount_cents", "cash_count", "transfer_count", "unknown_method_count",
        "full_payment_threshold_cents",
    ]
    .iter()
    .map(|n| col(n, Type::INT8))
    .collect()
}

fn role_payment_schema() -> Vec<FieldInfo> {
    vec![
        col("role", Type::VARCHAR),
        col("paid", Type::INT8),
        col("unpaid", Type::INT8),
    ]
}

fn workshop_stats_schema() -> Vec<FieldInfo> {
    vec![
        col("workshop_id", Type::VARCHAR),
        col("name", Type::VARCHAR),
        col("leaders", Type::INT8),
        col("members", Type::INT8),
        col("max_participants", Type::INT8),
        col("is_full", Type::BOOL),
    ]
}

/// Row shape of a statement, for Describe. Statements without rows get none.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let Some(table) = sql::result_table(sql) else {
        return vec![];
    };
    match table.as_str() {
        "events" | "current_event" => event_schema(),
        "rooms" => room_schema(),
        "room_occupancy" => occupancy_schema(),
        "room_availability" => availability_schema(),
        "participants" | "recent_participants" | "workshop_leaders" | "available_leaders"
        | "available_members" | "partial_payments" => participant_schema(),
        "workshop_members" => member_schema(),
        "participant_imports" => import_schema(),
        "workshop_room_seeds" => bulk_schema(),
        "workshop_rooms" | "available_workshop_rooms" => workshop_room_schema(),
        "workshops" => workshop_schema(),
        "daily_report" => daily_report_schema(),
        "statistics" => statistics_schema(),
        "city_stats" | "country_stats" | "role_stats" => share_schema(),
        "payment_stats" => payment_stats_schema(),
        "finance_stats" => finance_schema(),
        "finance_by_role" => role_payment_schema(),
        "workshop_stats" => workshop_stats_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for HerbergeHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HerbergeQueryParser;

#[async_trait]
impl QueryParser for HerbergeQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HerbergeHandler {
    type Statement = String;
    type QueryParser = HerbergeQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Replaced from the highest index down so `$1` never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HerbergeFactory {
    handler: Arc<HerbergeHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<HerbergeAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl HerbergeFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = HerbergeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(HerbergeHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HerbergeFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(HerbergeFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn person(first: &str, last: &str) -> Participant {
        Participant::new(Ulid::new(), Ulid::new(), first.into(), last.into())
    }

    fn room(name: &str) -> Room {
        Room {
            id: Ulid::new(),
            event_id: Ulid::new(),
            name: name.into(),
            floor: None,
            capacity: 2,
            description: None,
        }
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM rooms WHERE event_id = $1"), 1);
        assert_eq!(count_params("VALUES ($2, $1, $10)"), 10);
    }

    #[test]
    fn daily_rows_keep_empty_rooms() {
        let d = NaiveDate::from_ymd_opt(2025, 12, 24).unwrap();
        let ali = person("Ali", "Kaya");
        let report = DailyReport {
            date: d,
            rooms: vec![
                RoomWithOccupants { room: room("101"), occupants: vec![ali.clone()] },
                RoomWithOccupants { room: room("102"), occupants: vec![] },
            ],
            present: vec![ali.clone()],
            arrivals: vec![],
            departures: vec![person("Can", "Demir")],
        };
        let rows = daily_rows(report);
        let sections: Vec<_> = rows.iter().map(|r| r.section).collect();
        assert_eq!(sections, vec!["room", "room", "present", "departure"]);
        assert!(rows[1].participant.is_none());
        assert_eq!(rows[1].room.as_ref().map(|r| r.name.as_str()), Some("102"));
    }

    #[test]
    fn describe_schemas_follow_table() {
        let names = |sql: &str| -> Vec<String> {
            schema_for(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names("SELECT * FROM room_availability WHERE participant_id = $1"),
            vec!["room_id", "name", "capacity", "overlapping", "free_slots", "has_space"]
        );
        assert_eq!(names("SELECT * FROM city_stats WHERE event_id = $1")[0], "label");
        assert!(names("INSERT INTO rooms (event_id, name, capacity) VALUES ($1, $2, $3)").is_empty());
        assert_eq!(participant_schema().len(), 22);
    }
}
