use std::net::SocketAddr;

use crate::sql::{AvailabilityTarget, Command, StatsKind};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "herberge_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "herberge_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "herberge_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "herberge_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "herberge_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "herberge_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "herberge_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (changes per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "herberge_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged and the server runs without an exporter.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertEvent(_) => "insert_event",
        Command::UpdateEvent { .. } => "update_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::SelectEvents { .. } => "select_events",
        Command::SelectCurrentEvent => "select_current_event",
        Command::InsertRoom(_) => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectRoomOccupancy { .. } => "select_room_occupancy",
        Command::SelectRoomAvailability(AvailabilityTarget::Participant(_)) => {
            "select_room_availability_participant"
        }
        Command::SelectRoomAvailability(AvailabilityTarget::Stay { .. }) => {
            "select_room_availability_stay"
        }
        Command::InsertParticipant(_) => "insert_participant",
        Command::UpdateParticipant { room: Some(_), .. } => "assign_room",
        Command::UpdateParticipant { .. } => "update_participant",
        Command::DeleteParticipant { .. } => "delete_participant",
        Command::SelectParticipant { .. } => "select_participant",
        Command::SelectParticipants { .. } => "select_participants",
        Command::SelectRecentParticipants { .. } => "select_recent_participants",
        Command::InsertPayment { .. } => "insert_payment",
        Command::DeletePayment { .. } => "delete_payment",
        Command::InsertCheckIn { .. } => "check_in",
        Command::DeleteCheckIn { .. } => "check_out",
        Command::ImportParticipants { .. } => "import_participants",
        Command::InsertWorkshopRoom(_) => "insert_workshop_room",
        Command::UpdateWorkshopRoom { .. } => "update_workshop_room",
        Command::DeleteWorkshopRoom { .. } => "delete_workshop_room",
        Command::SeedWorkshopRooms { .. } => "seed_workshop_rooms",
        Command::SelectWorkshopRooms { .. } => "select_workshop_rooms",
        Command::SelectAvailableWorkshopRooms { .. } => "select_available_workshop_rooms",
        Command::InsertWorkshop(_) => "insert_workshop",
        Command::UpdateWorkshop { .. } => "update_workshop",
        Command::DeleteWorkshop { .. } => "delete_workshop",
        Command::SelectWorkshops { .. } => "select_workshops",
        Command::InsertLeader { .. } => "insert_leader",
        Command::DeleteLeader { .. } => "delete_leader",
        Command::SelectLeaders { .. } => "select_leaders",
        Command::SelectAvailableLeaders { .. } => "select_available_leaders",
        Command::InsertMember { .. } => "insert_member",
        Command::BatchInsertMembers { .. } => "batch_insert_members",
        Command::UpdateMember { .. } => "update_member",
        Command::DeleteMember { .. } => "delete_member",
        Command::SelectMembers { .. } => "select_members",
        Command::SelectAvailableMembers { .. } => "select_available_members",
        Command::SelectDailyReport { .. } => "select_daily_report",
        Command::SelectStats { kind, .. } => match kind {
            StatsKind::Statistics => "select_statistics",
            StatsKind::Cities => "select_city_stats",
            StatsKind::Countries => "select_country_stats",
            StatsKind::Roles => "select_role_stats",
            StatsKind::Payments => "select_payment_stats",
            StatsKind::Finance => "select_finance_stats",
            StatsKind::FinanceByRole => "select_finance_by_role",
            StatsKind::PartialPayments => "select_partial_payments",
            StatsKind::Workshops => "select_workshop_stats",
        },
    }
}
