use super::*;
use crate::import::ImportMode;
use chrono::NaiveDate;

/// A day of December 2025.
fn dec(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, day).unwrap()
}

fn stay(arrival: Option<u32>, departure: Option<u32>) -> Stay {
    Stay::new(arrival.map(dec), departure.map(dec))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("herberge_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(path.with_extension("wal.tmp"));
    path
}

fn winter_event(year: i32) -> Event {
    Event {
        id: Ulid::new(),
        name: "Winterfreizeit".into(),
        year,
        start_date: NaiveDate::from_ymd_opt(year, 12, 22).unwrap(),
        end_date: NaiveDate::from_ymd_opt(year, 12, 28).unwrap(),
        location: "Jugendherberge Aachen".into(),
        fee_cents: Some(15_000),
    }
}

async fn setup(name: &str) -> (Engine, Event) {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let event = winter_event(2025);
    engine.create_event(event.clone()).await.unwrap();
    (engine, event)
}

async fn add_room(engine: &Engine, event_id: Ulid, name: &str, capacity: u32) -> Ulid {
    let id = Ulid::new();
    engine
        .create_room(Room {
            id,
            event_id,
            name: name.into(),
            floor: None,
            capacity,
            description: None,
        })
        .await
        .unwrap();
    id
}

fn person(event_id: Ulid, first: &str, last: &str, s: Stay) -> Participant {
    let mut p = Participant::new(Ulid::new(), event_id, first.into(), last.into());
    p.stay = s;
    p
}

async fn register(engine: &Engine, event_id: Ulid, first: &str, last: &str, s: Stay) -> Ulid {
    let p = person(event_id, first, last, s);
    let id = p.id;
    engine.register_participant(p).await.unwrap();
    id
}

async fn occupant_ids(engine: &Engine, room_id: Ulid) -> Vec<Ulid> {
    let rs = engine.get_room(&room_id).unwrap();
    let guard = rs.read().await;
    guard.occupants.iter().map(|o| o.participant_id).collect()
}

// ── Events & rooms ───────────────────────────────────────

#[tokio::test]
async fn event_year_is_unique() {
    let (engine, event) = setup("event_year.wal").await;
    let again = winter_event(2025);
    assert!(matches!(
        engine.create_event(again).await,
        Err(EngineError::DuplicateYear(2025))
    ));
    assert_eq!(engine.list_events(), vec![event]);
}

#[tokio::test]
async fn event_ending_before_start_rejected() {
    let engine = Engine::new(test_wal_path("event_dates.wal")).unwrap();
    let mut event = winter_event(2025);
    event.end_date = dec(1);
    assert!(matches!(
        engine.create_event(event).await,
        Err(EngineError::InvalidDates(_))
    ));
}

#[tokio::test]
async fn events_listed_newest_first_and_current_by_year() {
    let engine = Engine::new(test_wal_path("event_order.wal")).unwrap();
    for year in [2023, 2025, 2024] {
        engine.create_event(winter_event(year)).await.unwrap();
    }
    let years: Vec<i32> = engine.list_events().iter().map(|e| e.year).collect();
    assert_eq!(years, vec![2025, 2024, 2023]);
    assert_eq!(engine.current_event_for_year(2024).unwrap().year, 2024);
    assert_eq!(engine.current_event_for_year(2030).unwrap().year, 2025);
}

#[tokio::test]
async fn room_needs_existing_event() {
    let engine = Engine::new(test_wal_path("room_no_event.wal")).unwrap();
    let result = engine
        .create_room(Room {
            id: Ulid::new(),
            event_id: Ulid::new(),
            name: "101".into(),
            floor: None,
            capacity: 2,
            description: None,
        })
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn zero_capacity_room_rejected() {
    let (engine, event) = setup("room_zero.wal").await;
    let result = engine
        .create_room(Room {
            id: Ulid::new(),
            event_id: event.id,
            name: "Abstellraum".into(),
            floor: None,
            capacity: 0,
            description: None,
        })
        .await;
    assert!(matches!(result, Err(EngineError::Invalid(_))));
}

#[tokio::test]
async fn lowering_capacity_below_occupancy_is_allowed() {
    let (engine, event) = setup("room_shrink.wal").await;
    let room_id = add_room(&engine, event.id, "101", 2).await;
    for name in ["Ali", "Ben"] {
        let id = register(&engine, event.id, name, "Test", Stay::open()).await;
        engine.assign_room(id, Some(room_id)).await.unwrap();
    }

    let mut room = engine.room(room_id).await.unwrap();
    room.capacity = 1;
    engine.update_room(room).await.unwrap();

    let occupancy = engine.room_occupancy(event.id).await;
    assert_eq!(occupancy[0].occupied, 2);
    assert_eq!(occupancy[0].available, 0);
    assert!(occupancy[0].is_full);
}

#[tokio::test]
async fn deleting_room_unassigns_occupants() {
    let (engine, event) = setup("room_delete.wal").await;
    let room_id = add_room(&engine, event.id, "101", 2).await;
    let pid = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    engine.assign_room(pid, Some(room_id)).await.unwrap();

    assert_eq!(engine.delete_room(room_id).await.unwrap(), 1);
    assert_eq!(engine.participant(pid).unwrap().room_id, None);
    assert!(engine.get_room(&room_id).is_none());
    assert!(engine.list_rooms(event.id).await.is_empty());
}

// ── Room assignment ──────────────────────────────────────

#[tokio::test]
async fn assign_reports_free_slots() {
    let (engine, event) = setup("assign_slots.wal").await;
    let room_id = add_room(&engine, event.id, "101", 3).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(26))).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(24), Some(28))).await;

    let fit = engine.assign_room(a, Some(room_id)).await.unwrap().unwrap();
    assert_eq!((fit.overlapping, fit.free_slots), (0, 3));
    let fit = engine.assign_room(b, Some(room_id)).await.unwrap().unwrap();
    assert_eq!((fit.overlapping, fit.free_slots), (1, 2));
    assert_eq!(engine.participant(b).unwrap().room_id, Some(room_id));
}

#[tokio::test]
async fn consecutive_stays_share_a_single_bed() {
    let (engine, event) = setup("assign_consecutive.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(24))).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(25), Some(27))).await;

    engine.assign_room(a, Some(room_id)).await.unwrap();
    engine.assign_room(b, Some(room_id)).await.unwrap();
    assert_eq!(occupant_ids(&engine, room_id).await.len(), 2);
}

#[tokio::test]
async fn touching_days_conflict() {
    let (engine, event) = setup("assign_touching.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(24))).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(24), Some(27))).await;

    engine.assign_room(a, Some(room_id)).await.unwrap();
    let result = engine.assign_room(b, Some(room_id)).await;
    assert!(matches!(
        result,
        Err(EngineError::RoomFull {
            capacity: 1,
            overlapping: 1,
            ..
        })
    ));
    assert_eq!(engine.participant(b).unwrap().room_id, None);
}

#[tokio::test]
async fn open_departure_blocks_later_arrivals() {
    let (engine, event) = setup("assign_open_end.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), None)).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(27), Some(28))).await;

    engine.assign_room(a, Some(room_id)).await.unwrap();
    assert!(matches!(
        engine.assign_room(b, Some(room_id)).await,
        Err(EngineError::RoomFull { .. })
    ));
}

#[tokio::test]
async fn open_start_and_open_end_do_not_meet() {
    let (engine, event) = setup("assign_open_both.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(None, Some(23))).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(24), None)).await;

    engine.assign_room(a, Some(room_id)).await.unwrap();
    engine.assign_room(b, Some(room_id)).await.unwrap();
}

#[tokio::test]
async fn reassigning_to_same_room_is_a_no_op() {
    let (engine, event) = setup("assign_same.wal").await;
    let room_id = add_room(&engine, event.id, "101", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    engine.assign_room(a, Some(room_id)).await.unwrap();
    assert_eq!(engine.assign_room(a, Some(room_id)).await.unwrap(), None);
    assert_eq!(occupant_ids(&engine, room_id).await, vec![a]);
}

#[tokio::test]
async fn moving_frees_the_old_room() {
    let (engine, event) = setup("assign_move.wal").await;
    let small = add_room(&engine, event.id, "101", 1).await;
    let big = add_room(&engine, event.id, "102", 4).await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    let b = register(&engine, event.id, "Ben", "Roth", Stay::open()).await;

    engine.assign_room(a, Some(small)).await.unwrap();
    engine.assign_room(a, Some(big)).await.unwrap();
    engine.assign_room(b, Some(small)).await.unwrap();

    assert_eq!(occupant_ids(&engine, small).await, vec![b]);
    assert_eq!(occupant_ids(&engine, big).await, vec![a]);

    engine.assign_room(a, None).await.unwrap();
    assert!(occupant_ids(&engine, big).await.is_empty());
    assert_eq!(engine.participant(a).unwrap().room_id, None);
}

#[tokio::test]
async fn room_of_other_event_rejected() {
    let (engine, event) = setup("assign_wrong_event.wal").await;
    let other = winter_event(2026);
    engine.create_event(other.clone()).await.unwrap();
    let foreign = add_room(&engine, other.id, "201", 4).await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;

    assert!(matches!(
        engine.assign_room(a, Some(foreign)).await,
        Err(EngineError::WrongEvent { .. })
    ));
}

#[tokio::test]
async fn registration_with_room_is_checked() {
    let (engine, event) = setup("register_room.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let mut first = person(event.id, "Ali", "Kaya", Stay::open());
    first.room_id = Some(room_id);
    engine.register_participant(first).await.unwrap();

    let mut second = person(event.id, "Ben", "Roth", stay(Some(26), Some(27)));
    second.room_id = Some(room_id);
    let second_id = second.id;
    assert!(matches!(
        engine.register_participant(second).await,
        Err(EngineError::RoomFull { .. })
    ));
    assert!(engine.participant(second_id).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignments_never_overbook() {
    let (engine, event) = setup("assign_race.wal").await;
    let engine = Arc::new(engine);
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;

    let mut ids = Vec::new();
    for i in 0..16 {
        ids.push(register(&engine, event.id, "Gast", &format!("Nr{i}"), stay(Some(23), Some(25))).await);
    }

    let mut handles = Vec::new();
    for id in ids {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { eng.assign_room(id, Some(room_id)).await }));
    }
    let mut won = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::RoomFull { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(occupant_ids(&engine, room_id).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_swaps_between_rooms_do_not_deadlock() {
    let (engine, event) = setup("assign_swap.wal").await;
    let engine = Arc::new(engine);
    let r1 = add_room(&engine, event.id, "101", 8).await;
    let r2 = add_room(&engine, event.id, "102", 8).await;
    let mut ids = Vec::new();
    for i in 0..8 {
        let id = register(&engine, event.id, "Gast", &format!("Nr{i}"), Stay::open()).await;
        let room = if i % 2 == 0 { r1 } else { r2 };
        engine.assign_room(id, Some(room)).await.unwrap();
        ids.push((id, room));
    }

    let mut handles = Vec::new();
    for (id, room) in ids {
        let eng = engine.clone();
        let target = if room == r1 { r2 } else { r1 };
        handles.push(tokio::spawn(async move { eng.assign_room(id, Some(target)).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let total = occupant_ids(&engine, r1).await.len() + occupant_ids(&engine, r2).await.len();
    assert_eq!(total, 8);
}

// ── Participant updates ──────────────────────────────────

#[tokio::test]
async fn stay_change_rechecked_against_current_room() {
    let (engine, event) = setup("update_stay.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(24))).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(25), Some(27))).await;
    engine.assign_room(a, Some(room_id)).await.unwrap();
    engine.assign_room(b, Some(room_id)).await.unwrap();

    let earlier = ParticipantPatch {
        arrival: Some(Some(dec(24))),
        ..Default::default()
    };
    assert!(matches!(
        engine.update_participant(b, &earlier).await,
        Err(EngineError::RoomFull { .. })
    ));
    assert_eq!(engine.participant(b).unwrap().stay, stay(Some(25), Some(27)));

    let later = ParticipantPatch {
        departure: Some(Some(dec(28))),
        ..Default::default()
    };
    let updated = engine.update_participant(b, &later).await.unwrap();
    assert_eq!(updated.stay, stay(Some(25), Some(28)));
    let rs = engine.get_room(&room_id).unwrap();
    let stored = rs
        .read()
        .await
        .occupants
        .iter()
        .find(|o| o.participant_id == b)
        .map(|o| o.stay);
    assert_eq!(stored, Some(stay(Some(25), Some(28))));
}

#[tokio::test]
async fn rejected_move_leaves_participant_untouched() {
    let (engine, event) = setup("update_move_full.wal").await;
    let home = add_room(&engine, event.id, "Einzel", 1).await;
    let full = add_room(&engine, event.id, "Voll", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(24))).await;
    let o = register(&engine, event.id, "Oya", "Sen", stay(None, None)).await;
    engine.assign_room(a, Some(home)).await.unwrap();
    engine.assign_room(o, Some(full)).await.unwrap();
    let before = engine.participant(a).unwrap();

    let patch = ParticipantPatch {
        first_name: Some("Geändert".into()),
        ..Default::default()
    };
    assert!(matches!(
        engine.update_participant_and_room(a, &patch, Some(Some(full))).await,
        Err(EngineError::RoomFull { .. })
    ));
    assert_eq!(engine.participant(a).unwrap(), before);
    assert_eq!(occupant_ids(&engine, home).await, vec![a]);
    assert_eq!(occupant_ids(&engine, full).await, vec![o]);
}

#[tokio::test]
async fn new_stay_checked_against_target_room() {
    let (engine, event) = setup("update_move_stay.wal").await;
    let single = add_room(&engine, event.id, "Einzel", 1).await;
    let double = add_room(&engine, event.id, "Doppel", 2).await;
    let x = register(&engine, event.id, "Xaver", "Berg", stay(Some(22), Some(24))).await;
    let p = register(&engine, event.id, "Pia", "Lang", stay(Some(25), Some(27))).await;
    engine.assign_room(x, Some(single)).await.unwrap();
    engine.assign_room(p, Some(single)).await.unwrap();

    // The earlier arrival clashes with Xaver, but Pia is leaving that room.
    let patch = ParticipantPatch {
        arrival: Some(Some(dec(22))),
        ..Default::default()
    };
    let updated = engine
        .update_participant_and_room(p, &patch, Some(Some(double)))
        .await
        .unwrap();
    assert_eq!(updated.room_id, Some(double));
    assert_eq!(updated.stay, stay(Some(22), Some(27)));
    assert_eq!(engine.participant(p).unwrap(), updated);
    assert_eq!(occupant_ids(&engine, single).await, vec![x]);

    let rs = engine.get_room(&double).unwrap();
    let stored = rs.read().await.occupants.iter().find(|o| o.participant_id == p).map(|o| o.stay);
    assert_eq!(stored, Some(stay(Some(22), Some(27))));

    // Moving back with the new stay is checked against the single room.
    assert!(matches!(
        engine.update_participant_and_room(p, &ParticipantPatch::default(), Some(Some(single))).await,
        Err(EngineError::RoomFull { .. })
    ));
    assert_eq!(engine.participant(p).unwrap().room_id, Some(double));
}

#[tokio::test]
async fn combined_update_survives_replay() {
    let path = test_wal_path("update_move_replay.wal");
    let event = winter_event(2025);
    let (p, room) = {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_event(event.clone()).await.unwrap();
        let room = add_room(&engine, event.id, "Doppel", 2).await;
        let p = register(&engine, event.id, "Pia", "Lang", stay(Some(25), Some(27))).await;
        let patch = ParticipantPatch {
            city: Some(Some("Köln".into())),
            departure: Some(Some(dec(28))),
            ..Default::default()
        };
        engine.update_participant_and_room(p, &patch, Some(Some(room))).await.unwrap();
        (p, room)
    };

    let engine = Engine::new(path).unwrap();
    let restored = engine.participant(p).unwrap();
    assert_eq!(restored.room_id, Some(room));
    assert_eq!(restored.city.as_deref(), Some("Köln"));
    assert_eq!(restored.stay, stay(Some(25), Some(28)));
    assert_eq!(occupant_ids(&engine, room).await, vec![p]);
}

#[tokio::test]
async fn own_stay_does_not_count_against_itself() {
    let (engine, event) = setup("update_self.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(24))).await;
    engine.assign_room(a, Some(room_id)).await.unwrap();

    let patch = ParticipantPatch {
        departure: Some(None),
        ..Default::default()
    };
    engine.update_participant(a, &patch).await.unwrap();
}

#[tokio::test]
async fn inverted_stays_rejected() {
    let (engine, event) = setup("inverted.wal").await;
    let p = person(event.id, "Ali", "Kaya", stay(Some(26), Some(23)));
    assert!(matches!(
        engine.register_participant(p).await,
        Err(EngineError::InvertedStay(_))
    ));

    let a = register(&engine, event.id, "Ben", "Roth", stay(Some(23), Some(26))).await;
    let patch = ParticipantPatch {
        arrival: Some(Some(dec(27))),
        ..Default::default()
    };
    assert!(matches!(
        engine.update_participant(a, &patch).await,
        Err(EngineError::InvertedStay(_))
    ));
    assert!(matches!(
        engine.room_availability(event.id, &stay(Some(27), Some(23)), None).await,
        Err(EngineError::InvertedStay(_))
    ));
}

#[tokio::test]
async fn field_update_keeps_room_and_payment() {
    let (engine, event) = setup("update_fields.wal").await;
    let room_id = add_room(&engine, event.id, "101", 2).await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    engine.assign_room(a, Some(room_id)).await.unwrap();
    engine.mark_paid(a, Some(15_000), Some(PaymentMethod::Cash)).await.unwrap();

    let patch = ParticipantPatch {
        city: Some(Some("Köln".into())),
        role: Some(Role::Helper),
        ..Default::default()
    };
    let updated = engine.update_participant(a, &patch).await.unwrap();
    assert_eq!(updated.city.as_deref(), Some("Köln"));
    assert_eq!(updated.room_id, Some(room_id));
    assert!(updated.payment.has_paid);
    assert_eq!(engine.participant(a).unwrap(), updated);
}

#[tokio::test]
async fn room_availability_excludes_the_participant() {
    let (engine, event) = setup("availability.wal").await;
    let single = add_room(&engine, event.id, "A-Einzel", 1).await;
    let double = add_room(&engine, event.id, "B-Doppel", 2).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(25))).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(24), Some(26))).await;
    engine.assign_room(a, Some(single)).await.unwrap();

    let for_b = engine.room_availability_for(b).await.unwrap();
    assert_eq!(for_b.len(), 2);
    assert_eq!(for_b[0].0.id, single);
    assert!(!for_b[0].1.has_space);
    assert_eq!(for_b[1].0.id, double);
    assert_eq!(for_b[1].1.free_slots, 2);

    let for_a = engine.room_availability_for(a).await.unwrap();
    assert!(for_a[0].1.has_space);
}

// ── Payment & check-in ───────────────────────────────────

#[tokio::test]
async fn payment_and_check_in_lifecycle() {
    let (engine, event) = setup("payment.wal").await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;

    let payment = engine.mark_paid(a, Some(7_500), Some(PaymentMethod::Transfer)).await.unwrap();
    assert!(payment.has_paid && payment.paid_at.is_some());
    engine.check_in(a).await.unwrap();
    let p = engine.participant(a).unwrap();
    assert_eq!(p.payment.amount_cents, Some(7_500));
    assert!(p.is_checked_in());

    engine.mark_unpaid(a).await.unwrap();
    engine.check_out(a).await.unwrap();
    let p = engine.participant(a).unwrap();
    assert_eq!(p.payment, Payment::default());
    assert!(!p.is_checked_in());
}

#[tokio::test]
async fn negative_amount_rejected() {
    let (engine, event) = setup("payment_negative.wal").await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    assert!(matches!(
        engine.mark_paid(a, Some(-1), None).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn participant_filters_and_recent() {
    let (engine, event) = setup("filters.wal").await;
    let room_id = add_room(&engine, event.id, "101", 4).await;
    let mut ids = Vec::new();
    for (i, last) in ["Yilmaz", "Becker", "Arslan", "Schulz", "Demir", "Fischer"].iter().enumerate() {
        let mut p = person(event.id, "Gast", last, Stay::open());
        p.id = Ulid::from_parts(1_700_000_000_000 + i as u64, 0);
        ids.push(p.id);
        engine.register_participant(p).await.unwrap();
    }
    engine.mark_paid(ids[0], None, None).await.unwrap();
    engine.assign_room(ids[1], Some(room_id)).await.unwrap();

    let all = engine.list_participants(event.id, &ParticipantFilter::default());
    let names: Vec<&str> = all.iter().map(|p| p.last_name.as_str()).collect();
    assert_eq!(names, vec!["Arslan", "Becker", "Demir", "Fischer", "Schulz", "Yilmaz"]);

    let paid = ParticipantFilter {
        has_paid: Some(true),
        ..Default::default()
    };
    assert_eq!(engine.list_participants(event.id, &paid).len(), 1);
    let in_room = ParticipantFilter {
        room_id: Some(room_id),
        ..Default::default()
    };
    assert_eq!(engine.list_participants(event.id, &in_room)[0].id, ids[1]);

    let recent: Vec<Ulid> = engine.recent_participants(event.id, 5).iter().map(|p| p.id).collect();
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0], ids[5]);
    assert!(!recent.contains(&ids[0]));
}

// ── Cascades ─────────────────────────────────────────────

#[tokio::test]
async fn deleting_event_removes_everything() {
    let (engine, event) = setup("cascade_event.wal").await;
    let room_id = add_room(&engine, event.id, "101", 2).await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    engine.assign_room(a, Some(room_id)).await.unwrap();
    let ws_id = Ulid::new();
    engine
        .create_workshop(workshop(ws_id, event.id, "Theater", None))
        .await
        .unwrap();
    engine.seed_workshop_rooms(event.id).await.unwrap();

    engine.delete_event(event.id).await.unwrap();

    assert!(engine.list_events().is_empty());
    assert!(engine.get_room(&room_id).is_none());
    assert!(engine.participant(a).is_err());
    assert!(engine.workshop(ws_id).is_err());
    assert!(engine.list_workshop_rooms(event.id).is_empty());
}

#[tokio::test]
async fn deleting_participant_frees_bed_and_workshops() {
    let (engine, event) = setup("cascade_participant.wal").await;
    let room_id = add_room(&engine, event.id, "Einzel", 1).await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    let b = register(&engine, event.id, "Ben", "Roth", Stay::open()).await;
    engine.assign_room(a, Some(room_id)).await.unwrap();
    let ws_id = Ulid::new();
    engine
        .create_workshop(workshop(ws_id, event.id, "Theater", None))
        .await
        .unwrap();
    engine.add_leader(ws_id, a).await.unwrap();
    engine.add_member(ws_id, a, false).await.unwrap();

    engine.delete_participant(a).await.unwrap();

    let ws = engine.workshop(ws_id).unwrap();
    assert!(ws.leaders.is_empty() && ws.members.is_empty());
    engine.assign_room(b, Some(room_id)).await.unwrap();
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_rooms_and_occupants() {
    let path = test_wal_path("replay.wal");
    let event = winter_event(2025);
    let (room_id, a, b);
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_event(event.clone()).await.unwrap();
        room_id = add_room(&engine, event.id, "Einzel", 1).await;
        a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(24))).await;
        b = register(&engine, event.id, "Ben", "Roth", stay(Some(25), Some(27))).await;
        engine.assign_room(a, Some(room_id)).await.unwrap();
        engine.assign_room(b, Some(room_id)).await.unwrap();
        engine.mark_paid(a, Some(15_000), None).await.unwrap();
        engine.assign_room(b, None).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(occupant_ids(&engine, room_id).await, vec![a]);
    assert!(engine.participant(a).unwrap().payment.has_paid);
    assert_eq!(engine.participant(b).unwrap().room_id, None);

    let c = register(&engine, event.id, "Can", "Ay", stay(Some(24), Some(26))).await;
    assert!(matches!(
        engine.assign_room(c, Some(room_id)).await,
        Err(EngineError::RoomFull { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_commit_survives_restart() {
    let path = test_wal_path("group_commit.wal");
    let event = winter_event(2025);
    {
        let engine = Arc::new(Engine::new(path.clone()).unwrap());
        engine.create_event(event.clone()).await.unwrap();
        let mut handles = Vec::new();
        for i in 0..20 {
            let eng = engine.clone();
            let p = person(event.id, "Gast", &format!("Nr{i}"), Stay::open());
            handles.push(tokio::spawn(async move { eng.register_participant(p).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(
        engine.list_participants(event.id, &ParticipantFilter::default()).len(),
        20
    );
}

#[tokio::test]
async fn compaction_keeps_state_and_shrinks_log() {
    let path = test_wal_path("compact.wal");
    let event = winter_event(2025);
    let (room_id, a, ws_id);
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_event(event.clone()).await.unwrap();
        room_id = add_room(&engine, event.id, "101", 2).await;
        a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
        for _ in 0..20 {
            engine.assign_room(a, Some(room_id)).await.unwrap();
            engine.assign_room(a, None).await.unwrap();
        }
        engine.assign_room(a, Some(room_id)).await.unwrap();
        engine.check_in(a).await.unwrap();
        ws_id = Ulid::new();
        engine
            .create_workshop(workshop(ws_id, event.id, "Theater", None))
            .await
            .unwrap();
        engine.add_member(ws_id, a, true).await.unwrap();

        assert!(engine.appends_since_compact().await.unwrap() > 40);
        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");
        assert_eq!(engine.appends_since_compact().await.unwrap(), 0);

        engine.mark_paid(a, Some(100), None).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let p = engine.participant(a).unwrap();
    assert_eq!(p.room_id, Some(room_id));
    assert!(p.is_checked_in());
    assert_eq!(p.payment.amount_cents, Some(100));
    assert_eq!(occupant_ids(&engine, room_id).await, vec![a]);
    let ws = engine.workshop(ws_id).unwrap();
    assert_eq!(
        ws.members,
        vec![Member {
            participant_id: a,
            is_helper: true
        }]
    );
}

// ── CSV import ───────────────────────────────────────────

const CSV: &str = "Vorname;Nachname;Alter;Stadt;Aufenthalt;Rolle
Ali;Yılmaz;17;Köln;22.12-26.12;
Lena;Schmidt;16;Aachen;;Helfer
;Ohne;;;;
Mehmet;Demir;;Essen;24.12.2025 - 23.12.2025;
";

#[tokio::test]
async fn import_adds_rows_and_reports_errors() {
    let (engine, event) = setup("import_add.wal").await;
    let report = engine
        .import_participants(event.id, CSV, ImportMode::Add)
        .await
        .unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().all(|e| e.starts_with("Zeile ")));

    let all = engine.list_participants(event.id, &ParticipantFilter::default());
    let ali = all.iter().find(|p| p.first_name == "Ali").unwrap();
    assert_eq!(ali.stay, stay(Some(22), Some(26)));
    assert_eq!(ali.age, Some(17));
    let lena = all.iter().find(|p| p.first_name == "Lena").unwrap();
    assert_eq!(lena.role, Role::Helper);
    assert_eq!(lena.stay, Stay::open());

    let again = engine
        .import_participants(event.id, CSV, ImportMode::Add)
        .await
        .unwrap();
    assert_eq!((again.added, again.skipped), (0, 2));
}

#[tokio::test]
async fn import_replace_drops_existing_participants() {
    let (engine, event) = setup("import_replace.wal").await;
    let room_id = add_room(&engine, event.id, "101", 1).await;
    let old = register(&engine, event.id, "Alt", "Bestand", Stay::open()).await;
    engine.assign_room(old, Some(room_id)).await.unwrap();

    let report = engine
        .import_participants(event.id, CSV, ImportMode::Replace)
        .await
        .unwrap();
    assert_eq!(report.added, 2);
    assert!(engine.participant(old).is_err());
    assert!(occupant_ids(&engine, room_id).await.is_empty());
    assert_eq!(
        engine.list_participants(event.id, &ParticipantFilter::default()).len(),
        2
    );
}

// ── Reports ──────────────────────────────────────────────

#[tokio::test]
async fn daily_report_lists_presence_and_movements() {
    let (engine, event) = setup("daily.wal").await;
    let r1 = add_room(&engine, event.id, "101", 2).await;
    add_room(&engine, event.id, "102", 2).await;
    let a = register(&engine, event.id, "Ali", "Kaya", stay(Some(22), Some(24))).await;
    let b = register(&engine, event.id, "Ben", "Roth", stay(Some(24), Some(27))).await;
    let c = register(&engine, event.id, "Can", "Ay", stay(Some(24), None)).await;
    engine.assign_room(a, Some(r1)).await.unwrap();
    engine.assign_room(b, Some(r1)).await.unwrap();

    let report = engine.daily_report(event.id, dec(24)).await.unwrap();
    assert_eq!(report.rooms.len(), 2);
    let in_101: Vec<Ulid> = report.rooms[0].occupants.iter().map(|p| p.id).collect();
    assert_eq!(in_101, vec![a, b]);
    assert!(report.rooms[1].occupants.is_empty());
    let present: Vec<Ulid> = report.present.iter().map(|p| p.id).collect();
    assert_eq!(present, vec![a, b]);
    let arrivals: Vec<Ulid> = report.arrivals.iter().map(|p| p.id).collect();
    assert_eq!(arrivals, vec![c, b]);
    let departures: Vec<Ulid> = report.departures.iter().map(|p| p.id).collect();
    assert_eq!(departures, vec![a]);

    let later = engine.daily_report(event.id, dec(26)).await.unwrap();
    let in_101: Vec<Ulid> = later.rooms[0].occupants.iter().map(|p| p.id).collect();
    assert_eq!(in_101, vec![b]);
}

#[tokio::test]
async fn statistics_count_beds_roles_and_payments() {
    let (engine, event) = setup("statistics.wal").await;
    let r1 = add_room(&engine, event.id, "101", 3).await;
    add_room(&engine, event.id, "102", 5).await;
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    let mut helper = person(event.id, "Ben", "Roth", Stay::open());
    helper.role = Role::Helper;
    engine.register_participant(helper).await.unwrap();
    let mut abi = person(event.id, "Can", "Ay", Stay::open());
    abi.role = Role::Abi;
    abi.city = Some("Köln".into());
    abi.postal_code = Some("50667".into());
    engine.register_participant(abi).await.unwrap();
    engine.assign_room(a, Some(r1)).await.unwrap();
    engine.mark_paid(a, Some(15_000), Some(PaymentMethod::Cash)).await.unwrap();
    engine.check_in(a).await.unwrap();

    let stats = engine.statistics(event.id).await.unwrap();
    assert_eq!(
        stats,
        EventStatistics {
            total_participants: 3,
            checked_in: 1,
            paid: 1,
            unpaid: 2,
            rooms: 2,
            occupied_beds: 1,
            total_beds: 8,
            helpers: 1,
            abi_guests: 1,
        }
    );

    let cities = engine.city_stats(event.id).unwrap();
    assert_eq!(cities[0].label, "Unbekannt");
    assert_eq!(cities[0].count, 2);
    assert!((cities[0].percentage - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(cities[1].label, "Köln");
    assert!((cities[1].percentage - 100.0 / 3.0).abs() < 1e-9);

    let countries = engine.country_stats(event.id).unwrap();
    assert_eq!(countries[0].label, "Unbekannt");
    assert_eq!(countries[1].label, "Deutschland");

    let roles = engine.role_stats(event.id).unwrap();
    let counts: Vec<usize> = roles.iter().map(|r| r.count).collect();
    assert_eq!(counts, vec![1, 1, 1]);

    let payments = engine.payment_stats(event.id).unwrap();
    assert_eq!(payments, PaymentStats {
        paid: 1,
        unpaid: 2,
        total_amount_cents: 15_000,
    });
}

#[tokio::test]
async fn finance_stats_split_full_partial_and_methods() {
    let (engine, event) = setup("finance.wal").await;
    let full = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    let part = register(&engine, event.id, "Ben", "Roth", Stay::open()).await;
    let blank = register(&engine, event.id, "Can", "Ay", Stay::open()).await;
    register(&engine, event.id, "Deniz", "Er", Stay::open()).await;
    engine.mark_paid(full, Some(15_000), Some(PaymentMethod::Cash)).await.unwrap();
    engine.mark_paid(part, Some(5_000), Some(PaymentMethod::Transfer)).await.unwrap();
    engine.mark_paid(blank, None, None).await.unwrap();

    let f = engine.finance_stats(event.id).unwrap();
    assert_eq!((f.total, f.paid, f.unpaid, f.paid_percentage), (4, 3, 1, 75));
    assert_eq!((f.fully_paid, f.partially_paid, f.paid_without_amount), (1, 1, 1));
    assert_eq!(f.total_amount_cents, 20_000);
    assert_eq!((f.cash_count, f.cash_amount_cents), (1, 15_000));
    assert_eq!((f.transfer_count, f.transfer_amount_cents), (1, 5_000));
    assert_eq!((f.unknown_method_count, f.unknown_method_amount_cents), (1, 0));
    assert_eq!(f.partially_paid_list[0].id, part);
    assert_eq!(f.unpaid_list.len(), 1);
    assert_eq!(f.full_payment_threshold_cents, Some(15_000));
    let regular = f.by_role.iter().find(|r| r.role == Role::Regular).unwrap();
    assert_eq!((regular.paid, regular.unpaid), (3, 1));
}

// ── Workshops ────────────────────────────────────────────

fn workshop(id: Ulid, event_id: Ulid, name: &str, room: Option<Ulid>) -> Workshop {
    Workshop {
        id,
        event_id,
        name: name.into(),
        description: None,
        max_participants: DEFAULT_WORKSHOP_SIZE,
        workshop_room_id: room,
    }
}

#[tokio::test]
async fn seeding_workshop_rooms_is_idempotent() {
    let (engine, event) = setup("ws_seed.wal").await;
    assert_eq!(
        engine.seed_workshop_rooms(event.id).await.unwrap(),
        BulkReport { added: 9, skipped: 0 }
    );
    assert_eq!(
        engine.seed_workshop_rooms(event.id).await.unwrap(),
        BulkReport { added: 0, skipped: 9 }
    );
    let names: Vec<String> = engine
        .list_workshop_rooms(event.id)
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names.first().map(String::as_str), Some("WS1"));
    assert_eq!(names.len(), 9);
}

#[tokio::test]
async fn workshop_room_names_unique_per_event() {
    let (engine, event) = setup("ws_room_name.wal").await;
    engine.seed_workshop_rooms(event.id).await.unwrap();
    let result = engine
        .create_workshop_room(WorkshopRoom {
            id: Ulid::new(),
            event_id: event.id,
            name: "ws1".into(),
            description: None,
            capacity: None,
        })
        .await;
    assert!(matches!(result, Err(EngineError::DuplicateName(_))));
}

#[tokio::test]
async fn workshop_room_used_once() {
    let (engine, event) = setup("ws_room_taken.wal").await;
    engine.seed_workshop_rooms(event.id).await.unwrap();
    let rooms = engine.list_workshop_rooms(event.id);
    let ws1 = rooms[0].id;

    let theater = Ulid::new();
    engine
        .create_workshop(workshop(theater, event.id, "Theater", Some(ws1)))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .create_workshop(workshop(Ulid::new(), event.id, "Chor", Some(ws1)))
            .await,
        Err(EngineError::WorkshopRoomTaken(_))
    ));

    assert_eq!(engine.available_workshop_rooms(event.id, None).len(), 8);
    let keep = engine.available_workshop_rooms(event.id, Some(theater));
    assert_eq!(keep.len(), 9);

    engine.delete_workshop_room(ws1).await.unwrap();
    assert_eq!(engine.workshop(theater).unwrap().workshop.workshop_room_id, None);
}

#[tokio::test]
async fn leaders_come_from_abi_guests() {
    let (engine, event) = setup("ws_leaders.wal").await;
    let ws_id = Ulid::new();
    engine
        .create_workshop(workshop(ws_id, event.id, "Theater", None))
        .await
        .unwrap();
    register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    let mut abi1 = person(event.id, "Zeynep", "Arslan", Stay::open());
    abi1.role = Role::Abi;
    let mut abi2 = person(event.id, "Emre", "Bulut", Stay::open());
    abi2.role = Role::Abi;
    let (abi1_id, abi2_id) = (abi1.id, abi2.id);
    engine.register_participant(abi2).await.unwrap();
    engine.register_participant(abi1).await.unwrap();

    let available: Vec<Ulid> = engine.available_leaders(ws_id).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(available, vec![abi1_id, abi2_id]);

    engine.add_leader(ws_id, abi1_id).await.unwrap();
    assert!(matches!(
        engine.add_leader(ws_id, abi1_id).await,
        Err(EngineError::AlreadyMember { .. })
    ));
    let available: Vec<Ulid> = engine.available_leaders(ws_id).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(available, vec![abi2_id]);

    engine.remove_leader(ws_id, abi1_id).await.unwrap();
    assert!(matches!(
        engine.remove_leader(ws_id, abi1_id).await,
        Err(EngineError::NotMember { .. })
    ));
}

#[tokio::test]
async fn members_bulk_add_toggle_and_stats() {
    let (engine, event) = setup("ws_members.wal").await;
    let ws_id = Ulid::new();
    let mut small = workshop(ws_id, event.id, "Kochen", None);
    small.max_participants = 3;
    engine.create_workshop(small).await.unwrap();
    let a = register(&engine, event.id, "Ali", "Kaya", Stay::open()).await;
    let b = register(&engine, event.id, "Ben", "Roth", Stay::open()).await;
    let c = register(&engine, event.id, "Can", "Ay", Stay::open()).await;

    engine.add_member(ws_id, a, false).await.unwrap();
    let report = engine.add_members(ws_id, &[a, b, Ulid::new()], false).await.unwrap();
    assert_eq!(report, BulkReport { added: 1, skipped: 2 });

    let available: Vec<Ulid> = engine.available_members(ws_id).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(available, vec![c]);

    assert!(engine.toggle_member_helper(ws_id, b).await.unwrap());
    assert!(!engine.toggle_member_helper(ws_id, b).await.unwrap());
    engine.set_member_helper(ws_id, b, true).await.unwrap();
    assert!(matches!(
        engine.toggle_member_helper(ws_id, c).await,
        Err(EngineError::NotMember { .. })
    ));

    engine.add_member(ws_id, c, false).await.unwrap();
    let stats = engine.workshop_stats(event.id).unwrap();
    assert_eq!((stats.total_workshops, stats.total_members, stats.total_leaders), (1, 3, 0));
    assert!(stats.workshops[0].is_full);

    engine.remove_member(ws_id, c).await.unwrap();
    let ws = engine.workshop(ws_id).unwrap();
    assert!(!ws.is_full());
    assert!(ws.members.iter().any(|m| m.participant_id == b && m.is_helper));
}

#[tokio::test]
async fn member_of_other_event_rejected() {
    let (engine, event) = setup("ws_wrong_event.wal").await;
    let other = winter_event(2026);
    engine.create_event(other.clone()).await.unwrap();
    let ws_id = Ulid::new();
    engine
        .create_workshop(workshop(ws_id, event.id, "Theater", None))
        .await
        .unwrap();
    let stranger = register(&engine, other.id, "Ali", "Kaya", Stay::open()).await;
    assert!(matches!(
        engine.add_member(ws_id, stranger, false).await,
        Err(EngineError::WrongEvent { .. })
    ));
}
