use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::occupancy::present_on;
use super::queries::sort_by_name;
use super::{Engine, EngineError};

const UNKNOWN: &str = "Unbekannt";

/// Share of `count` in `total`, rounded to whole percent.
fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((count as f64 / total as f64) * 100.0).round() as u32
}

/// Exact share of `count` in `total`, in percent.
fn share_of(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64 * 100.0
}

/// Buckets sorted by count descending, ties by label.
fn shares(counts: HashMap<String, usize>, total: usize) -> Vec<Share> {
    let mut out: Vec<Share> = counts
        .into_iter()
        .map(|(label, count)| Share {
            percentage: share_of(count, total),
            label,
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    out
}

fn select(participants: &[Participant], keep: impl Fn(&Participant) -> bool) -> Vec<Participant> {
    let mut list: Vec<Participant> = participants.iter().filter(|p| keep(p)).cloned().collect();
    sort_by_name(&mut list);
    list
}

/// Country guessed from a postal code, with the city breaking ties between
/// countries that share a format.
pub fn country_for(postal_code: Option<&str>, city: Option<&str>) -> &'static str {
    let Some(code) = postal_code else {
        return UNKNOWN;
    };
    let code: String = code
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    let city = city.map(str::trim).unwrap_or("");
    let digits = code.chars().take_while(|c| c.is_ascii_digit()).count();
    let letters = &code[digits..];

    match (digits, letters.len()) {
        (5, 0) => match city {
            "Istanbul" | "Ankara" | "Izmir" => "Türkei",
            _ => "Deutschland",
        },
        (4, 1..=2) if letters.chars().all(|c| c.is_ascii_uppercase()) => "Niederlande",
        (4, 0) => {
            if city.contains("Hasselt") {
                "Belgien"
            } else if city == "Wien" {
                "Österreich"
            } else if city == "Zürich" {
                "Schweiz"
            } else {
                "Niederlande"
            }
        }
        _ => UNKNOWN,
    }
}

impl Engine {
    fn event_participants(&self, event_id: Ulid) -> Vec<Participant> {
        self.participants
            .iter()
            .filter(|p| p.event_id == event_id)
            .map(|p| p.value().clone())
            .collect()
    }

    /// Who sleeps where on `date`, plus the day's arrivals and departures.
    pub async fn daily_report(
        &self,
        event_id: Ulid,
        date: NaiveDate,
    ) -> Result<DailyReport, EngineError> {
        self.event(event_id)?;
        let rooms: Vec<RoomWithOccupants> = self
            .list_rooms(event_id)
            .await
            .into_iter()
            .map(|mut r| {
                r.occupants.retain(|p| present_on(&p.stay, date));
                r
            })
            .collect();

        let participants = self.event_participants(event_id);
        Ok(DailyReport {
            date,
            present: select(&participants, |p| {
                p.room_id.is_some() && present_on(&p.stay, date)
            }),
            arrivals: select(&participants, |p| p.stay.arrival == Some(date)),
            departures: select(&participants, |p| p.stay.departure == Some(date)),
            rooms,
        })
    }

    pub async fn statistics(&self, event_id: Ulid) -> Result<EventStatistics, EngineError> {
        self.event(event_id)?;
        let mut stats = EventStatistics::default();
        for p in self.event_participants(event_id) {
            stats.total_participants += 1;
            if p.is_checked_in() {
                stats.checked_in += 1;
            }
            if p.payment.has_paid {
                stats.paid += 1;
            } else {
                stats.unpaid += 1;
            }
            if p.room_id.is_some() {
                stats.occupied_beds += 1;
            }
            match p.role {
                Role::Helper => stats.helpers += 1,
                Role::Abi => stats.abi_guests += 1,
                Role::Regular => {}
            }
        }
        for room_id in self.rooms_of_event(event_id) {
            if let Some(rs) = self.get_room(&room_id) {
                stats.rooms += 1;
                stats.total_beds += u64::from(rs.read().await.room.capacity);
            }
        }
        Ok(stats)
    }

    pub fn city_stats(&self, event_id: Ulid) -> Result<Vec<Share>, EngineError> {
        self.event(event_id)?;
        let participants = self.event_participants(event_id);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for p in &participants {
            let city = p
                .city
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(UNKNOWN);
            *counts.entry(city.to_string()).or_default() += 1;
        }
        Ok(shares(counts, participants.len()))
    }

    pub fn country_stats(&self, event_id: Ulid) -> Result<Vec<Share>, EngineError> {
        self.event(event_id)?;
        let participants = self.event_participants(event_id);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for p in &participants {
            let country = country_for(p.postal_code.as_deref(), p.city.as_deref());
            *counts.entry(country.to_string()).or_default() += 1;
        }
        Ok(shares(counts, participants.len()))
    }

    /// Participants per role, always listing every role.
    pub fn role_stats(&self, event_id: Ulid) -> Result<Vec<Share>, EngineError> {
        self.event(event_id)?;
        let participants = self.event_participants(event_id);
        let total = participants.len();
        Ok(Role::ALL
            .iter()
            .map(|role| {
                let count = participants.iter().filter(|p| p.role == *role).count();
                Share {
                    label: role.as_str().to_string(),
                    count,
                    percentage: share_of(count, total),
                }
            })
            .collect())
    }

    pub fn payment_stats(&self, event_id: Ulid) -> Result<PaymentStats, EngineError> {
        self.event(event_id)?;
        let mut stats = PaymentStats::default();
        for p in self.event_participants(event_id) {
            if p.payment.has_paid {
                stats.paid += 1;
                stats.total_amount_cents += p.payment.amount_cents.unwrap_or(0);
            } else {
                stats.unpaid += 1;
            }
        }
        Ok(stats)
    }

    /// Payment breakdown for the treasurer. Without an event fee every paid
    /// amount counts as full payment.
    pub fn finance_stats(&self, event_id: Ulid) -> Result<FinanceStats, EngineError> {
        let event = self.event(event_id)?;
        let mut participants = self.event_participants(event_id);
        sort_by_name(&mut participants);

        let mut stats = FinanceStats {
            total: participants.len(),
            full_payment_threshold_cents: event.fee_cents,
            by_role: Role::ALL
                .iter()
                .map(|role| RolePayment {
                    role: *role,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        for p in participants {
            let by_role = stats.by_role.iter_mut().find(|r| r.role == p.role);
            if !p.payment.has_paid {
                stats.unpaid += 1;
                if let Some(r) = by_role {
                    r.unpaid += 1;
                }
                stats.unpaid_list.push(p);
                continue;
            }

            stats.paid += 1;
            if let Some(r) = by_role {
                r.paid += 1;
            }

            let amount = p.payment.amount_cents.unwrap_or(0);
            stats.total_amount_cents += amount;
            match p.payment.method {
                Some(PaymentMethod::Cash) => {
                    stats.cash_count += 1;
                    stats.cash_amount_cents += amount;
                }
                Some(PaymentMethod::Transfer) => {
                    stats.transfer_count += 1;
                    stats.transfer_amount_cents += amount;
                }
                None => {
                    stats.unknown_method_count += 1;
                    stats.unknown_method_amount_cents += amount;
                }
            }

            if amount <= 0 {
                stats.paid_without_amount += 1;
            } else if event.fee_cents.is_some_and(|fee| amount < fee) {
                stats.partially_paid += 1;
                stats.partially_paid_list.push(p);
            } else {
                stats.fully_paid += 1;
            }
        }

        stats.paid_percentage = percent(stats.paid, stats.total);
        Ok(stats)
    }
}
