//! CSV participant import.
//!
//! Registration lists arrive as spreadsheets exported by hand, in German or
//! Turkish, with `,` or `;` separators and dates written every which way.
//! This module turns such text into rows; the engine decides what to store.

use chrono::{Datelike, NaiveDate};

use crate::model::{Event, Role, Stay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Keep existing participants, skip names already present.
    Add,
    /// Remove every participant of the event first.
    Replace,
}

impl ImportMode {
    pub fn parse(s: &str) -> Option<ImportMode> {
        match s.trim().to_lowercase().as_str() {
            "add" | "append" => Some(ImportMode::Add),
            "replace" => Some(ImportMode::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    /// 1-based line in the input, for error messages.
    pub line: usize,
    pub first_name: String,
    pub last_name: String,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub stay: Stay,
    pub role: Role,
}

#[derive(Debug, Default)]
pub struct ParsedImport {
    pub rows: Vec<ImportRow>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Columns {
    first_name: Option<usize>,
    last_name: Option<usize>,
    age: Option<usize>,
    city: Option<usize>,
    stay: Option<usize>,
    arrival: Option<usize>,
    departure: Option<usize>,
    role: Option<usize>,
}

impl Columns {
    /// `Vorname, Nachname, Alter, Stadt, Aufenthalt, Rolle`
    fn default_order() -> Self {
        Self {
            first_name: Some(0),
            last_name: Some(1),
            age: Some(2),
            city: Some(3),
            stay: Some(4),
            arrival: None,
            departure: None,
            role: Some(5),
        }
    }
}

/// Split one CSV line on `,` or `;` outside double quotes. Cells are trimmed.
pub fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' | ';' if !in_quotes => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// Lowercase and fold Turkish and German letters to ASCII so headers from
/// either language compare equal regardless of spelling.
pub fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    for c in header.to_lowercase().chars() {
        match c {
            'ı' | 'i' | 'î' | 'ì' | 'í' => out.push('i'),
            'ğ' => out.push('g'),
            'ü' | 'û' | 'ù' | 'ú' => out.push('u'),
            'ş' => out.push('s'),
            'ö' | 'ô' | 'ò' | 'ó' => out.push('o'),
            'ç' => out.push('c'),
            'ä' | 'â' | 'à' | 'á' => out.push('a'),
            'é' | 'è' | 'ê' => out.push('e'),
            'ß' => out.push_str("ss"),
            // Combining dot left over from lowercasing 'İ'.
            '\u{307}' => {}
            c if c.is_alphanumeric() || c == ' ' => out.push(c),
            _ => out.push(' '),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    FirstName,
    LastName,
    Age,
    City,
    Stay,
    Arrival,
    Departure,
    Role,
}

fn classify(header: &str) -> Option<Column> {
    let h = normalize_header(header);
    let has = |needles: &[&str]| needles.iter().any(|n| h.contains(n));
    let is = |words: &[&str]| words.iter().any(|w| h == *w);

    // "soyisim" contains "isim": last name goes first.
    if has(&["soyisim", "soyad", "nachname", "familienname", "last name", "lastname", "surname"]) {
        return Some(Column::LastName);
    }
    if has(&["vorname", "isminiz", "first name", "firstname"]) || is(&["isim", "ad", "adi", "name"]) {
        return Some(Column::FirstName);
    }
    if has(&["alter", "yasiniz"]) || is(&["yas", "age"]) {
        return Some(Column::Age);
    }
    if has(&["stadt", "wohnort", "sehir", "city"]) || is(&["ort", "il"]) {
        return Some(Column::City);
    }
    if has(&["anreise", "gelis", "arrival"]) {
        return Some(Column::Arrival);
    }
    if has(&["abreise", "ayrilis", "donus", "departure"]) {
        return Some(Column::Departure);
    }
    if has(&["aufenthalt", "zeitraum", "kalis", "konaklama", "stay"]) {
        return Some(Column::Stay);
    }
    if has(&["rolle", "gorev", "role"]) || is(&["rol"]) {
        return Some(Column::Role);
    }
    None
}

/// Map header cells to columns. `None` if no name columns were recognised.
fn detect_columns(header: &[String]) -> Option<Columns> {
    let mut cols = Columns::default();
    for (index, cell) in header.iter().enumerate() {
        let slot = match classify(cell) {
            Some(Column::FirstName) => &mut cols.first_name,
            Some(Column::LastName) => &mut cols.last_name,
            Some(Column::Age) => &mut cols.age,
            Some(Column::City) => &mut cols.city,
            Some(Column::Stay) => &mut cols.stay,
            Some(Column::Arrival) => &mut cols.arrival,
            Some(Column::Departure) => &mut cols.departure,
            Some(Column::Role) => &mut cols.role,
            None => continue,
        };
        slot.get_or_insert(index);
    }
    (cols.first_name.is_some() && cols.last_name.is_some()).then_some(cols)
}

/// Place a day-month date into the event's year. For events spanning New
/// Year the end year is used when that puts the date inside the event.
fn infer_year(day: u32, month: u32, event: &Event) -> Option<NaiveDate> {
    let start_year = event.start_date.year();
    let end_year = event.end_date.year();
    let in_start = NaiveDate::from_ymd_opt(start_year, month, day);
    if start_year != end_year
        && let Some(date) = NaiveDate::from_ymd_opt(end_year, month, day)
        && date >= event.start_date
        && date <= event.end_date
    {
        return Some(date);
    }
    in_start
}

/// Parse a single date. Accepts `YYYY-MM-DD`, `DD.MM.YYYY`, `DD.MM.YY`,
/// `DD/MM/YYYY` and `DD.MM` (year taken from the event).
pub fn parse_date(s: &str, event: &Event) -> Option<NaiveDate> {
    let s = s.trim().trim_end_matches('.');
    if s.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    let parts: Vec<&str> = s.split(['.', '/']).map(str::trim).collect();
    match parts.as_slice() {
        [d, m] => infer_year(d.parse().ok()?, m.parse().ok()?, event),
        [d, m, y] => {
            let year = match y.len() {
                2 => 2000 + y.parse::<i32>().ok()?,
                4 => y.parse::<i32>().ok()?,
                _ => return None,
            };
            NaiveDate::from_ymd_opt(year, m.parse().ok()?, d.parse().ok()?)
        }
        _ => None,
    }
}

fn parse_bound(s: &str, event: &Event) -> Result<Option<NaiveDate>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    parse_date(s, event)
        .map(Some)
        .ok_or_else(|| format!("ungültiges Datum \"{s}\""))
}

/// Parse a stay such as `22.12-26.12`, `22.12.2025 - 26.12.2025`,
/// `2025-12-22 – 2025-12-26` or `22.12 bis 26.12`. Empty means the whole
/// event; a single date is the arrival with an open departure.
pub fn parse_stay(s: &str, event: &Event) -> Result<Stay, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Stay::open());
    }

    let split = [" bis ", "–", "—", " - "]
        .iter()
        .find_map(|sep| s.split_once(sep))
        .or_else(|| {
            if parse_date(s, event).is_some() {
                None
            } else {
                s.split_once('-')
            }
        });

    let stay = match split {
        Some((from, to)) => Stay::new(parse_bound(from, event)?, parse_bound(to, event)?),
        None => Stay::new(parse_bound(s, event)?, None),
    };
    if stay.is_inverted() {
        return Err(format!("Anreise nach Abreise \"{s}\""));
    }
    Ok(stay)
}

pub fn parse_role(s: &str) -> Result<Role, String> {
    let normalized = normalize_header(s);
    if normalized.is_empty() {
        return Ok(Role::Regular);
    }
    match normalized.as_str() {
        "regular" | "normal" | "teilnehmer" | "katilimci" => Ok(Role::Regular),
        "helper" | "helfer" | "yardimci" | "gorevli" => Ok(Role::Helper),
        "abi" | "abla" | "mezun" => Ok(Role::Abi),
        _ => Err(format!("unbekannte Rolle \"{}\"", s.trim())),
    }
}

fn cell(cells: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|i| cells.get(i))
        .map(String::as_str)
        .unwrap_or("")
}

fn parse_row(cells: &[String], cols: &Columns, line: usize, event: &Event) -> Result<ImportRow, String> {
    let first_name = cell(cells, cols.first_name).to_string();
    let last_name = cell(cells, cols.last_name).to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err("Vor- oder Nachname fehlt".into());
    }

    let age = match cell(cells, cols.age) {
        "" => None,
        raw => Some(
            raw.parse::<u32>()
                .map_err(|_| format!("ungültiges Alter \"{raw}\""))?,
        ),
    };
    let city = Some(cell(cells, cols.city).to_string()).filter(|c| !c.is_empty());

    let mut stay = parse_stay(cell(cells, cols.stay), event)?;
    if cols.arrival.is_some() || cols.departure.is_some() {
        let arrival = parse_bound(cell(cells, cols.arrival), event)?;
        let departure = parse_bound(cell(cells, cols.departure), event)?;
        stay = Stay::new(arrival.or(stay.arrival), departure.or(stay.departure));
        if stay.is_inverted() {
            return Err(format!("Anreise nach Abreise ({stay})"));
        }
    }

    let role = parse_role(cell(cells, cols.role))?;
    Ok(ImportRow {
        line,
        first_name,
        last_name,
        age,
        city,
        stay,
        role,
    })
}

/// Parse CSV text into import rows. Bad rows land in `errors` as
/// `"Zeile N: ..."` and do not stop the import.
pub fn parse_participants(text: &str, event: &Event) -> ParsedImport {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty())
        .peekable();

    let mut parsed = ParsedImport::default();
    let Some((_, first)) = lines.peek().copied() else {
        return parsed;
    };
    let cols = match detect_columns(&split_line(first)) {
        Some(cols) => {
            lines.next();
            cols
        }
        None => Columns::default_order(),
    };

    for (line, text) in lines {
        match parse_row(&split_line(text), &cols, line, event) {
            Ok(row) => parsed.rows.push(row),
            Err(e) => parsed.errors.push(format!("Zeile {line}: {e}")),
        }
    }
    parsed
}
