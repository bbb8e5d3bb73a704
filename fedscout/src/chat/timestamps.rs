//! Timestamp normalization for chat sources.
//!
//! Values are converted to ISO-8601 when one of the known source shapes
//! parses; anything else is carried through verbatim.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value;

/// Epoch values above this are taken as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

const NAIVE_ISO: &str = "%Y-%m-%dT%H:%M:%S";

const MESSENGER_FORMATS: &[&str] = &[
    "%b %d, %Y %I:%M:%S %p",
    "%b %d, %Y, %I:%M:%S %p",
    "%b %d, %Y %I:%M %p",
    "%b %d, %Y, %I:%M %p",
];

/// Converts epoch seconds or milliseconds to RFC 3339 in UTC
pub fn from_epoch(value: f64) -> Option<String> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Normalizes a timestamp string from any supported source
pub fn normalize(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Ok(number) = raw.parse::<f64>() {
        if let Some(iso) = from_epoch(number) {
            return iso;
        }
    }
    if DateTime::parse_from_rfc3339(raw).is_ok() {
        return raw.to_string();
    }
    if let Some(iso) = telegram(raw) {
        return iso;
    }
    if let Some(iso) = messenger(raw) {
        return iso;
    }
    raw.to_string()
}

/// Telegram tooltips: `15.03.2023 14:22:05 UTC+03:00`
pub fn telegram(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_str(raw, "%d.%m.%Y %H:%M:%S UTC%:z") {
        return Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    NaiveDateTime::parse_from_str(raw, "%d.%m.%Y %H:%M:%S")
        .ok()
        .map(|dt| dt.format(NAIVE_ISO).to_string())
}

/// Messenger footers: `Jan 02, 2023 10:00:00 AM`
pub fn messenger(raw: &str) -> Option<String> {
    MESSENGER_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .map(|dt| dt.format(NAIVE_ISO).to_string())
    })
}

/// WhatsApp headers carry a numeric date and a 12h or 24h clock.
///
/// Dates are read month-first unless the first field cannot be a month;
/// four-digit leading fields are read year-first. Two-digit years are 20xx.
pub fn whatsapp(date: &str, time: &str) -> Option<String> {
    let parts: Vec<u32> = date
        .split(['/', '.', '-'])
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    let &[a, b, c] = parts.as_slice() else {
        return None;
    };
    let (year, month, day) = if a > 31 {
        (a, b, c)
    } else if a > 12 {
        (c, b, a)
    } else {
        (c, a, b)
    };
    let year = if year < 100 { year + 2000 } else { year };
    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let time = clock(time)?;
    Some(date.and_time(time).format(NAIVE_ISO).to_string())
}

fn clock(raw: &str) -> Option<NaiveTime> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| *c != '.')
        .collect::<String>()
        .to_ascii_lowercase();
    let (digits, meridiem) = if let Some(rest) = cleaned.strip_suffix("am") {
        (rest.trim(), Some(false))
    } else if let Some(rest) = cleaned.strip_suffix("pm") {
        (rest.trim(), Some(true))
    } else {
        (cleaned.trim(), None)
    };

    let fields: Vec<u32> = digits
        .split(':')
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    let (mut hour, minute, second) = match fields[..] {
        [h, m] => (h, m, 0),
        [h, m, s] => (h, m, s),
        _ => return None,
    };
    match meridiem {
        Some(pm) if hour == 12 => hour = if pm { 12 } else { 0 },
        Some(true) => hour += 12,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

/// Pulls a timestamp out of a JSON value of any common shape
pub fn from_json(value: &Value) -> String {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch).unwrap_or_default(),
        Value::String(s) => normalize(s),
        Value::Object(map) => ["$date", "$numberLong", "timestamp"]
            .iter()
            .find_map(|key| map.get(*key))
            .map(from_json)
            .unwrap_or_default(),
        _ => String::new(),
    }
}
