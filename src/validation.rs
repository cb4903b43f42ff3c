//! Field-level input rules shared by the create/update handlers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::FieldErrors;

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.@+-]+$").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@.]+$").unwrap());

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";

/// Whether absent fields are errors (create / full update) or skipped (partial update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Partial,
}

fn too_long(max: usize) -> String {
    format!("Ensure this field has no more than {} characters.", max)
}

/// Non-blank trimmed text. Returns `None` when absent or invalid.
pub fn text(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    presence: Presence,
    max: Option<usize>,
) -> Option<String> {
    let Some(value) = value else {
        if presence == Presence::Required {
            errors.add(field, REQUIRED);
        }
        return None;
    };
    let value = value.trim().to_string();
    if value.is_empty() {
        errors.add(field, BLANK);
        return None;
    }
    if let Some(max) = max {
        if value.chars().count() > max {
            errors.add(field, too_long(max));
            return None;
        }
    }
    Some(value)
}

/// Trimmed text that may be blank; absent stays `None`.
pub fn optional_text(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    max: Option<usize>,
) -> Option<String> {
    let value = value?.trim().to_string();
    if let Some(max) = max {
        if value.chars().count() > max {
            errors.add(field, too_long(max));
            return None;
        }
    }
    Some(value)
}

pub fn username(
    errors: &mut FieldErrors,
    value: Option<String>,
    presence: Presence,
) -> Option<String> {
    let value = text(errors, "username", value, presence, Some(150))?;
    if !USERNAME_RE.is_match(&value) {
        errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
        return None;
    }
    Some(value)
}

pub fn email(errors: &mut FieldErrors, value: Option<String>, presence: Presence) -> Option<String> {
    let value = text(errors, "email", value, presence, Some(254))?;
    if !EMAIL_RE.is_match(&value) {
        errors.add("email", "Enter a valid email address.");
        return None;
    }
    Some(value)
}

/// `YYYY-MM-DD`
pub fn date(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    presence: Presence,
) -> Option<NaiveDate> {
    let value = text(errors, field, value, presence, None)?;
    match NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.add(
                field,
                "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.",
            );
            None
        }
    }
}

/// ISO-8601 date-time. Values without an offset are taken as UTC.
pub fn datetime(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    presence: Presence,
) -> Option<DateTime<Utc>> {
    let value = text(errors, field, value, presence, None)?;
    match parse_datetime(&value) {
        Some(dt) => Some(dt),
        None => {
            errors.add(
                field,
                "Datetime has wrong format. Use one of these formats instead: YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].",
            );
            None
        }
    }
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Fixed-width UTC form used for every stored timestamp, so text order is time order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
