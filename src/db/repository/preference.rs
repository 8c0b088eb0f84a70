use std::str::FromStr;

use chrono::{NaiveDateTime, Weekday};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{fmt_datetime, DatabaseError};
use crate::models::InteractionPreferences;

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn encode_days(days: &[Weekday]) -> String {
    days.iter().map(|d| weekday_code(*d)).collect::<Vec<_>>().join(",")
}

fn decode_days(raw: &str) -> Result<Vec<Weekday>, DatabaseError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Weekday::from_str(s).map_err(|_| DatabaseError::InvalidEnum {
                field: "preferred_days".into(),
                value: s.into(),
            })
        })
        .collect()
}

/// Stored preferences for a caregiver. None means fall back to defaults.
pub fn get_interaction_preferences(
    conn: &Connection,
    caregiver_id: &Uuid,
) -> Result<Option<InteractionPreferences>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT interrogatives_enabled, quiet_start_hour, quiet_end_hour, preferred_days,
                    max_interrogatives_per_day, delay_hours_after_change
             FROM interaction_preferences WHERE caregiver_id = ?1",
            params![caregiver_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, u32>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((enabled, quiet_start, quiet_end, days, max_per_day, delay)) = row else {
        return Ok(None);
    };

    Ok(Some(InteractionPreferences {
        caregiver_id: *caregiver_id,
        interrogatives_enabled: enabled != 0,
        quiet_start_hour: quiet_start,
        quiet_end_hour: quiet_end,
        preferred_days: decode_days(&days)?,
        max_interrogatives_per_day: max_per_day,
        delay_hours_after_change: delay,
    }))
}

/// Preferences for a caregiver, or the defaults when none were saved.
pub fn get_interaction_preferences_or_default(
    conn: &Connection,
    caregiver_id: &Uuid,
) -> Result<InteractionPreferences, DatabaseError> {
    Ok(get_interaction_preferences(conn, caregiver_id)?
        .unwrap_or_else(|| InteractionPreferences::defaults_for(*caregiver_id)))
}

/// Set a caregiver's preferences (upsert).
pub fn set_interaction_preferences(
    conn: &Connection,
    prefs: &InteractionPreferences,
    now: NaiveDateTime,
) -> Result<(), DatabaseError> {
    if prefs.quiet_start_hour > 23 || prefs.quiet_end_hour > 23 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "quiet hours out of range: {}-{}",
            prefs.quiet_start_hour, prefs.quiet_end_hour
        )));
    }

    conn.execute(
        "INSERT INTO interaction_preferences
         (caregiver_id, interrogatives_enabled, quiet_start_hour, quiet_end_hour,
          preferred_days, max_interrogatives_per_day, delay_hours_after_change, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(caregiver_id) DO UPDATE SET
             interrogatives_enabled = ?2, quiet_start_hour = ?3, quiet_end_hour = ?4,
             preferred_days = ?5, max_interrogatives_per_day = ?6,
             delay_hours_after_change = ?7, updated_at = ?8",
        params![
            prefs.caregiver_id.to_string(),
            prefs.interrogatives_enabled as i32,
            prefs.quiet_start_hour,
            prefs.quiet_end_hour,
            encode_days(&prefs.preferred_days),
            prefs.max_interrogatives_per_day,
            prefs.delay_hours_after_change,
            fmt_datetime(&now),
        ],
    )?;
    Ok(())
}
