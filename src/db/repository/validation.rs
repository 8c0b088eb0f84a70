use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::{
    fmt_datetime, parse_datetime, parse_opt_datetime, parse_opt_uuid, parse_uuid, DatabaseError,
};
use crate::models::enums::ValidationType;
use crate::models::ClinicalValidation;

pub fn insert_clinical_validation(
    conn: &Connection,
    v: &ClinicalValidation,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO clinical_validations
         (id, child_id, pattern_id, insight_id, validation_type, validated_by,
          treatment_changed, description, caregiver_confirmed, caregiver_confirmed_at,
          validation_strength, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            v.id.to_string(),
            v.child_id.to_string(),
            v.pattern_id.map(|id| id.to_string()),
            v.insight_id.map(|id| id.to_string()),
            v.validation_type.as_str(),
            v.validated_by,
            v.treatment_changed as i32,
            v.description,
            v.caregiver_confirmed as i32,
            v.caregiver_confirmed_at.as_ref().map(fmt_datetime),
            v.validation_strength,
            v.expires_at.as_ref().map(fmt_datetime),
            fmt_datetime(&v.created_at),
        ],
    )?;
    Ok(())
}

/// Validations recorded for a child, newest first.
pub fn list_validations_for_child(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<Vec<ClinicalValidation>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, child_id, pattern_id, insight_id, validation_type, validated_by,
                treatment_changed, description, caregiver_confirmed, caregiver_confirmed_at,
                validation_strength, expires_at, created_at
         FROM clinical_validations WHERE child_id = ?1
         ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(params![child_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, i32>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, i32>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, f64>(10)?,
            row.get::<_, Option<String>>(11)?,
            row.get::<_, String>(12)?,
        ))
    })?;

    let mut validations = Vec::new();
    for row in rows {
        let (
            id,
            child,
            pattern_id,
            insight_id,
            validation_type,
            validated_by,
            treatment_changed,
            description,
            caregiver_confirmed,
            caregiver_confirmed_at,
            validation_strength,
            expires_at,
            created_at,
        ) = row?;
        validations.push(ClinicalValidation {
            id: parse_uuid(&id)?,
            child_id: parse_uuid(&child)?,
            pattern_id: parse_opt_uuid(pattern_id)?,
            insight_id: parse_opt_uuid(insight_id)?,
            validation_type: ValidationType::from_str(&validation_type)?,
            validated_by,
            treatment_changed: treatment_changed != 0,
            description,
            caregiver_confirmed: caregiver_confirmed != 0,
            caregiver_confirmed_at: parse_opt_datetime(caregiver_confirmed_at)?,
            validation_strength,
            expires_at: parse_opt_datetime(expires_at)?,
            created_at: parse_datetime(&created_at)?,
        });
    }
    Ok(validations)
}

/// (total, provider-confirmed, average strength) for a child.
pub fn validation_totals(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<(u32, u32, Option<f64>), DatabaseError> {
    let totals = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN validation_type = ?2 THEN 1 ELSE 0 END), 0),
                AVG(validation_strength)
         FROM clinical_validations WHERE child_id = ?1",
        params![child_id.to_string(), ValidationType::ProviderConfirmed.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::NaiveDate;

    fn validation(child_id: Uuid, kind: ValidationType, strength: f64) -> ClinicalValidation {
        ClinicalValidation {
            id: Uuid::new_v4(),
            child_id,
            pattern_id: Some(Uuid::new_v4()),
            insight_id: None,
            validation_type: kind,
            validated_by: "Dr. Okafor".into(),
            treatment_changed: false,
            description: Some("Matches clinic notes".into()),
            caregiver_confirmed: false,
            caregiver_confirmed_at: None,
            validation_strength: strength,
            expires_at: None,
            created_at: NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn insert_and_list() {
        let conn = open_memory_database().unwrap();
        let child = Uuid::new_v4();
        let v = validation(child, ValidationType::ProviderSuspected, 0.6);
        insert_clinical_validation(&conn, &v).unwrap();

        let listed = list_validations_for_child(&conn, &child).unwrap();
        assert_eq!(listed, vec![v]);
        assert!(list_validations_for_child(&conn, &Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn totals_split_provider_confirmed() {
        let conn = open_memory_database().unwrap();
        let child = Uuid::new_v4();
        insert_clinical_validation(&conn, &validation(child, ValidationType::ProviderConfirmed, 0.9)).unwrap();
        insert_clinical_validation(&conn, &validation(child, ValidationType::CaregiverReported, 0.5)).unwrap();

        let (total, clinical, avg) = validation_totals(&conn, &child).unwrap();
        assert_eq!(total, 2);
        assert_eq!(clinical, 1);
        assert!((avg.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn totals_empty_child() {
        let conn = open_memory_database().unwrap();
        let (total, clinical, avg) = validation_totals(&conn, &Uuid::new_v4()).unwrap();
        assert_eq!((total, clinical), (0, 0));
        assert!(avg.is_none());
    }
}
