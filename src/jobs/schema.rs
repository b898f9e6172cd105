//! Database schema for analysis_jobs.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};
use anyhow::Result;
use rusqlite::Connection;

// =============================================================================
// Analysis Jobs Table - Version 0
// =============================================================================

const ANALYSIS_JOBS_TABLE_V0: Table = Table {
    name: "analysis_jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("video_reference", &SqlType::Text, non_null = true),
        sqlite_column!("exercise_id", &SqlType::Text, non_null = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("overall_score", &SqlType::Real),
        sqlite_column!("consistency", &SqlType::Real),
        sqlite_column!("feedback", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_jobs_status_created", "status, created_at"),
        ("idx_jobs_owner", "owner_id, created_at"),
    ],
};

// =============================================================================
// Analysis Jobs Table - Version 1 (source attempts and analysis details)
// =============================================================================

const ANALYSIS_JOBS_TABLE_V1: Table = Table {
    name: "analysis_jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("video_reference", &SqlType::Text, non_null = true),
        sqlite_column!("exercise_id", &SqlType::Text, non_null = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("overall_score", &SqlType::Real),
        sqlite_column!("consistency", &SqlType::Real),
        sqlite_column!("feedback", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("details", &SqlType::Text),
    ],
    indices: &[
        ("idx_jobs_status_created", "status, created_at"),
        ("idx_jobs_owner", "owner_id, created_at"),
    ],
};

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "ALTER TABLE analysis_jobs ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute("ALTER TABLE analysis_jobs ADD COLUMN details TEXT", [])?;
    Ok(())
}

pub const ANALYSIS_JOBS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[ANALYSIS_JOBS_TABLE_V0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[ANALYSIS_JOBS_TABLE_V1],
        migration: Some(migrate_v0_to_v1),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_version_creates_and_validates() {
        for schema in ANALYSIS_JOBS_VERSIONED_SCHEMAS {
            let conn = Connection::open_in_memory().unwrap();
            schema
                .create(&conn)
                .unwrap_or_else(|e| panic!("schema v{} should create: {}", schema.version, e));
            schema
                .validate(&conn)
                .unwrap_or_else(|e| panic!("schema v{} should validate: {}", schema.version, e));
        }
    }

    #[test]
    fn test_migration_reaches_latest_layout() {
        let conn = Connection::open_in_memory().unwrap();
        ANALYSIS_JOBS_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.execute(
            r#"INSERT INTO analysis_jobs (
                id, video_reference, exercise_id, owner_id, status, created_at, updated_at
            ) VALUES ('job-1', 'a.mp4', 'squat', 'user-1', 'queued', 1700000000, 1700000000)"#,
            [],
        )
        .unwrap();

        migrate_v0_to_v1(&conn).unwrap();

        ANALYSIS_JOBS_VERSIONED_SCHEMAS[1].validate(&conn).unwrap();
        let attempts: i64 = conn
            .query_row("SELECT attempts FROM analysis_jobs WHERE id = 'job-1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(attempts, 0);
    }

    #[test]
    fn test_v0_does_not_validate_as_v1() {
        let conn = Connection::open_in_memory().unwrap();
        ANALYSIS_JOBS_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        assert!(ANALYSIS_JOBS_VERSIONED_SCHEMAS[1].validate(&conn).is_err());
    }
}
