//! SQLite export of the checkpoint store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

use super::{CatalogError, CatalogRecord};

/// Row counts written by an export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub courses: usize,
    pub modules: usize,
    pub videos: usize,
}

/// Differences between the checkpoint store and an exported database.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub checked_courses: usize,
    pub checked_videos: usize,
    pub mismatches: Vec<String>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

fn db_err(e: rusqlite::Error) -> CatalogError {
    CatalogError::Database(e.to_string())
}

fn initialize_schema(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS modules (
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            module TEXT NOT NULL,
            PRIMARY KEY (course_id, module)
        );

        CREATE TABLE IF NOT EXISTS videos (
            course_id TEXT NOT NULL,
            module TEXT NOT NULL,
            video TEXT NOT NULL,
            playlist TEXT NOT NULL,
            PRIMARY KEY (course_id, module, video),
            FOREIGN KEY (course_id, module) REFERENCES modules(course_id, module) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_videos_course ON videos(course_id);
        "#,
    )
    .map_err(db_err)
}

/// Writes every record into a fresh SQLite database at `path`.
pub fn export_catalog(
    records: &BTreeMap<String, CatalogRecord>,
    path: &Path,
) -> Result<ExportSummary, CatalogError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let mut conn = Connection::open(path).map_err(db_err)?;
    initialize_schema(&conn)?;

    let mut summary = ExportSummary::default();
    let tx = conn.transaction().map_err(db_err)?;
    {
        let mut insert_course = tx
            .prepare("INSERT INTO courses (id, name) VALUES (?, ?)")
            .map_err(db_err)?;
        let mut insert_module = tx
            .prepare("INSERT INTO modules (course_id, module) VALUES (?, ?)")
            .map_err(db_err)?;
        let mut insert_video = tx
            .prepare(
                "INSERT INTO videos (course_id, module, video, playlist) VALUES (?, ?, ?, ?)",
            )
            .map_err(db_err)?;

        for (id, record) in records {
            insert_course
                .execute(params![id, record.name])
                .map_err(db_err)?;
            summary.courses += 1;

            for (module, videos) in &record.modules {
                insert_module.execute(params![id, module]).map_err(db_err)?;
                summary.modules += 1;

                for (video, playlist) in videos {
                    insert_video
                        .execute(params![id, module, video, playlist])
                        .map_err(db_err)?;
                    summary.videos += 1;
                }
            }
        }
    }
    tx.commit().map_err(db_err)?;
    conn.execute_batch("VACUUM;").map_err(db_err)?;

    info!(
        "Exported {} courses, {} modules, {} videos to {:?}",
        summary.courses, summary.modules, summary.videos, path
    );
    Ok(summary)
}

/// Compares the exported database at `path` with `records`.
pub fn verify_export(
    records: &BTreeMap<String, CatalogRecord>,
    path: &Path,
) -> Result<VerifyReport, CatalogError> {
    let conn = Connection::open(path).map_err(db_err)?;
    let mut report = VerifyReport::default();

    let mut courses: BTreeMap<String, String> = BTreeMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT id, name FROM courses")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(db_err)?;
        for row in rows {
            let (id, name) = row.map_err(db_err)?;
            courses.insert(id, name);
        }
    }

    let mut videos: BTreeMap<(String, String, String), String> = BTreeMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT course_id, module, video, playlist FROM videos")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    (
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ),
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?;
        for row in rows {
            let (key, playlist) = row.map_err(db_err)?;
            videos.insert(key, playlist);
        }
    }

    let mut expected_videos = BTreeSet::new();
    for (id, record) in records {
        report.checked_courses += 1;
        match courses.get(id) {
            None => report.mismatches.push(format!("course {} missing", id)),
            Some(name) if name != &record.name => report.mismatches.push(format!(
                "course {} name differs: {:?} != {:?}",
                id, name, record.name
            )),
            Some(_) => {}
        }

        for (module, entries) in &record.modules {
            for (video, playlist) in entries {
                report.checked_videos += 1;
                let key = (id.clone(), module.clone(), video.clone());
                match videos.get(&key) {
                    None => report.mismatches.push(format!(
                        "video {}/{}/{} missing",
                        id, module, video
                    )),
                    Some(stored) if stored != playlist => report.mismatches.push(format!(
                        "video {}/{}/{} playlist differs",
                        id, module, video
                    )),
                    Some(_) => {}
                }
                expected_videos.insert(key);
            }
        }
    }

    for id in courses.keys().filter(|id| !records.contains_key(*id)) {
        report
            .mismatches
            .push(format!("course {} not in checkpoint store", id));
    }
    for (id, module, video) in videos.keys().filter(|k| !expected_videos.contains(*k)) {
        report.mismatches.push(format!(
            "video {}/{}/{} not in checkpoint store",
            id, module, video
        ));
    }

    Ok(report)
}
