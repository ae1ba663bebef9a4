use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::error::CilError;
use crate::fetch::header_value;
use crate::record::{DataFileRecord, JPG_SUFFIX};

pub const OCTET_STREAM_MIMETYPE: &str = "application/octet-stream";

/// The relational status collaborator: a source of public dataset ids and a sink
/// for per-file download status rows. Tools and tests inject alternates.
pub trait StatusStore {
    /// One seed record per public dataset id, ascending, with `is_video` and
    /// `has_raw` populated from the data-type table. `id` scopes to one dataset.
    fn public_datasets(&self, id: Option<u64>) -> Result<Vec<DataFileRecord>, CilError>;

    /// Writes one status row for a record into the download-status table.
    fn insert_status(&self, record: &DataFileRecord) -> Result<(), CilError>;
}

/// Status table layout, matching the legacy `cil_download_status` schema. The
/// data-type table is owned by the archive and never created here.
const CREATE_STATUS_TABLE: &str = "CREATE TABLE IF NOT EXISTS cil_download_status (
    id               INTEGER PRIMARY KEY,
    image_id         INTEGER,
    is_video         BOOLEAN,
    file_name        TEXT,
    download_success BOOLEAN,
    download_time    TIMESTAMP,
    checksum         BOOLEAN,
    mime_type        TEXT,
    num_of_bytes     INTEGER,
    checksum_value   TEXT
);";

pub struct SqliteStatusStore {
    conn: Connection,
}

impl SqliteStatusStore {
    pub fn open(path: &Path) -> Result<Self, CilError> {
        debug!(path = %path.display(), "opening status database");
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_STATUS_TABLE)?;
        Ok(Self { conn })
    }

    /// In-memory database, for testing.
    pub fn open_in_memory() -> Result<Self, CilError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_STATUS_TABLE)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl StatusStore for SqliteStatusStore {
    fn public_datasets(&self, id: Option<u64>) -> Result<Vec<DataFileRecord>, CilError> {
        // ids are stored with the legacy CIL_ prefix
        let base = "SELECT replace(image_id, 'CIL_', ''), is_video, has_raw
                    FROM cil_data_type WHERE is_public = 1";
        let mut records = Vec::new();
        let mut collect = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            let raw_id: String = row.get(0)?;
            let is_video: bool = row.get(1)?;
            let has_raw: Option<bool> = row.get(2)?;
            if let Ok(parsed) = raw_id.parse::<u64>() {
                let mut record = DataFileRecord::new(parsed);
                record.is_video = Some(is_video);
                record.has_raw = has_raw;
                records.push(record);
            } else {
                debug!(raw_id, "skipping unparsable dataset id");
            }
            Ok(())
        };

        match id {
            Some(one) => {
                let sql = format!("{base} AND image_id = ?1 ORDER BY image_id");
                let mut stmt = self.conn.prepare(&sql)?;
                let mut rows = stmt.query(params![format!("CIL_{one}")])?;
                while let Some(row) = rows.next()? {
                    collect(row)?;
                }
            }
            None => {
                let sql = format!("{base} ORDER BY CAST(replace(image_id, 'CIL_', '') AS INTEGER)");
                let mut stmt = self.conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    collect(row)?;
                }
            }
        }
        Ok(records)
    }

    fn insert_status(&self, record: &DataFileRecord) -> Result<(), CilError> {
        let row = StatusRow::from_record(record);
        self.conn.execute(
            "INSERT INTO cil_download_status
                 (id, image_id, is_video, file_name, download_success, download_time,
                  checksum, mime_type, num_of_bytes, checksum_value)
             VALUES ((SELECT COALESCE(MAX(id), 0) + 1 FROM cil_download_status),
                     ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.image_id,
                row.is_video,
                row.file_name,
                row.download_success,
                row.download_time,
                row.has_checksum,
                row.mime_type,
                row.num_of_bytes,
                row.checksum_value,
            ],
        )?;
        Ok(())
    }
}

/// One download-status row, normalized from a record per the table's conventions:
/// missing mime defaults to octet-stream, missing size to 0, a `.jpg` file is never
/// a video, and the timestamp comes from the transport `Date` header when present.
#[derive(Debug, PartialEq)]
pub struct StatusRow {
    pub image_id: i64,
    pub is_video: bool,
    pub file_name: Option<String>,
    pub download_success: bool,
    pub download_time: i64,
    pub has_checksum: bool,
    pub mime_type: String,
    pub num_of_bytes: i64,
    pub checksum_value: Option<String>,
}

impl StatusRow {
    pub fn from_record(record: &DataFileRecord) -> Self {
        let is_jpg = record
            .file_name()
            .map(|name| name.ends_with(JPG_SUFFIX))
            .unwrap_or(false);
        let is_video = if is_jpg {
            false
        } else {
            record.is_video.unwrap_or(false)
        };

        let download_time = record
            .headers
            .as_ref()
            .and_then(|headers| header_value(headers, "Date"))
            .and_then(|date| DateTime::parse_from_rfc2822(date).ok())
            .map(|parsed| parsed.timestamp())
            .or(record.download_time)
            .unwrap_or_else(|| Utc::now().timestamp());

        // SQLite integers are signed; ids and sizes fit comfortably in i64
        Self {
            image_id: record.id() as i64,
            is_video,
            file_name: record.file_name.clone(),
            download_success: record.download_success.unwrap_or(false),
            download_time,
            has_checksum: record.checksum.is_some(),
            mime_type: record
                .mime_type
                .clone()
                .unwrap_or_else(|| OCTET_STREAM_MIMETYPE.to_string()),
            num_of_bytes: record.file_size.unwrap_or(0) as i64,
            checksum_value: record.checksum.clone(),
        }
    }
}
