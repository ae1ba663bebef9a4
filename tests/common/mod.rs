#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use cildata_util::db::StatusStore;
use cildata_util::error::CilError;
use cildata_util::fetch::{FAILED_STATUS, FetchOutcome, Fetcher, local_file_name};
use cildata_util::record::DataFileRecord;

/// Fetcher double that writes a fixed payload for every URL and records each
/// landing-page hit. With `fail` set every fetch exhausts as the sentinel outcome.
pub struct MockFetcher {
    pub pages: Mutex<Vec<String>>,
    pub fail: bool,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            pages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn page_loads(&self) -> Vec<String> {
        self.pages.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchOutcome, CilError> {
        if self.fail {
            return Ok(FetchOutcome {
                local_file: None,
                headers: None,
                status: FAILED_STATUS,
            });
        }
        let name = local_file_name(url);
        fs::write(dest_dir.join(&name), b"payload")
            .map_err(|err| CilError::Filesystem(err.to_string()))?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "image/jpeg".to_string());
        headers.insert(
            "date".to_string(),
            "Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        );
        Ok(FetchOutcome {
            local_file: Some(name),
            headers: Some(headers),
            status: 200,
        })
    }

    fn load_page(&self, url: &str) {
        self.pages.lock().unwrap().push(url.to_string());
    }
}

/// Status-store double backed by a fixed seed list, recording every inserted row.
pub struct MockStore {
    pub seeds: Vec<DataFileRecord>,
    pub inserted: Mutex<Vec<DataFileRecord>>,
}

impl MockStore {
    pub fn new(seeds: Vec<DataFileRecord>) -> Self {
        Self {
            seeds,
            inserted: Mutex::new(Vec::new()),
        }
    }

    pub fn inserted_records(&self) -> Vec<DataFileRecord> {
        self.inserted.lock().unwrap().clone()
    }
}

impl StatusStore for MockStore {
    fn public_datasets(&self, id: Option<u64>) -> Result<Vec<DataFileRecord>, CilError> {
        Ok(self
            .seeds
            .iter()
            .filter(|record| id.map_or(true, |only| record.id() == only))
            .cloned()
            .collect())
    }

    fn insert_status(&self, record: &DataFileRecord) -> Result<(), CilError> {
        self.inserted.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Seed record the way the data-type table produces them.
pub fn seed(id: u64, is_video: bool, has_raw: Option<bool>) -> DataFileRecord {
    let mut record = DataFileRecord::new(id);
    record.is_video = Some(is_video);
    record.has_raw = has_raw;
    record
}
