use camino::Utf8Path;
use chrono::Utc;
use tracing::{error, info};

use crate::codec;
use crate::config::Endpoints;
use crate::error::CilError;
use crate::fetch::{FetchOutcome, Fetcher, header_value};
use crate::fs_util;
use crate::layout::ArchiveLayout;
use crate::record::{AssetSuffix, DataFileRecord};

#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches_written: usize,
}

/// Drives the fetcher over a sequence of expected-file records ordered by dataset
/// id, committing each id's batch before the next id starts.
pub struct Downloader<'a, F: Fetcher + ?Sized> {
    fetcher: &'a F,
    endpoints: &'a Endpoints,
    layout: &'a ArchiveLayout,
}

impl<'a, F: Fetcher + ?Sized> Downloader<'a, F> {
    pub fn new(fetcher: &'a F, endpoints: &'a Endpoints, layout: &'a ArchiveLayout) -> Self {
        Self {
            fetcher,
            endpoints,
            layout,
        }
    }

    /// Downloads every record, accumulating records per id and persisting the
    /// previous id's batch the moment a new id is encountered. A crash mid-id
    /// loses only that id's uncommitted records; committed batches are untouched.
    pub fn run(&self, records: Vec<DataFileRecord>) -> Result<DownloadSummary, CilError> {
        let mut summary = DownloadSummary::default();
        let mut last: Option<(u64, bool)> = None;
        let mut batch: Vec<DataFileRecord> = Vec::new();

        for record in records {
            let id = record.id();
            let is_video = record.is_video == Some(true);
            let load_landing = last.map(|(prev, _)| prev != id).unwrap_or(true);

            if load_landing {
                if let Some((prev_id, prev_is_video)) = last.take() {
                    self.flush_batch(prev_id, prev_is_video, &mut batch, &mut summary)?;
                }
                self.fetcher.load_page(&self.endpoints.landing_url(id));
            }
            last = Some((id, is_video));

            info!(id, file = record.file_name().unwrap_or(""), "downloading");
            let dataset_dir = self.layout.ensure_dataset_dir(is_video, id)?;
            summary.attempted += 1;
            match self.download_one(record, &dataset_dir)? {
                Some(done) => {
                    if done.download_success == Some(true) {
                        summary.succeeded += 1;
                    } else {
                        summary.failed += 1;
                    }
                    batch.push(done);
                }
                None => summary.failed += 1,
            }
        }

        if let Some((prev_id, prev_is_video)) = last {
            self.flush_batch(prev_id, prev_is_video, &mut batch, &mut summary)?;
        }
        Ok(summary)
    }

    fn download_one(
        &self,
        record: DataFileRecord,
        dataset_dir: &Utf8Path,
    ) -> Result<Option<DataFileRecord>, CilError> {
        download_record(self.fetcher, self.endpoints, record, dataset_dir)
    }

    /// A batch file left by an earlier run is backed up and merged into rather
    /// than clobbered: a retry pass carries only the records it re-fetched, and
    /// the successful records already persisted must keep their metadata.
    fn flush_batch(
        &self,
        id: u64,
        is_video: bool,
        batch: &mut Vec<DataFileRecord>,
        summary: &mut DownloadSummary,
    ) -> Result<(), CilError> {
        if batch.is_empty() {
            return Ok(());
        }
        let path = self.layout.batch_path(is_video, id);
        let records = if path.as_std_path().is_file() {
            codec::make_backup(path.as_std_path())?;
            let existing = codec::read_records(path.as_std_path())?;
            merge_batch(existing, batch)
        } else {
            std::mem::take(batch)
        };
        codec::write_records(path.as_std_path(), &records)?;
        summary.batches_written += 1;
        batch.clear();
        Ok(())
    }
}

/// Merges freshly downloaded records into a previously persisted batch: a fresh
/// record replaces the entry sharing its file name, anything else is appended.
/// Order of the existing batch is preserved.
fn merge_batch(existing: Vec<DataFileRecord>, fresh: &[DataFileRecord]) -> Vec<DataFileRecord> {
    let mut merged = existing;
    for record in fresh {
        match merged
            .iter_mut()
            .find(|entry| entry.file_name() == record.file_name())
        {
            Some(slot) => *slot = record.clone(),
            None => merged.push(record.clone()),
        }
    }
    merged
}

/// Fetches one expected file into `dataset_dir` and folds the transport result
/// into the record. An unrecognized file suffix cannot be resolved to an
/// endpoint; the record is dropped with an error logged.
pub fn download_record<F: Fetcher + ?Sized>(
    fetcher: &F,
    endpoints: &Endpoints,
    record: DataFileRecord,
    dataset_dir: &Utf8Path,
) -> Result<Option<DataFileRecord>, CilError> {
    let Some(file_name) = record.file_name() else {
        error!(id = record.id(), "record has no file name, skipping");
        return Ok(None);
    };
    let Some(suffix) = AssetSuffix::from_file_name(file_name) else {
        error!(id = record.id(), file_name, "unrecognized suffix, skipping");
        return Ok(None);
    };

    let url = endpoints.download_url(suffix, record.id());
    let outcome = fetcher.fetch(&url, dataset_dir.as_std_path())?;
    Ok(Some(apply_outcome(record, outcome, dataset_dir)?))
}

/// Folds a fetch outcome into the record: success gets transport fields plus a
/// fresh checksum and size measured on the file just written; anything else is
/// marked failed with checksum and size left unset.
pub fn apply_outcome(
    mut record: DataFileRecord,
    outcome: FetchOutcome,
    dataset_dir: &Utf8Path,
) -> Result<DataFileRecord, CilError> {
    if outcome.status == 200 {
        if let Some(local_file) = &outcome.local_file {
            let local_path = dataset_dir.join(local_file);
            record.checksum = Some(fs_util::checksum_file(local_path.as_std_path())?);
            record.file_size = Some(fs_util::file_size(local_path.as_std_path())?);
        }
        if let Some(headers) = &outcome.headers {
            if let Some(content_type) = header_value(headers, "Content-Type") {
                record.mime_type = Some(content_type.to_string());
            }
        }
        record.download_success = Some(true);
        record.download_time = Some(Utc::now().timestamp());
        record.local_file = outcome.local_file;
        record.headers = outcome.headers;
    } else {
        record.download_success = Some(false);
    }
    Ok(record)
}
