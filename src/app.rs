use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Endpoints;
use crate::convert::{self, Conversion};
use crate::db::StatusStore;
use crate::download::{DownloadSummary, Downloader, download_record};
use crate::error::CilError;
use crate::fetch::Fetcher;
use crate::layout::ArchiveLayout;
use crate::record::{AssetSuffix, DataFileRecord, JSON_SUFFIX};
use crate::source::{self, FilesystemFilter};

#[derive(Debug, Default, Clone)]
pub struct DownloadOptions {
    pub id: Option<u64>,
    pub skip_if_exists: bool,
    pub retry_failed: bool,
}

/// Downloads every expected file for every public dataset id. With `retry_failed`
/// the source list is replayed from the already-persisted batches and narrowed to
/// records that have not succeeded, instead of querying the database.
pub fn run_download<F: Fetcher + ?Sized>(
    store: &dyn StatusStore,
    fetcher: &F,
    endpoints: &Endpoints,
    layout: &ArchiveLayout,
    options: &DownloadOptions,
) -> Result<DownloadSummary, CilError> {
    let records = if options.retry_failed {
        let replayed = load_all_records(layout, options.id)?;
        info!(total = replayed.len(), "replayed records from download tree");
        source::keep_failed_downloads(replayed)
    } else {
        let seeds = store.public_datasets(options.id)?;
        info!(datasets = seeds.len(), "found public datasets");
        source::expand_records(seeds, false)
    };

    let records = if options.skip_if_exists {
        let filter = FilesystemFilter::new(layout.images_dir(), layout.videos_dir());
        let filtered = filter.filter(records);
        info!(remaining = filtered.len(), "after filtering existing dataset directories");
        filtered
    } else {
        records
    };

    Downloader::new(fetcher, endpoints, layout).run(records)
}

/// Normalizes every successfully downloaded raw asset into the canonical archive
/// layout, splicing derived records into each dataset's batch. Returns the number
/// of batches rewritten.
pub fn run_convert(
    layout: &ArchiveLayout,
    id: Option<u64>,
    only_check_zip_files: bool,
) -> Result<usize, CilError> {
    let all_records = load_all_records(layout, id)?;
    info!(total = all_records.len(), "total entries");
    let records = source::drop_known_no_raw(all_records);

    let mut rewritten = 0;
    for record in records {
        let is_video = record.is_video == Some(true);
        let base_dir = layout.dataset_dir(is_video, record.id());

        if only_check_zip_files {
            convert::check_zip_file(&record, base_dir.as_std_path())?;
            continue;
        }

        debug!(file = record.file_name().unwrap_or(""), "converting");
        let target_name = record.file_name().map(str::to_string);
        match convert::convert(record, base_dir.as_std_path())? {
            Conversion::Unchanged(_) => {}
            Conversion::Replaced(replacements) => {
                let Some(target_name) = target_name else {
                    continue;
                };
                let json_path = layout.batch_path(is_video, replacements[0].id());
                codec::make_backup(json_path.as_std_path())?;
                let batch = codec::read_records(json_path.as_std_path())?;
                let spliced = convert::splice_replacement(batch, &target_name, &replacements);
                codec::write_records(json_path.as_std_path(), &spliced)?;
                rewritten += 1;
            }
        }
    }
    Ok(rewritten)
}

/// Examines one dataset directory, synthesizes records for any expected suffix the
/// batch lacks, downloads files missing from disk, and rewrites the batch. With
/// `dry_run` the intended downloads are printed instead.
pub fn run_check<F: Fetcher + ?Sized>(
    fetcher: &F,
    endpoints: &Endpoints,
    dataset_dir: &Path,
    dry_run: bool,
) -> Result<usize, CilError> {
    if dry_run {
        println!("DRY RUN mode, no changes will be made");
    }
    let json_path = find_batch_file(dataset_dir)?;
    let records = codec::read_records(&json_path)?;
    let records = add_missing_records(records)
        .ok_or_else(|| CilError::EmptyDataset(dataset_dir.to_path_buf()))?;
    let dataset_dir_utf8 = Utf8Path::from_path(dataset_dir)
        .ok_or_else(|| CilError::Filesystem("non-UTF8 dataset path".to_string()))?;

    let mut updated = Vec::with_capacity(records.len());
    let mut downloads = 0usize;
    for record in records {
        let Some(file_name) = record.file_name().map(str::to_string) else {
            updated.push(record);
            continue;
        };
        if dataset_dir.join(&file_name).is_file() {
            updated.push(record);
            continue;
        }
        info!(file = %file_name, "file not found, downloading");
        if dry_run {
            println!("DRY RUN: download {file_name}");
            updated.push(record);
            continue;
        }
        if downloads == 0 {
            fetcher.load_page(&endpoints.landing_url(record.id()));
        }
        match download_record(fetcher, endpoints, record, dataset_dir_utf8)? {
            Some(done) => {
                downloads += 1;
                updated.push(done);
            }
            None => {}
        }
    }

    if downloads > 0 {
        info!("making backup and rewriting batch");
        codec::make_backup(&json_path)?;
        codec::write_records(&json_path, &updated)?;
    }
    Ok(downloads)
}

/// Inserts one download-status row per persisted record, skipping raw entries for
/// datasets known to lack a raw asset. Returns the number of rows written.
pub fn run_update_db(
    store: &dyn StatusStore,
    layout: &ArchiveLayout,
    id: Option<u64>,
) -> Result<usize, CilError> {
    let all_records = load_all_records(layout, id)?;
    info!(total = all_records.len(), "total entries");
    let records = source::drop_known_no_raw(all_records);

    let mut inserted = 0;
    for record in records {
        debug!(file = record.file_name().unwrap_or(""), "updating database");
        store.insert_status(&record)?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Repairs one batch file: flattens legacy nested headers and fills in missing
/// `file_size` fields from the files on disk. Returns whether the batch was
/// rewritten.
pub fn run_fix_json(json_path: &Path) -> Result<bool, CilError> {
    let needs_flatten = matches!(
        codec::read_records(json_path),
        Err(CilError::LegacyHeaders(_))
    );
    let mut records = codec::read_records_with_repair(json_path)?;
    let json_dir = json_path
        .parent()
        .ok_or_else(|| CilError::Filesystem("batch file has no parent".to_string()))?;

    let mut sizes_filled = false;
    for record in &mut records {
        if record.file_size.is_some() {
            continue;
        }
        let Some(file_name) = record.file_name() else {
            continue;
        };
        let local_path = json_dir.join(file_name);
        if !local_path.is_file() {
            warn!(path = %local_path.display(), "file not found, skipping size update");
            continue;
        }
        debug!(path = %local_path.display(), "updating file size");
        record.file_size = Some(crate::fs_util::file_size(&local_path)?);
        sizes_filled = true;
    }

    if needs_flatten || sizes_filled {
        debug!(path = %json_path.display(), "rewriting repaired batch");
        codec::make_backup(json_path)?;
        codec::write_records(json_path, &records)?;
        return Ok(true);
    }
    Ok(false)
}

/// Reconciles the `has_raw` flag of persisted image batches with the database.
/// Returns the number of batches rewritten.
pub fn run_update_has_raw(
    store: &dyn StatusStore,
    layout: &ArchiveLayout,
    id: Option<u64>,
) -> Result<usize, CilError> {
    let seeds = store.public_datasets(None)?;
    if seeds.is_empty() {
        return Err(CilError::Database("no public datasets found".to_string()));
    }
    let expanded = source::expand_records(seeds, false);
    let has_raw_by_name: std::collections::HashMap<String, Option<bool>> = expanded
        .iter()
        .filter_map(|record| {
            record
                .file_name()
                .map(|name| (name.to_string(), record.has_raw))
        })
        .collect();

    let mut rewritten = 0;
    for dataset_id in dataset_ids_in(&layout.images_dir())? {
        if let Some(only) = id {
            if only != dataset_id {
                continue;
            }
        }
        let json_path = layout.batch_path(false, dataset_id);
        let mut batch = codec::read_records(json_path.as_std_path())?;
        let mut changed = false;
        for record in &mut batch {
            let Some(db_has_raw) = record
                .file_name()
                .and_then(|name| has_raw_by_name.get(name))
            else {
                continue;
            };
            if record.has_raw != *db_has_raw {
                record.has_raw = *db_has_raw;
                changed = true;
            }
        }
        if changed {
            info!(id = dataset_id, "rewriting batch with updated has_raw");
            codec::make_backup(json_path.as_std_path())?;
            codec::write_records(json_path.as_std_path(), &batch)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Replays the full record set from every persisted batch under the images and
/// videos trees, ascending by dataset id. Dataset directories without a batch file
/// are logged and skipped.
pub fn load_all_records(
    layout: &ArchiveLayout,
    id: Option<u64>,
) -> Result<Vec<DataFileRecord>, CilError> {
    let mut records = Vec::new();
    for is_video in [false, true] {
        let type_dir = layout.type_dir(is_video);
        for dataset_id in dataset_ids_in(&type_dir)? {
            if let Some(only) = id {
                if only != dataset_id {
                    continue;
                }
            }
            let json_path = layout.batch_path(is_video, dataset_id);
            if !json_path.as_std_path().is_file() {
                warn!(path = %json_path, "dataset directory has no batch file, skipping");
                continue;
            }
            records.extend(codec::read_records(json_path.as_std_path())?);
        }
    }
    Ok(records)
}

/// Numeric dataset ids with a directory under `base`, ascending.
fn dataset_ids_in(base: &Utf8Path) -> Result<Vec<u64>, CilError> {
    if !base.as_std_path().is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(base.as_std_path())
        .map_err(|err| CilError::Filesystem(format!("read dir {base}: {err}")))?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CilError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        match entry.file_name().to_string_lossy().parse::<u64>() {
            Ok(id) => ids.push(id),
            Err(_) => debug!(name = %entry.file_name().to_string_lossy(), "skipping non-numeric directory"),
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// First batch file found in a dataset directory.
fn find_batch_file(dataset_dir: &Path) -> Result<PathBuf, CilError> {
    let entries = fs::read_dir(dataset_dir)
        .map_err(|err| CilError::Filesystem(format!("read dir {}: {err}", dataset_dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|err| CilError::Filesystem(err.to_string()))?;
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(JSON_SUFFIX) {
            return Ok(dataset_dir.join(name));
        }
    }
    Err(CilError::BatchNotFound(dataset_dir.join(format!(
        "*{JSON_SUFFIX}"
    ))))
}

/// Synthesizes a fresh record for every expected suffix the batch lacks, so a
/// partially persisted dataset can be completed. Returns `None` for an empty batch
/// whose dataset type cannot be determined.
fn add_missing_records(mut records: Vec<DataFileRecord>) -> Option<Vec<DataFileRecord>> {
    let first = records.first()?.clone();
    let expected = first.expected_suffixes();

    for suffix in expected {
        let present = records.iter().any(|record| {
            record
                .file_name()
                .and_then(AssetSuffix::from_file_name)
                .map(|found| found == *suffix)
                .unwrap_or(false)
        });
        if !present {
            info!(suffix = %suffix, "missing record for suffix, adding");
            let mut fresh = DataFileRecord::new(first.id());
            fresh.is_video = first.is_video;
            fresh.has_raw = first.has_raw;
            fresh.file_name = Some(format!("{}{}", first.id(), suffix.as_str()));
            records.push(fresh);
        }
    }
    Some(records)
}
