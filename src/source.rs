use camino::Utf8PathBuf;
use tracing::debug;

use crate::record::{AssetSuffix, DataFileRecord, RAW_SUFFIX};

/// Expands one seed record per dataset id into one record per expected suffix.
///
/// Videos expand to `.flv`, `.raw`, `.jpg` and images to `.tif`, `.jpg`, `.raw`,
/// each a clone of the seed with `file_name` rewritten. With `omit_known_no_raw`
/// set, the `.raw` entry is suppressed entirely for image datasets the database
/// flags as lacking a raw asset; an unset `has_raw` means unknown and suppresses
/// nothing.
pub fn expand_records(seeds: Vec<DataFileRecord>, omit_known_no_raw: bool) -> Vec<DataFileRecord> {
    let mut expanded = Vec::with_capacity(seeds.len() * 3);
    for seed in seeds {
        for suffix in seed.expected_suffixes() {
            if omit_known_no_raw
                && *suffix == AssetSuffix::Raw
                && seed.is_video != Some(true)
                && seed.has_raw == Some(false)
            {
                debug!(id = seed.id(), "dataset has no raw asset, skipping .raw entry");
                continue;
            }
            let mut record = seed.clone();
            record.file_name = Some(format!("{}{}", seed.id(), suffix.as_str()));
            expanded.push(record);
        }
    }
    expanded
}

/// Drops records whose dataset directory already exists under the type-appropriate
/// base directory. Directory presence is a heuristic, not a completeness check: a
/// partially downloaded id is skipped just the same.
#[derive(Debug, Clone)]
pub struct FilesystemFilter {
    images_dir: Utf8PathBuf,
    videos_dir: Utf8PathBuf,
}

impl FilesystemFilter {
    pub fn new(images_dir: Utf8PathBuf, videos_dir: Utf8PathBuf) -> Self {
        Self {
            images_dir,
            videos_dir,
        }
    }

    pub fn filter(&self, records: Vec<DataFileRecord>) -> Vec<DataFileRecord> {
        records
            .into_iter()
            .filter(|record| {
                let base = if record.is_video == Some(true) {
                    &self.videos_dir
                } else {
                    &self.images_dir
                };
                let dataset_dir = base.join(record.id().to_string());
                if dataset_dir.as_std_path().is_dir() {
                    debug!(id = record.id(), "dataset directory exists, skipping");
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

/// Drops image records whose file name ends in `.raw` and whose dataset is known
/// to lack a raw asset. Video records always pass, as does any record whose
/// `has_raw` is unset (unknown does not suppress). Order is preserved.
pub fn drop_known_no_raw(records: Vec<DataFileRecord>) -> Vec<DataFileRecord> {
    records
        .into_iter()
        .filter(|record| {
            if record.is_video == Some(true) {
                return true;
            }
            let is_raw = record
                .file_name()
                .map(|name| name.ends_with(RAW_SUFFIX))
                .unwrap_or(false);
            !(is_raw && record.has_raw == Some(false))
        })
        .collect()
}

/// Keeps only records whose download has not succeeded, for retry passes.
pub fn keep_failed_downloads(records: Vec<DataFileRecord>) -> Vec<DataFileRecord> {
    records
        .into_iter()
        .filter(|record| record.download_success != Some(true))
        .collect()
}
