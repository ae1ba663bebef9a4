use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::CilError;
use crate::fetch::header_value;
use crate::fs_util;
use crate::record::{AssetSuffix, DataFileRecord, RAW_SUFFIX, ZIP_MIMETYPE, ZIP_SUFFIX};

pub const CONTENT_DISPOSITION: &str = "Content-Disposition";

/// Result of normalizing one downloaded record into the canonical archive layout.
#[derive(Debug)]
pub enum Conversion {
    /// Non-raw assets and failed downloads pass through untouched.
    Unchanged(DataFileRecord),
    /// Raw assets are replaced by their derived records, in splice order.
    Replaced(Vec<DataFileRecord>),
}

/// Normalizes a downloaded asset. Raw videos are renamed to their real extension
/// and wrapped in a zip; raw images are unpacked, renamed to `<id>_orig.<ext>` and
/// re-wrapped. Everything else passes through.
pub fn convert(record: DataFileRecord, base_dir: &Path) -> Result<Conversion, CilError> {
    if record.download_success != Some(true) {
        return Ok(Conversion::Unchanged(record));
    }
    let Some(file_name) = record.file_name() else {
        return Err(CilError::MissingFileName(record.id()));
    };
    let is_raw = file_name.ends_with(RAW_SUFFIX);

    if record.is_video == Some(true) {
        if is_raw {
            Ok(Conversion::Replaced(convert_raw_video(record, base_dir)?))
        } else {
            Ok(Conversion::Unchanged(record))
        }
    } else if is_raw {
        Ok(Conversion::Replaced(convert_raw_image(record, base_dir)?))
    } else {
        Ok(Conversion::Unchanged(record))
    }
}

/// Raw video: the true container format is only discoverable from the
/// content-disposition filename the legacy host attached at download time.
fn convert_raw_video(
    record: DataFileRecord,
    base_dir: &Path,
) -> Result<Vec<DataFileRecord>, CilError> {
    let extension = raw_video_extension(&record)?;
    compare_extension_with_mimetype(&record, &extension);

    let id = record.id();
    let old_name = record
        .file_name()
        .ok_or(CilError::MissingFileName(id))?
        .to_string();
    let new_name = format!("{id}.{extension}");
    let old_path = base_dir.join(&old_name);
    let new_path = base_dir.join(&new_name);
    info!(id, from = %old_name, to = %new_name, "renaming raw video");
    fs::rename(&old_path, &new_path)
        .map_err(|err| CilError::Filesystem(format!("rename {}: {err}", old_path.display())))?;

    let mut renamed = record.clone();
    renamed.file_name = Some(new_name.clone());
    renamed.local_file = Some(new_name.clone());
    renamed.mime_type = Some(fs_util::guess_mime_type(&extension).to_string());

    let zipped = create_zip_record(&renamed, base_dir)?;
    Ok(vec![renamed, zipped])
}

/// Raw image: the `.raw` download is really a depositor zip holding exactly one
/// original file. The original is pulled out as `<id>_orig.<ext>` and re-wrapped
/// into `<id>.zip`; the `.raw` file is removed only once everything else succeeded.
fn convert_raw_image(
    record: DataFileRecord,
    base_dir: &Path,
) -> Result<Vec<DataFileRecord>, CilError> {
    let id = record.id();
    let raw_name = record
        .file_name()
        .ok_or(CilError::MissingFileName(id))?
        .to_string();
    let raw_path = base_dir.join(&raw_name);
    if !fs_util::is_zip_file(&raw_path) {
        return Err(CilError::NotAZipFile(raw_path));
    }

    let scratch = tempfile::Builder::new()
        .prefix("extract")
        .tempdir_in(base_dir)
        .map_err(|err| CilError::Filesystem(err.to_string()))?;
    let extracted = fs_util::extract_single_entry(&raw_path, scratch.path())?;

    let extension = extracted
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(|| {
            CilError::Zip(format!("entry in {} has no extension", raw_path.display()))
        })?;
    let orig_name = format!("{id}_orig.{extension}");
    let orig_path = base_dir.join(&orig_name);
    info!(id, file = %orig_name, "extracted original image");
    fs::rename(&extracted, &orig_path)
        .map_err(|err| CilError::Filesystem(format!("rename to {}: {err}", orig_path.display())))?;

    let mut orig = DataFileRecord::new(id);
    orig.is_video = record.is_video;
    orig.has_raw = record.has_raw;
    orig.file_name = Some(orig_name.clone());
    orig.local_file = Some(orig_name.clone());
    orig.mime_type = Some(fs_util::guess_mime_type(&extension).to_string());
    orig.checksum = Some(fs_util::checksum_file(&orig_path)?);
    orig.file_size = Some(fs_util::file_size(&orig_path)?);

    let zipped = create_zip_record(&orig, base_dir)?;
    // keep the download provenance of the raw asset on its zip replacement
    let mut zip_record = record.clone();
    zip_record.file_name = zipped.file_name.clone();
    zip_record.local_file = zipped.local_file.clone();
    zip_record.mime_type = zipped.mime_type.clone();
    zip_record.checksum = zipped.checksum.clone();
    zip_record.file_size = zipped.file_size;

    fs::remove_file(&raw_path)
        .map_err(|err| CilError::Filesystem(format!("remove {}: {err}", raw_path.display())))?;
    Ok(vec![zip_record, orig])
}

/// Wraps `record`'s file into `<id>.zip` (64-bit capable) under the archive path
/// `<id>/<file_name>` and returns a fresh record for the archive.
fn create_zip_record(
    record: &DataFileRecord,
    base_dir: &Path,
) -> Result<DataFileRecord, CilError> {
    let id = record.id();
    let file_name = record
        .file_name()
        .ok_or(CilError::MissingFileName(id))?
        .to_string();
    let zip_name = format!("{id}{ZIP_SUFFIX}");
    let zip_path = base_dir.join(&zip_name);
    let entry_name = format!("{id}/{file_name}");
    debug!(id, zip = %zip_name, entry = %entry_name, "creating archive");
    fs_util::create_zip_with_entry(&zip_path, &entry_name, &base_dir.join(&file_name))?;

    let mut zipped = DataFileRecord::new(id);
    zipped.is_video = record.is_video;
    zipped.has_raw = record.has_raw;
    zipped.file_name = Some(zip_name.clone());
    zipped.local_file = Some(zip_name);
    zipped.mime_type = Some(ZIP_MIMETYPE.to_string());
    zipped.checksum = Some(fs_util::checksum_file(&zip_path)?);
    zipped.file_size = Some(fs_util::file_size(&zip_path)?);
    Ok(zipped)
}

/// Real extension of a raw video, read from the content-disposition filename
/// recorded at download time, lowercased, without the leading dot.
fn raw_video_extension(record: &DataFileRecord) -> Result<String, CilError> {
    let name = record.file_name().unwrap_or("").to_string();
    let headers = record
        .headers
        .as_ref()
        .ok_or_else(|| CilError::MissingHeaders(name.clone()))?;
    let content_disp = header_value(headers, CONTENT_DISPOSITION)
        .ok_or_else(|| CilError::MissingHeaders(name))?;
    extension_from_content_disposition(content_disp)
}

/// Pulls the filename extension out of a content-disposition value, e.g.
/// `attachment; filename=10 sec 2.avi` yields `avi`.
pub fn extension_from_content_disposition(content_disp: &str) -> Result<String, CilError> {
    let filename_re = Regex::new(r"filename=(.+)$").unwrap();
    let captures = filename_re
        .captures(content_disp)
        .ok_or_else(|| CilError::ContentDisposition(content_disp.to_string()))?;
    // the legacy host sends both bare and quoted filename values
    let filename = captures[1].trim().trim_matches('"');
    let extension = filename
        .rsplit('.')
        .next()
        .filter(|ext| !ext.is_empty() && *ext != filename)
        .ok_or_else(|| CilError::ContentDisposition(content_disp.to_string()))?;
    Ok(extension.to_ascii_lowercase())
}

/// Logs (never fails) when the extension found in transport metadata disagrees
/// with the mime type recorded on the record.
fn compare_extension_with_mimetype(record: &DataFileRecord, extension: &str) {
    let Some(mime) = record.mime_type.as_deref() else {
        return;
    };
    let expected = fs_util::extensions_for_mime(mime);
    if !expected.is_empty() && !expected.contains(&extension) {
        warn!(
            id = record.id(),
            mime, extension, "extension does not match mime type"
        );
    }
}

/// Splices conversion output into a persisted batch: the record whose `file_name`
/// matches `target_file_name` is replaced in place by the derived records; all
/// other records are kept in order.
pub fn splice_replacement(
    batch: Vec<DataFileRecord>,
    target_file_name: &str,
    replacements: &[DataFileRecord],
) -> Vec<DataFileRecord> {
    let mut spliced = Vec::with_capacity(batch.len() + replacements.len());
    for entry in batch {
        if entry.file_name() == Some(target_file_name) {
            spliced.extend(replacements.iter().cloned());
        } else {
            spliced.push(entry);
        }
    }
    spliced
}

/// Audit mode: report raw image files that are not zip containers or hold more
/// than one entry, without converting anything.
pub fn check_zip_file(record: &DataFileRecord, base_dir: &Path) -> Result<(), CilError> {
    if record.is_video == Some(true) {
        return Ok(());
    }
    let Some(file_name) = record.file_name() else {
        return Ok(());
    };
    if AssetSuffix::from_file_name(file_name) != Some(AssetSuffix::Raw) {
        return Ok(());
    }
    let path = base_dir.join(file_name);
    if !fs_util::is_zip_file(&path) {
        println!("{} is NOT a zip file", path.display());
        return Ok(());
    }
    let entries = fs_util::zip_entry_names(&path)?;
    if entries.len() != 1 {
        println!("{} has {} entries:", path.display(), entries.len());
        for entry in entries {
            println!("\t{entry}");
        }
    }
    Ok(())
}
