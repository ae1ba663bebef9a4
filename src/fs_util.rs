use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::CilError;

/// Streaming sha-256 of a file, hex encoded.
pub fn checksum_file(path: &Path) -> Result<String, CilError> {
    let mut file = fs::File::open(path)
        .map_err(|err| CilError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|err| CilError::Filesystem(err.to_string()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn file_size(path: &Path) -> Result<u64, CilError> {
    let meta = fs::metadata(path)
        .map_err(|err| CilError::Filesystem(format!("stat {}: {err}", path.display())))?;
    Ok(meta.len())
}

pub fn is_zip_file(path: &Path) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    ZipArchive::new(file).is_ok()
}

/// Creates `zip_path` holding exactly `source` stored under `entry_name`. The
/// archive is written with the 64-bit extension enabled since raw microscopy assets
/// regularly exceed 4 GiB.
pub fn create_zip_with_entry(
    zip_path: &Path,
    entry_name: &str,
    source: &Path,
) -> Result<(), CilError> {
    let file = fs::File::create(zip_path)
        .map_err(|err| CilError::Filesystem(format!("create {}: {err}", zip_path.display())))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    writer
        .start_file(entry_name, options)
        .map_err(|err| CilError::Zip(err.to_string()))?;
    let mut input = fs::File::open(source)
        .map_err(|err| CilError::Filesystem(format!("open {}: {err}", source.display())))?;
    io::copy(&mut input, &mut writer).map_err(|err| CilError::Zip(err.to_string()))?;
    writer
        .finish()
        .map_err(|err| CilError::Zip(err.to_string()))?;
    Ok(())
}

/// Extracts the single entry of `zip_path` into `target_dir` and returns the path
/// of the extracted file. An archive with any other entry count is a hard error.
pub fn extract_single_entry(zip_path: &Path, target_dir: &Path) -> Result<PathBuf, CilError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| CilError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| CilError::Zip(err.to_string()))?;

    if archive.len() != 1 {
        return Err(CilError::ZipEntryCount {
            path: zip_path.to_path_buf(),
            count: archive.len(),
        });
    }

    let mut entry = archive
        .by_index(0)
        .map_err(|err| CilError::Zip(err.to_string()))?;
    // entries carry whatever path the depositor used; only the base name matters
    let entry_name = Path::new(entry.name())
        .file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| CilError::Zip(format!("unusable entry name in {}", zip_path.display())))?;

    let out_path = target_dir.join(entry_name);
    let mut out_file = fs::File::create(&out_path)
        .map_err(|err| CilError::Filesystem(format!("create {}: {err}", out_path.display())))?;
    io::copy(&mut entry, &mut out_file).map_err(|err| CilError::Filesystem(err.to_string()))?;
    Ok(out_path)
}

/// Entry names of a zip archive, used by the zip audit mode.
pub fn zip_entry_names(zip_path: &Path) -> Result<Vec<String>, CilError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| CilError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| CilError::Zip(err.to_string()))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| CilError::Zip(err.to_string()))?;
        names.push(entry.name().to_string());
    }
    Ok(names)
}

/// Mime type guessed from a file extension, matching what the legacy pipeline
/// recorded for converted assets. Unknown extensions fall back to octet-stream.
pub fn guess_mime_type(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mpg" | "mpeg" => "video/mpeg",
        "mp4" => "video/mp4",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Extensions a mime type is expected to carry, for the converter's
/// content-disposition cross-check.
pub fn extensions_for_mime(mime: &str) -> &'static [&'static str] {
    match mime {
        "image/jpeg" => &["jpg", "jpeg"],
        "image/gif" => &["gif"],
        "image/png" => &["png"],
        "image/tiff" => &["tif", "tiff"],
        "video/x-msvideo" => &["avi"],
        "video/quicktime" => &["mov"],
        "video/mpeg" => &["mpg", "mpeg"],
        "video/mp4" => &["mp4"],
        "video/x-flv" => &["flv"],
        "application/zip" => &["zip"],
        _ => &[],
    }
}
