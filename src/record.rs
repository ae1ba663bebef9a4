use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const RAW_SUFFIX: &str = ".raw";
pub const JPG_SUFFIX: &str = ".jpg";
pub const TIF_SUFFIX: &str = ".tif";
pub const FLV_SUFFIX: &str = ".flv";
pub const ZIP_SUFFIX: &str = ".zip";
pub const JSON_SUFFIX: &str = ".json";
pub const ZIP_MIMETYPE: &str = "application/zip";

/// Suffixes an image dataset is expected to carry, in download order.
pub const IMAGE_SUFFIXES: [AssetSuffix; 3] =
    [AssetSuffix::Tif, AssetSuffix::Jpg, AssetSuffix::Raw];

/// Suffixes a video dataset is expected to carry, in download order.
pub const VIDEO_SUFFIXES: [AssetSuffix; 3] =
    [AssetSuffix::Flv, AssetSuffix::Raw, AssetSuffix::Jpg];

/// The asset types the legacy archive serves, keyed by file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetSuffix {
    Tif,
    Jpg,
    Raw,
    Flv,
}

impl AssetSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetSuffix::Tif => TIF_SUFFIX,
            AssetSuffix::Jpg => JPG_SUFFIX,
            AssetSuffix::Raw => RAW_SUFFIX,
            AssetSuffix::Flv => FLV_SUFFIX,
        }
    }

    /// Resolves the suffix of a downloaded file name, e.g. `123.tif` -> `Tif`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let suffix = &file_name[file_name.rfind('.')?..];
        match suffix {
            TIF_SUFFIX => Some(AssetSuffix::Tif),
            JPG_SUFFIX => Some(AssetSuffix::Jpg),
            RAW_SUFFIX => Some(AssetSuffix::Raw),
            FLV_SUFFIX => Some(AssetSuffix::Flv),
            _ => None,
        }
    }
}

impl fmt::Display for AssetSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One physical file belonging to a dataset id.
///
/// All fields except `id` are optional: records are built up incrementally by the
/// database factory, the fetcher and the converter, and older persisted batches may
/// lack fields that were added later (`file_size`, `has_raw`). Field names carry the
/// legacy underscore prefix so batches written by earlier revisions of the pipeline
/// decode unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFileRecord {
    #[serde(rename = "_id")]
    id: u64,
    #[serde(rename = "_is_video", default)]
    pub is_video: Option<bool>,
    #[serde(rename = "_mimetype", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "_file_name", default)]
    pub file_name: Option<String>,
    #[serde(rename = "_download_success", default)]
    pub download_success: Option<bool>,
    #[serde(rename = "_download_time", default)]
    pub download_time: Option<i64>,
    #[serde(rename = "_checksum", default)]
    pub checksum: Option<String>,
    #[serde(rename = "_localfile", default)]
    pub local_file: Option<String>,
    #[serde(rename = "_headers", default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(rename = "_file_size", default)]
    pub file_size: Option<u64>,
    #[serde(rename = "_has_raw", default)]
    pub has_raw: Option<bool>,
}

impl DataFileRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            is_video: None,
            mime_type: None,
            file_name: None,
            download_success: None,
            download_time: None,
            checksum: None,
            local_file: None,
            headers: None,
            file_size: None,
            has_raw: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Merges every field present on `other` into `self`. Fields `other` lacks are
    /// skipped, so records decoded from older batch revisions merge without wiping
    /// newer fields.
    pub fn merge_from(&mut self, other: &DataFileRecord) {
        if other.is_video.is_some() {
            self.is_video = other.is_video;
        }
        if other.mime_type.is_some() {
            self.mime_type = other.mime_type.clone();
        }
        if other.file_name.is_some() {
            self.file_name = other.file_name.clone();
        }
        if other.download_success.is_some() {
            self.download_success = other.download_success;
        }
        if other.download_time.is_some() {
            self.download_time = other.download_time;
        }
        if other.checksum.is_some() {
            self.checksum = other.checksum.clone();
        }
        if other.local_file.is_some() {
            self.local_file = other.local_file.clone();
        }
        if other.headers.is_some() {
            self.headers = other.headers.clone();
        }
        if other.file_size.is_some() {
            self.file_size = other.file_size;
        }
        if other.has_raw.is_some() {
            self.has_raw = other.has_raw;
        }
    }

    /// Expected suffix list for this record's dataset type. Unknown `is_video` is
    /// treated as image, matching how the legacy tree was laid out.
    pub fn expected_suffixes(&self) -> &'static [AssetSuffix] {
        if self.is_video == Some(true) {
            &VIDEO_SUFFIXES
        } else {
            &IMAGE_SUFFIXES
        }
    }
}
