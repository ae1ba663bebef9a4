use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::CilError;
use crate::record::DataFileRecord;

/// Type tag carried by every persisted record. Batches written by earlier pipeline
/// revisions use the same tag, so old and new files decode interchangeably.
pub const RECORD_TAG: &str = "cildata_util.dbutil.CILDataFile";

/// Tag the legacy encoder stamped on `headers` maps. The decoder cannot parse it as
/// a mapping, so it is textually substituted before parsing.
const LEGACY_HEADERS_TAG: &str = "requests.structures.CaseInsensitiveDict";
const PLAIN_MAP_TAG: &str = "__builtin__.dict";

#[derive(Serialize, Deserialize)]
struct TaggedRecord {
    #[serde(rename = "py/object")]
    tag: String,
    #[serde(flatten)]
    record: DataFileRecord,
}

/// Writes a record batch as one JSON document: an array of strings, each string the
/// tagged encoding of one record. The file is fsynced before returning so a crash
/// after this call cannot leave a partially buffered batch.
pub fn write_records(path: &Path, records: &[DataFileRecord]) -> Result<(), CilError> {
    let mut encoded = Vec::with_capacity(records.len());
    for record in records {
        let tagged = TaggedRecord {
            tag: RECORD_TAG.to_string(),
            record: record.clone(),
        };
        let entry = serde_json::to_string(&tagged)
            .map_err(|err| CilError::Filesystem(err.to_string()))?;
        encoded.push(entry);
    }

    debug!(path = %path.display(), entries = records.len(), "writing batch");
    let document = serde_json::to_vec(&encoded)
        .map_err(|err| CilError::Filesystem(err.to_string()))?;
    let mut file = fs::File::create(path)
        .map_err(|err| CilError::Filesystem(format!("create {}: {err}", path.display())))?;
    file.write_all(&document)
        .map_err(|err| CilError::Filesystem(err.to_string()))?;
    file.sync_all()
        .map_err(|err| CilError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Reads a record batch. Legacy ordered-map type tags on `headers` are repaired
/// transparently; a batch holding the nested pair-list headers form is reported as
/// [`CilError::LegacyHeaders`] so the operator knows to run the fix-json tool.
pub fn read_records(path: &Path) -> Result<Vec<DataFileRecord>, CilError> {
    read_records_inner(path, false)
}

/// Reads a record batch, flattening legacy nested `headers` entries into plain
/// string maps. Already-flat headers pass through unchanged, so rereading a repaired
/// batch is a no-op.
pub fn read_records_with_repair(path: &Path) -> Result<Vec<DataFileRecord>, CilError> {
    read_records_inner(path, true)
}

fn read_records_inner(path: &Path, repair: bool) -> Result<Vec<DataFileRecord>, CilError> {
    let content = fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CilError::BatchNotFound(path.to_path_buf())
        } else {
            CilError::Filesystem(format!("read {}: {err}", path.display()))
        }
    })?;
    let content = content.replace(LEGACY_HEADERS_TAG, PLAIN_MAP_TAG);

    let entries: Vec<Value> = serde_json::from_str(&content).map_err(|err| {
        CilError::BatchParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut value = match entry {
            // each batch entry is itself a JSON-encoded string
            Value::String(inner) => {
                serde_json::from_str::<Value>(&inner).map_err(|err| CilError::BatchParse {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })?
            }
            other => other,
        };

        if let Some(raw_headers) = value.get("_headers").cloned() {
            let headers = match flatten_legacy_headers(&raw_headers) {
                HeaderShape::Absent => None,
                HeaderShape::Flat(map) => Some(map),
                HeaderShape::Nested(map) => {
                    if !repair {
                        return Err(CilError::LegacyHeaders(path.to_path_buf()));
                    }
                    debug!(path = %path.display(), "flattened legacy nested headers");
                    Some(map)
                }
            };
            if let Value::Object(obj) = &mut value {
                obj.insert(
                    "_headers".to_string(),
                    serde_json::to_value(headers)
                        .map_err(|err| CilError::Filesystem(err.to_string()))?,
                );
            }
        }

        let tagged: TaggedRecord =
            serde_json::from_value(value).map_err(|err| CilError::BatchParse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        records.push(tagged.record);
    }
    Ok(records)
}

/// Shape of a persisted `headers` value after normalization.
#[derive(Debug, PartialEq)]
pub enum HeaderShape {
    Absent,
    /// Plain string-to-string mapping, passed through unchanged.
    Flat(BTreeMap<String, String>),
    /// Legacy nested key/value-pair list, flattened.
    Nested(BTreeMap<String, String>),
}

/// Normalizes a persisted `headers` value. Flat mappings come back as
/// [`HeaderShape::Flat`] with identical content; the legacy nested pair-list form
/// (either a bare list of `[key, value]` pairs, or a tagged object wrapping one) is
/// flattened and reported as [`HeaderShape::Nested`].
pub fn flatten_legacy_headers(value: &Value) -> HeaderShape {
    match value {
        Value::Null => HeaderShape::Absent,
        Value::Array(pairs) => match pairs_to_map(pairs) {
            Some(map) => HeaderShape::Nested(map),
            None => HeaderShape::Absent,
        },
        Value::Object(obj) => {
            let mut flat = BTreeMap::new();
            let mut nested = None;
            for (key, val) in obj {
                if key.starts_with("py/") {
                    continue;
                }
                match val {
                    Value::String(s) => {
                        flat.insert(key.clone(), s.clone());
                    }
                    Value::Array(pairs) => {
                        nested = pairs_to_map(pairs);
                    }
                    Value::Object(inner) => {
                        // tagged wrapper one level down, e.g. an ordered-map state
                        for (_, inner_val) in inner {
                            if let Value::Array(pairs) = inner_val {
                                nested = pairs_to_map(pairs);
                            }
                        }
                    }
                    _ => {}
                }
            }
            match nested {
                Some(map) => HeaderShape::Nested(map),
                None => HeaderShape::Flat(flat),
            }
        }
        _ => HeaderShape::Absent,
    }
}

fn pairs_to_map(pairs: &[Value]) -> Option<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let items = pair.as_array()?;
        if items.len() != 2 {
            return None;
        }
        let key = items[0].as_str()?;
        let val = items[1].as_str()?;
        map.insert(key.to_string(), val.to_string());
    }
    Some(map)
}

/// Copies `path` to `<path>.bk.<n>` where `n` is the lowest integer whose backup
/// name does not exist yet. The chain is append-only and never pruned; it is the
/// sole recovery mechanism for corrupted batch files.
pub fn make_backup(path: &Path) -> Result<PathBuf, CilError> {
    if !path.is_file() {
        return Err(CilError::BatchNotFound(path.to_path_buf()));
    }
    let mut counter = 0u32;
    let backup = loop {
        let candidate = backup_path(path, counter);
        if !candidate.exists() {
            break candidate;
        }
        counter += 1;
    };
    debug!(from = %path.display(), to = %backup.display(), "backing up batch");
    fs::copy(path, &backup)
        .map_err(|err| CilError::Filesystem(format!("backup {}: {err}", path.display())))?;
    Ok(backup)
}

fn backup_path(path: &Path, counter: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".bk.{counter}"));
    PathBuf::from(name)
}
