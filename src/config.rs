use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CilError;
use crate::record::AssetSuffix;

/// HTTP endpoints the pipeline pulls from: the public content host (landing pages,
/// jpegs and flv videos) and the internal image service (tif and raw assets).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoints {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_image_service_url")]
    pub image_service_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            image_service_url: default_image_service_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://www.cellimagelibrary.org".to_string()
}

fn default_image_service_url() -> String {
    "http://cildata.crbs.ucsd.edu/media".to_string()
}

impl Endpoints {
    /// Landing page for a dataset. Hit once per id before its first asset fetch;
    /// the legacy host primes its cache from this request.
    pub fn landing_url(&self, id: u64) -> String {
        format!("{}/images/{id}", self.base_url)
    }

    /// Download URL for one expected file, resolved by suffix.
    pub fn download_url(&self, suffix: AssetSuffix, id: u64) -> String {
        match suffix {
            AssetSuffix::Jpg => {
                format!("{}/images/download_jpeg/{id}.jpg", self.base_url)
            }
            AssetSuffix::Flv => format!("{}/videos/{id}.flv", self.base_url),
            AssetSuffix::Tif => {
                format!("{}/images/{id}{}", self.image_service_url, suffix.as_str())
            }
            AssetSuffix::Raw => {
                format!("{}/images/{id}{}", self.image_service_url, suffix.as_str())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    database: String,
    #[serde(default)]
    endpoints: Option<Endpoints>,
}

/// Resolved tool configuration: where the status database lives and which hosts
/// serve the assets.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database: PathBuf,
    pub endpoints: Endpoints,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates a JSON config file. Missing or unparsable config is a
    /// fail-fast error; nothing downstream runs without one.
    pub fn load(path: &Path) -> Result<ResolvedConfig, CilError> {
        if !path.is_file() {
            return Err(CilError::MissingConfig(path.to_path_buf()));
        }
        let content =
            fs::read_to_string(path).map_err(|_| CilError::ConfigRead(path.to_path_buf()))?;
        let config: ConfigFile =
            serde_json::from_str(&content).map_err(|err| CilError::ConfigParse(err.to_string()))?;
        Ok(ResolvedConfig {
            database: PathBuf::from(config.database),
            endpoints: config.endpoints.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn missing_config_fails_fast() {
        let err = ConfigLoader::load(Path::new("/no/such/config.json")).unwrap_err();
        assert_matches!(err, CilError::MissingConfig(_));
    }

    #[test]
    fn load_with_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("cildata.json");
        fs::write(&path, r#"{"database": "status.db"}"#).unwrap();
        let resolved = ConfigLoader::load(&path).unwrap();
        assert_eq!(resolved.database, PathBuf::from("status.db"));
        assert_eq!(resolved.endpoints.base_url, default_base_url());
    }

    #[test]
    fn url_resolution_by_suffix() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.download_url(AssetSuffix::Jpg, 99),
            "http://www.cellimagelibrary.org/images/download_jpeg/99.jpg"
        );
        assert_eq!(
            endpoints.download_url(AssetSuffix::Flv, 99),
            "http://www.cellimagelibrary.org/videos/99.flv"
        );
        assert_eq!(
            endpoints.download_url(AssetSuffix::Raw, 99),
            "http://cildata.crbs.ucsd.edu/media/images/99.raw"
        );
        assert_eq!(endpoints.landing_url(99), "http://www.cellimagelibrary.org/images/99");
    }
}
