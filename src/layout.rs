use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::CilError;
use crate::record::JSON_SUFFIX;

pub const IMAGES_DIR: &str = "images";
pub const VIDEOS_DIR: &str = "videos";

/// On-disk shape of a download tree: `<root>/images/<id>/` and
/// `<root>/videos/<id>/`, each holding that dataset's asset files and its
/// `<id>.json` record batch.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: Utf8PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn images_dir(&self) -> Utf8PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn videos_dir(&self) -> Utf8PathBuf {
        self.root.join(VIDEOS_DIR)
    }

    pub fn type_dir(&self, is_video: bool) -> Utf8PathBuf {
        if is_video {
            self.videos_dir()
        } else {
            self.images_dir()
        }
    }

    pub fn dataset_dir(&self, is_video: bool, id: u64) -> Utf8PathBuf {
        self.type_dir(is_video).join(id.to_string())
    }

    pub fn batch_path(&self, is_video: bool, id: u64) -> Utf8PathBuf {
        self.dataset_dir(is_video, id)
            .join(format!("{id}{JSON_SUFFIX}"))
    }

    pub fn ensure_dataset_dir(&self, is_video: bool, id: u64) -> Result<Utf8PathBuf, CilError> {
        let dir = self.dataset_dir(is_video, id);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| CilError::Filesystem(format!("mkdir {dir}: {err}")))?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = ArchiveLayout::new(Utf8PathBuf::from("/data"));
        assert_eq!(layout.dataset_dir(false, 123).as_str(), "/data/images/123");
        assert_eq!(layout.dataset_dir(true, 123).as_str(), "/data/videos/123");
        assert_eq!(
            layout.batch_path(false, 123).as_str(),
            "/data/images/123/123.json"
        );
    }
}
