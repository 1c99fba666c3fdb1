//! Region manager configuration.

use std::path::{Path, PathBuf};

use crate::error::ShmError;

/// Where regions live and how their files are named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShmConfig {
    /// Directory holding the backing files. Default: `/dev/shm` on
    /// Linux, the system temp directory elsewhere.
    pub root: PathBuf,
    /// File-name prefix shared with the simulator. Default: `HOLODECK_MEM`.
    pub prefix: String,
}

impl Default for ShmConfig {
    fn default() -> Self {
        let root = if cfg!(target_os = "linux") {
            PathBuf::from("/dev/shm")
        } else {
            std::env::temp_dir()
        };
        Self {
            root,
            prefix: "HOLODECK_MEM".to_string(),
        }
    }
}

impl ShmConfig {
    /// Config rooted at `root` with the default prefix.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Check that the root exists and is a directory.
    pub fn validate(&self) -> Result<(), ShmError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(ShmError::InvalidRoot {
                root: self.root.clone(),
            })
        }
    }

    /// Backing-file path for `name` under environment `uuid`.
    pub fn region_path(&self, uuid: &str, name: &str) -> PathBuf {
        self.root.join(format!("{}{}_{}", self.prefix, uuid, name))
    }

    /// The configured root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
