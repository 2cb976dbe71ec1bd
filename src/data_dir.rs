use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "ASKDOC_DATA_DIR";

/// Root of everything askdoc persists.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The ASKDOC_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/askdoc/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("askdoc")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embeddings_db(&self) -> PathBuf {
        self.root.join("embeddings.redb")
    }

    pub fn lexical_dir(&self) -> Result<PathBuf> {
        self.subdir("lexical")
    }

    /// Holds `vectors.bin` and `id_map.json`.
    pub fn vector_dir(&self) -> Result<PathBuf> {
        self.subdir("vectors")
    }

    fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
