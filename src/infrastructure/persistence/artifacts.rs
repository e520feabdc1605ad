use crate::domain::errors::ForecastError;
use crate::domain::repositories::{ModelArtifact, ModelArtifactRepository};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

/// File-backed model artifact store. One JSON file per (symbol, period),
/// named `{symbol}_{period}.json` under the model directory.
pub struct FileModelArtifactRepository {
    dir: PathBuf,
}

impl FileModelArtifactRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl ModelArtifactRepository for FileModelArtifactRepository {
    async fn save(&self, name: &str, artifact: &ModelArtifact) -> Result<(), ForecastError> {
        if !self.dir.exists() {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| ForecastError::Storage {
                    reason: format!("cannot create model dir {:?}: {}", self.dir, e),
                })?;
        }

        let json = serde_json::to_vec_pretty(artifact).map_err(|e| ForecastError::Storage {
            reason: format!("cannot serialize artifact {}: {}", name, e),
        })?;

        let path = self.path_for(name);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| ForecastError::Storage {
                reason: format!("cannot write artifact {:?}: {}", path, e),
            })?;

        info!("Saved model artifact to {:?}", path);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<ModelArtifact>, ForecastError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ForecastError::Storage {
                reason: format!("cannot read artifact {:?}: {}", path, e),
            })?;

        match serde_json::from_slice::<ModelArtifact>(&bytes) {
            Ok(artifact) => {
                info!("Loaded model artifact from {:?}", path);
                Ok(Some(artifact))
            }
            Err(e) => {
                // A corrupt artifact is treated as absent; the model will
                // simply be retrained.
                warn!("Discarding unreadable artifact {:?}: {}", path, e);
                Ok(None)
            }
        }
    }
}
