use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::position::PreppedPosition;

/// A prepped batch cached locally, so a failed database save can be replayed.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct PreppedBatch {
    pub created_at: DateTime<Utc>,
    pub positions: Vec<PreppedPosition>,
}

impl PreppedBatch {
    pub fn new(positions: Vec<PreppedPosition>) -> Self {
        Self {
            created_at: Utc::now(),
            positions,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(postcard::from_bytes(&bytes)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let bytes = postcard::to_stdvec(self)?;
        std::fs::write(path, &bytes)?;
        Ok(())
    }
}
