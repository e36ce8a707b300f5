use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::vehicle::Vehicle;
use crate::error::Result;

/// Ordered map primitive the vehicle store is built on.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn get(&self, id: &str) -> Option<&Vehicle>;

    /// Upserts `vehicle` under its id.
    async fn insert(&mut self, vehicle: Vehicle) -> Result<()>;

    /// Every record, in key order.
    fn scan(&self) -> Box<dyn Iterator<Item = &Vehicle> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl<B: Backend + ?Sized> Backend for Box<B> {
    fn get(&self, id: &str) -> Option<&Vehicle> {
        (**self).get(id)
    }

    async fn insert(&mut self, vehicle: Vehicle) -> Result<()> {
        (**self).insert(vehicle).await
    }

    fn scan(&self) -> Box<dyn Iterator<Item = &Vehicle> + '_> {
        (**self).scan()
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: BTreeMap<String, Vehicle>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    fn get(&self, id: &str) -> Option<&Vehicle> {
        self.data.get(id)
    }

    async fn insert(&mut self, vehicle: Vehicle) -> Result<()> {
        self.data.insert(vehicle.id.clone(), vehicle);
        Ok(())
    }

    fn scan(&self) -> Box<dyn Iterator<Item = &Vehicle> + '_> {
        Box::new(self.data.values())
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Ordered map mirrored to a JSON snapshot file.
///
/// The snapshot is rewritten after every insert: the new contents are synced
/// to a temporary file which is then renamed over the old snapshot.
#[derive(Debug)]
pub struct JsonFileBackend {
    data: BTreeMap<String, Vehicle>,
    path: PathBuf,
}

impl JsonFileBackend {
    /// Loads the snapshot at `path`, creating an empty one if it does not exist.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let data = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let backend = Self { data, path };
        backend.save().await?;
        info!(path = %backend.path.display(), vehicles = backend.data.len(), "snapshot loaded");
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    async fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.data)?;
        let tmp = self.tmp_path();

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "snapshot written");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Backend for JsonFileBackend {
    fn get(&self, id: &str) -> Option<&Vehicle> {
        self.data.get(id)
    }

    async fn insert(&mut self, vehicle: Vehicle) -> Result<()> {
        let id = vehicle.id.clone();
        let previous = self.data.insert(id.clone(), vehicle);

        if let Err(e) = self.save().await {
            // Keep memory in line with what is on disk.
            match previous {
                Some(previous) => self.data.insert(id, previous),
                None => self.data.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn scan(&self) -> Box<dyn Iterator<Item = &Vehicle> + '_> {
        Box::new(self.data.values())
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
