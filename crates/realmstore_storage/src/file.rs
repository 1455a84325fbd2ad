//! File-based persistence for durable realms.

use crate::error::{StorageError, StorageResult};
use crate::port::{Persistence, PersistencePort};
use parking_lot::RwLock;
use realmstore_model::{Activity, Order, Resource, RootElement};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Documents<T> = BTreeMap<String, BTreeMap<String, T>>;

/// A file-based persistence port.
///
/// All elements of one kind live in a single JSON document, loaded once at
/// open and rewritten on every `save`/`remove`. Data survives process
/// restarts.
///
/// # Durability
///
/// Writes go to a sibling `.tmp` file which is synced and then renamed over
/// the document, so a crash leaves either the old or the new document.
///
/// # Example
///
/// ```no_run
/// use realmstore_model::Resource;
/// use realmstore_storage::{FilePersistence, PersistencePort};
/// use std::path::Path;
///
/// let port = FilePersistence::<Resource>::open(Path::new("data/resources.json")).unwrap();
/// port.save(&Resource::new("A", "Item A", "Item")).unwrap();
/// ```
#[derive(Debug)]
pub struct FilePersistence<T> {
    path: PathBuf,
    data: RwLock<Documents<T>>,
}

impl<T> FilePersistence<T>
where
    T: RootElement + Serialize + DeserializeOwned,
{
    /// Opens or creates a document at the given path.
    ///
    /// Parent directories are created if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let elements: Vec<T> = serde_json::from_reader(reader)?;
            let mut data: Documents<T> = BTreeMap::new();
            for e in elements {
                data.entry(e.type_name().to_string())
                    .or_default()
                    .insert(e.id().to_string(), e);
            }
            data
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
        })
    }

    /// Returns the path to the underlying document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_document(&self, data: &Documents<T>) -> StorageResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            let elements: Vec<&T> = data.values().flat_map(BTreeMap::values).collect();
            serde_json::to_writer_pretty(&mut writer, &elements)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| StorageError::Io(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl<T> PersistencePort<T> for FilePersistence<T>
where
    T: RootElement + Serialize + DeserializeOwned,
{
    fn query_types(&self) -> StorageResult<BTreeSet<String>> {
        Ok(self
            .data
            .read()
            .iter()
            .filter(|(_, by_id)| !by_id.is_empty())
            .map(|(t, _)| t.clone())
            .collect())
    }

    fn query_size(&self, type_name: Option<&str>) -> StorageResult<usize> {
        let data = self.data.read();
        Ok(match type_name {
            Some(t) => data.get(t).map_or(0, BTreeMap::len),
            None => data.values().map(BTreeMap::len).sum(),
        })
    }

    fn query_all(&self, type_name: &str) -> StorageResult<Vec<T>> {
        Ok(self
            .data
            .read()
            .get(type_name)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default())
    }

    fn query_by(&self, type_name: &str, id: &str) -> StorageResult<Option<T>> {
        Ok(self
            .data
            .read()
            .get(type_name)
            .and_then(|by_id| by_id.get(id))
            .cloned())
    }

    fn save(&self, element: &T) -> StorageResult<()> {
        let mut data = self.data.write();
        let previous = data
            .entry(element.type_name().to_string())
            .or_default()
            .insert(element.id().to_string(), element.clone());

        if let Err(e) = self.write_document(&data) {
            // keep the mirror equal to the document on disk
            let by_id = data.entry(element.type_name().to_string()).or_default();
            match previous {
                Some(p) => {
                    by_id.insert(element.id().to_string(), p);
                }
                None => {
                    by_id.remove(element.id());
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, element: &T) -> StorageResult<()> {
        let mut data = self.data.write();
        let removed = data
            .get_mut(element.type_name())
            .and_then(|by_id| by_id.remove(element.id()))
            .ok_or_else(|| StorageError::not_found(element.type_name(), element.id()))?;

        if let Err(e) = self.write_document(&data) {
            data.entry(element.type_name().to_string())
                .or_default()
                .insert(element.id().to_string(), removed);
            return Err(e);
        }
        Ok(())
    }
}

impl Persistence {
    /// Opens file persistence for a realm in `dir`.
    ///
    /// Creates `resources.json`, `orders.json` and `activities.json` on
    /// first write.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing document cannot be read.
    pub fn open_dir(dir: &Path) -> StorageResult<Self> {
        tracing::debug!(dir = %dir.display(), "opening file persistence");
        Ok(Self::new(
            Arc::new(FilePersistence::<Resource>::open(&dir.join("resources.json"))?),
            Arc::new(FilePersistence::<Order>::open(&dir.join("orders.json"))?),
            Arc::new(FilePersistence::<Activity>::open(&dir.join("activities.json"))?),
        ))
    }
}
