use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use revline_common::types::RepositoryId;

use crate::scheduler::SyncSchedule;
use crate::store::{NewRepository, RepositoryStore};
use crate::vcs::error::DirectoryError;
use crate::vcs::record::{is_materially_different, RepositoryKind, RepositoryRecord};

/// The set of live repositories, backed by the store and cached in memory.
///
/// The cache is the source of runtime state (parsed content, sync guards);
/// the store is the source of configuration. All mutations go through here
/// so the two never drift: a failed validation or store write leaves the
/// cache untouched.
///
/// The schedule is coupled to cache population: the first repository
/// activates it, removing the last cancels it.
pub struct RepositoryDirectory {
    store: Arc<dyn RepositoryStore>,
    schedule: Arc<dyn SyncSchedule>,
    cache: Mutex<HashMap<RepositoryId, Arc<RepositoryRecord>>>,
}

impl RepositoryDirectory {
    pub fn new(store: Arc<dyn RepositoryStore>, schedule: Arc<dyn SyncSchedule>) -> Self {
        Self { store, schedule, cache: Mutex::new(HashMap::new()) }
    }

    /// Populate the cache from the store and start the periodic schedule if
    /// any repositories exist. Called once at startup.
    pub fn load(&self) -> Result<(), DirectoryError> {
        let count = self.refresh()?;
        if count > 0 {
            self.schedule.activate();
        }
        info!(repositories = count, "repository directory loaded");
        Ok(())
    }

    /// Rebuild the cache from the store. Runtime state of the old records
    /// (parsed content) is discarded; the next pass refills it.
    pub fn refresh(&self) -> Result<usize, DirectoryError> {
        let stored = self.store.find_all()?;
        let mut cache = self.lock_cache();
        cache.clear();
        for repository in stored {
            let kind = RepositoryKind::parse(&repository.kind).ok_or_else(|| {
                DirectoryError::UnsupportedType { kind: repository.kind.clone() }
            })?;
            cache.insert(
                repository.id,
                Arc::new(RepositoryRecord::from_stored(repository, kind)),
            );
        }
        Ok(cache.len())
    }

    pub fn create(
        &self,
        repository: NewRepository,
    ) -> Result<Arc<RepositoryRecord>, DirectoryError> {
        let kind = Self::kind_of(&repository)?;

        let mut cache = self.lock_cache();
        if cache.values().any(|existing| existing.name == repository.name) {
            return Err(DirectoryError::DuplicateName { name: repository.name });
        }

        let stored = self.store.create(repository)?;
        let record = Arc::new(RepositoryRecord::from_stored(stored, kind));
        let first = cache.is_empty();
        cache.insert(record.id, record.clone());
        drop(cache);

        if first {
            self.schedule.activate();
        }
        info!(repository = %record.name, id = %record.id, "repository created");
        Ok(record)
    }

    /// Replace a repository's attributes. A cosmetic change (name,
    /// description, browser, timeout, log path) keeps the parsed content by
    /// reference; a material change (server, module, credential, fetch mode)
    /// discards it and requests an immediate pass.
    pub fn update(
        &self,
        id: RepositoryId,
        repository: NewRepository,
    ) -> Result<Arc<RepositoryRecord>, DirectoryError> {
        let kind = Self::kind_of(&repository)?;

        let mut cache = self.lock_cache();
        let existing = match cache.get(&id) {
            Some(record) => record.clone(),
            None => return Err(DirectoryError::UnknownRepository { id }),
        };
        if cache
            .values()
            .any(|other| other.id != id && other.name == repository.name)
        {
            return Err(DirectoryError::DuplicateName { name: repository.name });
        }

        let material = is_materially_different(&existing.settings, &repository.settings);
        self.store.update(id, repository.clone())?;
        let record = Arc::new(RepositoryRecord::from_stored(
            crate::store::StoredRepository {
                id,
                kind: repository.kind,
                name: repository.name,
                description: repository.description,
                settings: repository.settings,
            },
            kind,
        ));
        if !material {
            record.copy_content_from(&existing);
        }
        cache.insert(id, record.clone());
        drop(cache);

        if material {
            debug!(repository = %record.name, "material settings change, requesting immediate pass");
            self.schedule.run_now();
        }
        Ok(record)
    }

    pub fn remove(&self, id: RepositoryId) -> Result<(), DirectoryError> {
        let mut cache = self.lock_cache();
        if !cache.contains_key(&id) {
            return Err(DirectoryError::UnknownRepository { id });
        }
        self.store.delete(id)?;
        cache.remove(&id);
        let empty = cache.is_empty();
        drop(cache);

        if empty {
            self.schedule.cancel();
        }
        info!(id = %id, "repository removed");
        Ok(())
    }

    pub fn get(&self, id: RepositoryId) -> Result<Arc<RepositoryRecord>, DirectoryError> {
        self.lock_cache()
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::UnknownRepository { id })
    }

    /// Case-sensitive name lookup.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<RepositoryRecord>> {
        self.lock_cache().values().find(|record| record.name == name).cloned()
    }

    /// Snapshot of all live repositories, ordered by id.
    pub fn repositories(&self) -> Vec<Arc<RepositoryRecord>> {
        let mut records: Vec<_> = self.lock_cache().values().cloned().collect();
        records.sort_by_key(|record| record.id.0);
        records
    }

    /// Replace a project's repository associations wholesale. Every id must
    /// name a live repository or the whole call fails without writing.
    pub fn set_project_repositories(
        &self,
        project_key: &str,
        ids: &[RepositoryId],
    ) -> Result<(), DirectoryError> {
        let cache = self.lock_cache();
        for id in ids {
            if !cache.contains_key(id) {
                return Err(DirectoryError::UnknownRepository { id: *id });
            }
        }
        self.store.replace_project_repositories(project_key, ids)?;
        Ok(())
    }

    pub fn repositories_for_project(
        &self,
        project_key: &str,
    ) -> Result<Vec<Arc<RepositoryRecord>>, DirectoryError> {
        let ids = self.store.repository_ids_for_project(project_key)?;
        ids.into_iter().map(|id| self.get(id)).collect()
    }

    pub fn projects_for_repository(
        &self,
        id: RepositoryId,
    ) -> Result<Vec<String>, DirectoryError> {
        Ok(self.store.project_keys_for_repository(id)?)
    }

    pub fn shutdown(&self) {
        self.schedule.cancel();
    }

    fn kind_of(repository: &NewRepository) -> Result<RepositoryKind, DirectoryError> {
        RepositoryKind::parse(&repository.kind)
            .ok_or_else(|| DirectoryError::UnsupportedType { kind: repository.kind.clone() })
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<RepositoryId, Arc<RepositoryRecord>>> {
        self.cache.lock().expect("repository cache lock poisoned")
    }
}
