// d365fo-cache-core/src/application/global_version_manager.rs
//
// §4.2: resolves detected module fingerprints to shared, content-addressed
// buckets and owns the version registry's lifecycle operations. Thin over
// `MetadataRepository` — the transactional guarantees live there; this
// layer adds the domain-level decision of *when* sharing is safe.

use crate::application::version_detector::DetectedVersion;
use crate::domain::version::{GlobalVersion, Module};
use crate::error::CoreError;
use crate::infrastructure::db::repository::MetadataRepository;
use crate::ports::clock::Clock;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct GlobalVersionManager {
    repo: MetadataRepository,
    clock: Arc<dyn Clock>,
}

impl GlobalVersionManager {
    pub fn new(repo: MetadataRepository, clock: Arc<dyn Clock>) -> Self {
        GlobalVersionManager { repo, clock }
    }

    #[instrument(skip(self, detected), fields(modules_hash = %detected.modules_hash))]
    pub fn get_or_create_global_version(
        &self,
        created_by_environment_id: i64,
        detected: &DetectedVersion,
    ) -> Result<(GlobalVersion, bool), CoreError> {
        let now = self.clock.now();
        let sample_modules: Vec<Module> = detected.modules.iter().enumerate().map(Module::from).collect();

        let (version, was_created) = self.repo.get_or_create_global_version(
            &detected.modules_hash,
            &detected.version_hash,
            created_by_environment_id,
            &sample_modules,
            now,
            detected.application_version.as_deref(),
            detected.platform_build_version.as_deref(),
        )?;

        if was_created {
            info!(global_version_id = version.id, "allocated new global version");
        } else {
            info!(global_version_id = version.id, "reusing existing global version");
        }

        Ok((version, was_created))
    }

    pub fn link_environment_to_version(
        &self,
        environment_id: i64,
        global_version_id: i64,
    ) -> Result<(), CoreError> {
        self.repo.link_environment_to_version(environment_id, global_version_id, self.clock.now())?;
        Ok(())
    }

    /// Feeds the orchestrator's `sharing_mode` decision:
    /// true only when some *other* environment already finished syncing
    /// this exact global version.
    pub fn has_completed_sync_for_version(&self, global_version_id: i64) -> Result<bool, CoreError> {
        Ok(self.repo.has_completed_sync_for_version(global_version_id)?)
    }

    pub fn module_ids_for_version(&self, global_version_id: i64) -> Result<Vec<String>, CoreError> {
        Ok(self.repo.module_ids_for_version(global_version_id)?)
    }

    pub fn get_global_version(&self, id: i64) -> Result<Option<GlobalVersion>, CoreError> {
        Ok(self.repo.get_global_version(id)?)
    }

    #[instrument(skip(self))]
    pub fn cleanup_unused_versions(&self, retention_days: i64) -> Result<usize, CoreError> {
        let removed = self.repo.cleanup_unused_versions(chrono::Duration::days(retention_days), self.clock.now())?;
        info!(removed, retention_days, "cleaned up unused global versions");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::version::InstalledModule;
    use crate::infrastructure::db::pool::MetadataDb;
    use crate::infrastructure::db::schema;
    use crate::ports::clock::SystemClock;

    fn manager() -> (GlobalVersionManager, MetadataRepository) {
        let db = MetadataDb::in_memory().unwrap();
        {
            let conn = db.writer().unwrap();
            schema::apply(&conn).unwrap();
            crate::infrastructure::db::fts::create_fts(&conn).unwrap();
        }
        let repo = MetadataRepository::new(db);
        (GlobalVersionManager::new(repo.clone(), Arc::new(SystemClock)), repo)
    }

    fn detected(module_id: &str) -> DetectedVersion {
        let modules = vec![InstalledModule {
            name: module_id.to_string(),
            version: "1.0".to_string(),
            module_id: module_id.to_string(),
            publisher: "Microsoft".to_string(),
            display_name: module_id.to_string(),
        }];
        let hash = crate::domain::version::compute_modules_hash(&modules);
        let prefix = crate::domain::version::version_hash_prefix(&hash);
        DetectedVersion {
            modules,
            modules_hash: hash,
            version_hash: prefix,
            application_version: None,
            platform_build_version: None,
        }
    }

    #[test]
    fn two_environments_with_same_modules_share_a_version() {
        let (manager, repo) = manager();
        let now = chrono::Utc::now();
        let env_a = repo.find_or_create_environment("https://a.example.com", "A", now).unwrap();
        let env_b = repo.find_or_create_environment("https://b.example.com", "B", now).unwrap();

        let d = detected("ApplicationFoundation");
        let (v_a, created_a) = manager.get_or_create_global_version(env_a.id, &d).unwrap();
        let (v_b, created_b) = manager.get_or_create_global_version(env_b.id, &d).unwrap();

        assert!(created_a);
        assert!(!created_b);
        assert_eq!(v_a.id, v_b.id);
    }
}
