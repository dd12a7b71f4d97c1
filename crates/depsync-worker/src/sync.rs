//! The dependency-sync handler.
//!
//! For one finished upload: scan its package references, normalize and
//! deduplicate them into the dependency-repo catalog, stamp the owning
//! package registries for re-sync, and fan out downstream
//! dependency-indexing jobs for allow-listed indexers.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use depsync_core::{
    CodeIntelStore, Error, ErrorList, ExternalServiceFilter, ExternalServiceStore, Package,
    ReferenceScanner, Result, SyncJob,
};

use crate::classify::{kind_for_scheme, normalize_package, should_index_dependencies};
use crate::handler::Handler;
use crate::ops::Operations;

/// Handler for dependency-sync job records.
pub struct DependencySyncHandler {
    codeintel: Arc<dyn CodeIntelStore>,
    external_services: Arc<dyn ExternalServiceStore>,
    ops: Arc<Operations>,
}

/// Accounting for one reference scan.
#[derive(Debug, Default)]
struct ScanStats {
    /// Distinct external-service kinds observed. Contains the empty
    /// string when any unrecognized scheme was seen, so non-registry
    /// indexers still get a downstream indexing job.
    kinds: BTreeSet<String>,
    new_repos: usize,
    existing_repos: usize,
    skipped_references: usize,
}

impl DependencySyncHandler {
    pub fn new(
        codeintel: Arc<dyn CodeIntelStore>,
        external_services: Arc<dyn ExternalServiceStore>,
        ops: Arc<Operations>,
    ) -> Self {
        Self {
            codeintel,
            external_services,
            ops,
        }
    }

    async fn handle_job(&self, job: &SyncJob) -> Result<()> {
        let mut errs = ErrorList::new();
        let mut stats = ScanStats::default();

        let mut scanner = self.codeintel.references_for_upload(job.upload_id).await?;
        let scan_outcome = self.scan_references(&mut *scanner, &mut stats, &mut errs).await;

        // Release the cursor on every path; a close failure joins the
        // error list rather than replacing anything already recorded.
        if let Err(close_err) = scanner.close().await {
            errs.push(close_err);
        }
        if let Err(scan_err) = scan_outcome {
            errs.push(scan_err);
            return errs.into_result();
        }

        info!(
            upload_id = job.upload_id,
            new_repos = stats.new_repos,
            existing_repos = stats.existing_repos,
            skipped_references = stats.skipped_references,
            kinds = ?stats.kinds,
            "Scanned package references"
        );

        let next_sync = self.sync_external_services(job, &stats, &mut errs).await?;
        self.schedule_indexing_jobs(job, &stats, next_sync, &mut errs)
            .await?;

        errs.into_result()
    }

    /// Visit every package reference exactly once. Per-package insert
    /// failures accumulate in `errs` without aborting the scan; only a
    /// cursor read failure is fatal.
    async fn scan_references(
        &self,
        scanner: &mut dyn ReferenceScanner,
        stats: &mut ScanStats,
        errs: &mut ErrorList,
    ) -> Result<()> {
        while let Some(reference) = scanner.next().await? {
            let pkg = normalize_package(&reference);

            match kind_for_scheme(&pkg.scheme) {
                Some(kind) => {
                    stats.kinds.insert(kind.to_string());
                    match errs.push_result(self.insert_dependency_repo(&pkg).await) {
                        Some(true) => stats.new_repos += 1,
                        Some(false) => stats.existing_repos += 1,
                        None => {}
                    }
                }
                None => {
                    // The empty kind keeps the upload represented in the
                    // observed set; bare source-analysis indexers still
                    // get an indexing job downstream.
                    stats.kinds.insert(String::new());
                    stats.skipped_references += 1;
                }
            }
        }
        Ok(())
    }

    async fn insert_dependency_repo(&self, pkg: &Package) -> Result<bool> {
        self.ops
            .insert_dependency_repo
            .observe(
                &[
                    ("scheme", &pkg.scheme),
                    ("name", &pkg.name),
                    ("version", &pkg.version),
                ],
                self.codeintel.insert_cloneable_dependency_repo(pkg),
            )
            .await
    }

    /// Stamp every external service of an observed kind for re-sync.
    /// Returns the sync timestamp shared by the downstream indexing
    /// jobs, or `None` when no recognized kind was observed.
    async fn sync_external_services(
        &self,
        job: &SyncJob,
        stats: &ScanStats,
        errs: &mut ErrorList,
    ) -> Result<Option<DateTime<Utc>>> {
        let sync_kinds: Vec<String> = stats
            .kinds
            .iter()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect();

        if sync_kinds.is_empty() {
            info!(
                upload_id = job.upload_id,
                job_id = job.id,
                "No package schema kinds to sync external services for"
            );
            return Ok(None);
        }

        let next_sync = Utc::now();
        let filter = ExternalServiceFilter {
            kinds: sync_kinds.clone(),
        };
        let services = match self.external_services.list(&filter).await {
            Ok(services) => services,
            Err(list_err) => {
                // Fatal only if nothing failed earlier; otherwise it
                // joins the accumulated failures.
                errs.push(list_err);
                return std::mem::take(errs).into_result().map(|_| None);
            }
        };

        info!(
            upload_id = job.upload_id,
            num_external_services = services.len(),
            kinds = ?sync_kinds,
            new_repos = stats.new_repos,
            existing_repos = stats.existing_repos,
            "Syncing external services"
        );

        for mut service in services {
            service.next_sync_at = Some(next_sync);
            if let Err(upsert_err) = self.external_services.upsert(&service).await {
                errs.push(Error::Job(format!(
                    "error setting next_sync_at for external service {} - {}: {}",
                    service.id, service.display_name, upsert_err
                )));
            }
        }

        Ok(Some(next_sync))
    }

    /// Insert one dependency-indexing job per distinct observed kind
    /// (the empty-string kind included), gated on the upload's indexer
    /// being allow-listed.
    async fn schedule_indexing_jobs(
        &self,
        job: &SyncJob,
        stats: &ScanStats,
        next_sync: Option<DateTime<Utc>>,
        errs: &mut ErrorList,
    ) -> Result<()> {
        let upload = match self.codeintel.get_upload_by_id(job.upload_id).await {
            Ok(Some(upload)) => upload,
            Ok(None) => {
                errs.push(Error::UploadNotFound(job.upload_id));
                return std::mem::take(errs).into_result();
            }
            Err(lookup_err) => {
                errs.push(lookup_err);
                return std::mem::take(errs).into_result();
            }
        };

        if !should_index_dependencies(&upload.indexer) {
            return Ok(());
        }

        for kind in &stats.kinds {
            if let Err(insert_err) = self
                .codeintel
                .insert_dependency_indexing_job(job.upload_id, kind, next_sync)
                .await
            {
                errs.push(insert_err);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Handler<SyncJob> for DependencySyncHandler {
    async fn handle(&self, record: SyncJob) -> Result<()> {
        let job_id = record.id.to_string();
        let upload_id = record.upload_id.to_string();
        let failures = record.num_failures.to_string();
        let resets = record.num_resets.to_string();

        self.ops
            .handle_dependency_syncing
            .observe(
                &[
                    ("job_id", &job_id),
                    ("upload_id", &upload_id),
                    ("failures", &failures),
                    ("resets", &resets),
                ],
                self.handle_job(&record),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depsync_core::{ExternalService, JobState, PackageReference, Upload};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeScanner {
        references: Vec<PackageReference>,
        position: usize,
        fail_next_at: Option<usize>,
        fail_close: bool,
        yielded: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ReferenceScanner for FakeScanner {
        async fn next(&mut self) -> Result<Option<PackageReference>> {
            if self.fail_next_at == Some(self.position) {
                return Err(Error::Job("cursor read failed".into()));
            }
            match self.references.get(self.position) {
                Some(reference) => {
                    self.position += 1;
                    self.yielded.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(reference.clone()))
                }
                None => Ok(None),
            }
        }

        async fn close(self: Box<Self>) -> Result<()> {
            if self.fail_close {
                Err(Error::Job("cursor close failed".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct FakeCodeIntelStore {
        references: Vec<PackageReference>,
        fail_next_at: Option<usize>,
        fail_close: bool,
        yielded: Arc<AtomicUsize>,
        repos: Mutex<HashSet<(String, String, String)>>,
        fail_insert_names: HashSet<String>,
        uploads: HashMap<i64, Upload>,
        indexing_jobs: Mutex<Vec<(i64, String, Option<DateTime<Utc>>)>>,
    }

    impl FakeCodeIntelStore {
        fn with_upload(mut self, id: i64, indexer: &str) -> Self {
            self.uploads.insert(
                id,
                Upload {
                    id,
                    repository_id: 1,
                    commit: "deadbeef".into(),
                    indexer: indexer.into(),
                },
            );
            self
        }

        fn with_references(mut self, refs: &[(&str, &str, &str)]) -> Self {
            self.references = refs
                .iter()
                .map(|(scheme, name, version)| PackageReference {
                    scheme: (*scheme).into(),
                    name: (*name).into(),
                    version: (*version).into(),
                })
                .collect();
            self
        }

        fn indexing_kinds(&self) -> Vec<String> {
            self.indexing_jobs
                .lock()
                .unwrap()
                .iter()
                .map(|(_, kind, _)| kind.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CodeIntelStore for FakeCodeIntelStore {
        async fn references_for_upload(
            &self,
            _upload_id: i64,
        ) -> Result<Box<dyn ReferenceScanner>> {
            Ok(Box::new(FakeScanner {
                references: self.references.clone(),
                position: 0,
                fail_next_at: self.fail_next_at,
                fail_close: self.fail_close,
                yielded: self.yielded.clone(),
            }))
        }

        async fn insert_cloneable_dependency_repo(&self, pkg: &Package) -> Result<bool> {
            if self.fail_insert_names.contains(&pkg.name) {
                return Err(Error::Job(format!("insert failed for {}", pkg.name)));
            }
            let identity = (pkg.scheme.clone(), pkg.name.clone(), pkg.version.clone());
            Ok(self.repos.lock().unwrap().insert(identity))
        }

        async fn get_upload_by_id(&self, upload_id: i64) -> Result<Option<Upload>> {
            Ok(self.uploads.get(&upload_id).cloned())
        }

        async fn insert_dependency_indexing_job(
            &self,
            upload_id: i64,
            external_service_kind: &str,
            not_before: Option<DateTime<Utc>>,
        ) -> Result<()> {
            self.indexing_jobs.lock().unwrap().push((
                upload_id,
                external_service_kind.to_string(),
                not_before,
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeExternalServiceStore {
        services: Vec<ExternalService>,
        fail_list: bool,
        fail_upsert: bool,
        list_calls: AtomicUsize,
        upserts: Mutex<Vec<ExternalService>>,
    }

    impl FakeExternalServiceStore {
        fn with_service(mut self, id: i64, kind: &str) -> Self {
            self.services.push(ExternalService {
                id,
                kind: kind.into(),
                display_name: format!("{kind} #{id}"),
                next_sync_at: None,
            });
            self
        }
    }

    #[async_trait]
    impl ExternalServiceStore for FakeExternalServiceStore {
        async fn list(&self, filter: &ExternalServiceFilter) -> Result<Vec<ExternalService>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if filter.kinds.is_empty() {
                return Err(Error::InvalidInput(
                    "external service listing requires at least one kind".into(),
                ));
            }
            if self.fail_list {
                return Err(Error::Job("list failed".into()));
            }
            Ok(self
                .services
                .iter()
                .filter(|s| filter.kinds.contains(&s.kind))
                .cloned()
                .collect())
        }

        async fn upsert(&self, service: &ExternalService) -> Result<()> {
            if self.fail_upsert {
                return Err(Error::Job(format!("upsert failed for {}", service.id)));
            }
            self.upserts.lock().unwrap().push(service.clone());
            Ok(())
        }
    }

    fn sync_job(upload_id: i64) -> SyncJob {
        SyncJob {
            id: 1,
            upload_id,
            state: JobState::Processing,
            failure_message: None,
            num_failures: 0,
            num_resets: 0,
            queued_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            process_after: None,
            last_heartbeat_at: Some(Utc::now()),
            worker_hostname: Some("worker-test".into()),
        }
    }

    fn handler(
        codeintel: Arc<FakeCodeIntelStore>,
        external_services: Arc<FakeExternalServiceStore>,
    ) -> DependencySyncHandler {
        DependencySyncHandler::new(codeintel, external_services, Arc::new(Operations::new()))
    }

    #[tokio::test]
    async fn test_sync_scenario_upload_42() {
        // Two identical npm references, one unknown scheme, allow-listed
        // indexer, one configured npm registry.
        let codeintel = Arc::new(
            FakeCodeIntelStore::default()
                .with_upload(42, "scip-typescript")
                .with_references(&[
                    ("npm", "left-pad", "1.0.0"),
                    ("npm", "left-pad", "1.0.0"),
                    ("unknown", "x", "1"),
                ]),
        );
        let extsvc = Arc::new(FakeExternalServiceStore::default().with_service(7, "NPMPACKAGES"));

        let result = handler(codeintel.clone(), extsvc.clone())
            .handle(sync_job(42))
            .await;
        assert!(result.is_ok());

        // One catalog entry despite the duplicate reference.
        assert_eq!(codeintel.repos.lock().unwrap().len(), 1);

        // The registry was stamped for re-sync.
        let upserts = extsvc.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].id, 7);
        assert!(upserts[0].next_sync_at.is_some());

        // One indexing job per distinct kind, unknown scheme included.
        let mut kinds = codeintel.indexing_kinds();
        kinds.sort();
        assert_eq!(kinds, vec!["".to_string(), "NPMPACKAGES".to_string()]);
    }

    #[tokio::test]
    async fn test_dedup_across_invocations() {
        let codeintel = Arc::new(
            FakeCodeIntelStore::default()
                .with_upload(1, "lsif-go")
                .with_references(&[("npm", "left-pad", "1.0.0")]),
        );
        let extsvc = Arc::new(FakeExternalServiceStore::default());
        let h = handler(codeintel.clone(), extsvc);

        assert!(h.handle(sync_job(1)).await.is_ok());
        assert!(h.handle(sync_job(1)).await.is_ok());

        // The second invocation re-inserts and gets "already existed".
        assert_eq!(codeintel.repos.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_indexing_gated_on_allow_list() {
        let codeintel = Arc::new(
            FakeCodeIntelStore::default()
                .with_upload(1, "scip-python")
                .with_references(&[("npm", "left-pad", "1.0.0")]),
        );
        let extsvc = Arc::new(FakeExternalServiceStore::default().with_service(7, "NPMPACKAGES"));

        let result = handler(codeintel.clone(), extsvc.clone())
            .handle(sync_job(1))
            .await;
        assert!(result.is_ok());

        // Registries are still synced, but no indexing jobs fan out.
        assert_eq!(extsvc.upserts.lock().unwrap().len(), 1);
        assert!(codeintel.indexing_jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_recognized_schemes_two_indexing_jobs() {
        let codeintel = Arc::new(
            FakeCodeIntelStore::default()
                .with_upload(1, "lsif-go")
                .with_references(&[
                    ("npm", "left-pad", "1.0.0"),
                    ("semanticdb", "maven/com.google.guava/guava", "31.1"),
                ]),
        );
        let extsvc = Arc::new(
            FakeExternalServiceStore::default()
                .with_service(1, "NPMPACKAGES")
                .with_service(2, "JVMPACKAGES"),
        );

        let result = handler(codeintel.clone(), extsvc).handle(sync_job(1)).await;
        assert!(result.is_ok());

        let mut kinds = codeintel.indexing_kinds();
        kinds.sort();
        assert_eq!(
            kinds,
            vec!["JVMPACKAGES".to_string(), "NPMPACKAGES".to_string()]
        );
        // The indexing jobs reference the sync timestamp.
        assert!(codeintel
            .indexing_jobs
            .lock()
            .unwrap()
            .iter()
            .all(|(_, _, not_before)| not_before.is_some()));
    }

    #[tokio::test]
    async fn test_zero_references_is_successful_noop() {
        let codeintel = Arc::new(FakeCodeIntelStore::default().with_upload(1, "lsif-go"));
        let extsvc = Arc::new(FakeExternalServiceStore::default().with_service(7, "NPMPACKAGES"));

        let result = handler(codeintel.clone(), extsvc.clone())
            .handle(sync_job(1))
            .await;
        assert!(result.is_ok());

        assert_eq!(codeintel.repos.lock().unwrap().len(), 0);
        assert_eq!(extsvc.list_calls.load(Ordering::SeqCst), 0);
        assert!(codeintel.indexing_jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_unknown_schemes_still_schedule_one_indexing_job() {
        let codeintel = Arc::new(
            FakeCodeIntelStore::default()
                .with_upload(1, "lsif-go")
                .with_references(&[("gomod", "golang.org/x/tools", "0.1.0")]),
        );
        let extsvc = Arc::new(FakeExternalServiceStore::default());

        let result = handler(codeintel.clone(), extsvc.clone())
            .handle(sync_job(1))
            .await;
        assert!(result.is_ok());

        // No registry listing for the empty kind...
        assert_eq!(extsvc.list_calls.load(Ordering::SeqCst), 0);
        // ...but exactly one indexing job keyed by the empty kind, with
        // no sync timestamp.
        let jobs = codeintel.indexing_jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1, "");
        assert!(jobs[0].2.is_none());
    }

    #[tokio::test]
    async fn test_exactly_once_traversal_despite_insert_failures() {
        let mut codeintel = FakeCodeIntelStore::default()
            .with_upload(1, "lsif-go")
            .with_references(&[
                ("npm", "left-pad", "1.0.0"),
                ("npm", "is-even", "1.0.0"),
                ("npm", "is-odd", "1.0.0"),
            ]);
        codeintel.fail_insert_names.insert("is-even".into());
        let codeintel = Arc::new(codeintel);
        let extsvc = Arc::new(FakeExternalServiceStore::default());

        let result = handler(codeintel.clone(), extsvc).handle(sync_job(1)).await;

        // The failing insert did not abort the scan.
        assert_eq!(codeintel.yielded.load(Ordering::SeqCst), 3);
        assert_eq!(codeintel.repos.lock().unwrap().len(), 2);

        match result {
            Err(Error::Job(msg)) => assert!(msg.contains("is-even")),
            other => panic!("Expected single Job error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cumulative_error_aggregation() {
        let mut codeintel = FakeCodeIntelStore::default()
            .with_upload(1, "lsif-go")
            .with_references(&[
                ("npm", "left-pad", "1.0.0"),
                ("npm", "is-even", "1.0.0"),
            ]);
        codeintel.fail_insert_names.insert("left-pad".into());
        codeintel.fail_insert_names.insert("is-even".into());
        let codeintel = Arc::new(codeintel);
        let extsvc = Arc::new(FakeExternalServiceStore {
            fail_upsert: true,
            ..FakeExternalServiceStore::default().with_service(7, "NPMPACKAGES")
        });

        let result = handler(codeintel, extsvc).handle(sync_job(1)).await;

        match result {
            Err(Error::Aggregate(agg)) => {
                // Two insert failures then the upsert failure, in order.
                assert_eq!(agg.len(), 3);
                assert!(agg.errors()[0].to_string().contains("left-pad"));
                assert!(agg.errors()[1].to_string().contains("is-even"));
                assert!(agg.errors()[2].to_string().contains("next_sync_at"));
            }
            other => panic!("Expected aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_error_is_reported_alone() {
        let codeintel = Arc::new(FakeCodeIntelStore {
            fail_close: true,
            ..FakeCodeIntelStore::default().with_upload(1, "lsif-go")
        });
        let extsvc = Arc::new(FakeExternalServiceStore::default());

        let result = handler(codeintel, extsvc).handle(sync_job(1)).await;
        match result {
            Err(Error::Job(msg)) => assert!(msg.contains("cursor close failed")),
            other => panic!("Expected close error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_error_merges_with_scan_failures() {
        let mut codeintel = FakeCodeIntelStore::default()
            .with_upload(1, "lsif-go")
            .with_references(&[("npm", "left-pad", "1.0.0")]);
        codeintel.fail_insert_names.insert("left-pad".into());
        codeintel.fail_close = true;
        let extsvc = Arc::new(FakeExternalServiceStore::default());

        let result = handler(Arc::new(codeintel), extsvc).handle(sync_job(1)).await;
        match result {
            Err(Error::Aggregate(agg)) => {
                assert_eq!(agg.len(), 2);
                assert!(agg.errors()[0].to_string().contains("left-pad"));
                assert!(agg.errors()[1].to_string().contains("cursor close failed"));
            }
            other => panic!("Expected aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cursor_read_failure_is_fatal() {
        let codeintel = Arc::new(FakeCodeIntelStore {
            fail_next_at: Some(1),
            ..FakeCodeIntelStore::default()
                .with_upload(1, "lsif-go")
                .with_references(&[
                    ("npm", "left-pad", "1.0.0"),
                    ("npm", "is-even", "1.0.0"),
                ])
        });
        let extsvc = Arc::new(FakeExternalServiceStore::default().with_service(7, "NPMPACKAGES"));

        let result = handler(codeintel.clone(), extsvc.clone())
            .handle(sync_job(1))
            .await;
        assert!(result.is_err());

        // Phases after the scan never run.
        assert_eq!(extsvc.list_calls.load(Ordering::SeqCst), 0);
        assert!(codeintel.indexing_jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_is_fatal_and_skips_indexing() {
        let codeintel = Arc::new(
            FakeCodeIntelStore::default()
                .with_upload(1, "lsif-go")
                .with_references(&[("npm", "left-pad", "1.0.0")]),
        );
        let extsvc = Arc::new(FakeExternalServiceStore {
            fail_list: true,
            ..FakeExternalServiceStore::default()
        });

        let result = handler(codeintel.clone(), extsvc).handle(sync_job(1)).await;
        match result {
            Err(Error::Job(msg)) => assert!(msg.contains("list failed")),
            other => panic!("Expected list error, got {other:?}"),
        }
        assert!(codeintel.indexing_jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_upload_is_reported() {
        let codeintel = Arc::new(
            FakeCodeIntelStore::default().with_references(&[("npm", "left-pad", "1.0.0")]),
        );
        let extsvc = Arc::new(FakeExternalServiceStore::default().with_service(7, "NPMPACKAGES"));

        let result = handler(codeintel, extsvc).handle(sync_job(99)).await;
        assert!(matches!(result, Err(Error::UploadNotFound(99))));
    }
}
