use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use anyhow::{anyhow, Context, Result};
use qa_ledger_core::translate::{
    project_from_jira, status_from_name, translate_cycle, translate_execution, translate_item,
    user_from_login, version_from_jira,
};
use qa_ledger_core::{
    or_unset, Canonical, Cycle, Entity, Execution, ExecutionDeps, Item, Lookup, NaturalKey,
    Project, RunId, SourceExecution, SourceSystem, Stored, SyncConfig, TranslateError, Version,
};
use qa_ledger_store_sqlite::{merge_in, PartitionSummary, Record, SqliteStore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cache::{lock, IdentityCache};
use crate::retry::{Fetched, RetryPolicy};
use crate::source::SourceClient;
use crate::{CancelFlag, SyncError};

/// Executions of one test run: the granularity of scheduling and resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncUnit {
    pub project_key: String,
    pub run_key: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Never started: the run was cancelled or halted first.
    Pending,
    Completed,
    /// The run or its executions could not be fetched within the retry bound.
    Skipped,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedExecution {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitReport {
    pub unit: SyncUnit,
    pub status: UnitStatus,
    pub staged: usize,
    pub total_partitions: usize,
    pub committed: Vec<PartitionSummary>,
    /// Execution keys committed for this unit, across resumes. A resume
    /// restages the unit and leaves these out.
    pub committed_keys: Vec<String>,
    pub skipped: Vec<SkippedExecution>,
    /// Dependencies cached as not-found while staging this unit.
    pub unresolved: Vec<NaturalKey>,
    pub failing_key: Option<String>,
    pub error: Option<String>,
}

impl UnitReport {
    fn pending(unit: SyncUnit, committed_keys: Vec<String>) -> Self {
        Self {
            unit,
            status: UnitStatus::Pending,
            staged: 0,
            total_partitions: 0,
            committed: Vec::new(),
            committed_keys,
            skipped: Vec::new(),
            unresolved: Vec::new(),
            failing_key: None,
            error: None,
        }
    }

    #[must_use]
    pub fn committed_executions(&self) -> usize {
        self.committed.iter().map(|partition| partition.rows).sum()
    }

    fn skip(&mut self, key: &str, reason: String) {
        tracing::warn!(run = %self.unit.run_key, execution = key, %reason, "execution skipped");
        self.skipped.push(SkippedExecution { key: key.to_string(), reason });
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: RunId,
    pub system: SourceSystem,
    pub outcome: RunOutcome,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    /// Projects whose runs could not be listed within the retry bound.
    pub skipped_projects: Vec<String>,
    pub units: Vec<UnitReport>,
    pub committed_executions: usize,
    pub skipped_executions: usize,
    pub error: Option<String>,
}

impl RunReport {
    #[must_use]
    pub fn skipped_keys(&self) -> Vec<&str> {
        self.units
            .iter()
            .flat_map(|unit| unit.skipped.iter().map(|skipped| skipped.key.as_str()))
            .collect()
    }

    pub fn incomplete_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|unit| unit.status != UnitStatus::Completed)
    }
}

enum Staging {
    Ready,
    /// Cancelled while resolving items; what was resolved so far is staged.
    Cancelled,
    Unreachable(String),
}

/// A unit to process and the execution keys it already committed.
type Planned = (SyncUnit, Vec<String>);

/// Drives synchronization runs against one canonical store.
///
/// The identity caches live as long as the synchronizer, so a `resume`
/// reuses everything the interrupted run already resolved. Lookups answered
/// only because the source exhausted its retries are dropped when the run
/// that cached them ends.
pub struct Synchronizer {
    db_path: PathBuf,
    config: SyncConfig,
    retry: RetryPolicy,
    entities: IdentityCache<NaturalKey, Lookup<Entity>>,
    projects: IdentityCache<String, Stored<Project>>,
    exhausted: Mutex<HashSet<NaturalKey>>,
}

impl Synchronizer {
    /// # Errors
    /// Returns an error when the configuration violates its bounds.
    pub fn new(db_path: &Path, config: SyncConfig) -> Result<Self> {
        config.validate().context("invalid sync configuration")?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            retry: RetryPolicy::from(&config.retry),
            config,
            entities: IdentityCache::new(),
            projects: IdentityCache::new(),
            exhausted: Mutex::new(HashSet::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &IdentityCache<NaturalKey, Lookup<Entity>> {
        &self.entities
    }

    /// Synchronize every configured project of `source`.
    ///
    /// Transient upstream failures and missing dependencies are absorbed and
    /// reported; translation and store failures end in [`RunOutcome::Failed`].
    ///
    /// # Errors
    /// Returns an error only when the store cannot be opened or migrated.
    pub fn run(&self, source: &dyn SourceClient, cancel: &CancelFlag) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = OffsetDateTime::now_utc();
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        tracing::info!(%run_id, system = %source.system(), projects = self.config.projects.len(), "sync run started");

        let mut units = Vec::new();
        let mut skipped_projects = Vec::new();
        let mut error = None;
        for project_key in &self.config.projects {
            match self.plan_project(&store, source, cancel, project_key) {
                Ok(planned) => units.extend(planned.into_iter().map(|unit| (unit, Vec::new()))),
                Err(SyncError::Unreachable { what, last_error }) => {
                    tracing::warn!(project = %project_key, %what, %last_error, "project skipped");
                    skipped_projects.push(project_key.clone());
                }
                Err(SyncError::Cancelled) => break,
                Err(err) => {
                    tracing::error!(project = %project_key, error = %err, "project walk failed");
                    error = Some(format!("project {project_key}: {err}"));
                    break;
                }
            }
        }
        drop(store);

        let reports = if error.is_some() {
            units.into_iter().map(|(unit, committed)| UnitReport::pending(unit, committed)).collect()
        } else {
            self.execute(source, cancel, units)?
        };
        self.forget_exhausted_lookups();
        Ok(finish(run_id, source.system(), started_at, skipped_projects, reports, error, cancel))
    }

    /// Re-process what `previous` left unfinished: incomplete units, minus the
    /// executions they already committed, and projects that were skipped.
    ///
    /// Dependencies cached as not-found by those units are dropped first so
    /// they are fetched again.
    ///
    /// # Errors
    /// Returns an error only when the store cannot be opened or migrated.
    pub fn resume(
        &self,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        previous: &RunReport,
    ) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = OffsetDateTime::now_utc();
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;

        let mut units = Vec::new();
        for report in previous.incomplete_units() {
            for key in &report.unresolved {
                self.entities.invalidate(key);
            }
            units.push((report.unit.clone(), report.committed_keys.clone()));
        }
        tracing::info!(%run_id, resumed_from = %previous.run_id, units = units.len(), "sync resume started");

        let mut skipped_projects = Vec::new();
        let mut error = None;
        for project_key in &previous.skipped_projects {
            self.projects.invalidate(project_key);
            match self.plan_project(&store, source, cancel, project_key) {
                Ok(planned) => units.extend(planned.into_iter().map(|unit| (unit, Vec::new()))),
                Err(SyncError::Unreachable { .. }) => skipped_projects.push(project_key.clone()),
                Err(SyncError::Cancelled) => break,
                Err(err) => {
                    error = Some(format!("project {project_key}: {err}"));
                    break;
                }
            }
        }
        drop(store);

        let reports = self.execute(source, cancel, units)?;
        self.forget_exhausted_lookups();
        Ok(finish(run_id, source.system(), started_at, skipped_projects, reports, error, cancel))
    }

    /// Resolve a project, merge its versions, and list its in-scope runs.
    fn plan_project(
        &self,
        store: &SqliteStore,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        project_key: &str,
    ) -> Result<Vec<SyncUnit>, SyncError> {
        let project = self.resolve_project(store, source, cancel, project_key)?;

        let what = format!("versions of project {project_key}");
        match self.retry.fetch(&what, cancel, || source.get_project_versions(project_key))? {
            Fetched::Value(versions) => {
                for version in &versions {
                    let merged = store.merge(&version_from_jira(version, &project)?)?;
                    self.entities
                        .insert(&merged.natural_key(), Lookup::Found(Entity::Version(merged)));
                }
            }
            Fetched::Exhausted { .. } => {
                tracing::warn!(project = project_key, "versions unavailable; runs will allocate them by name");
            }
        }

        let what = format!("test runs of project {project_key}");
        let runs = match self.retry.fetch(&what, cancel, || source.list_test_runs(project_key))? {
            Fetched::Value(runs) => runs,
            Fetched::Exhausted { last_error, .. } => {
                return Err(SyncError::Unreachable { what, last_error });
            }
        };

        let mut units = Vec::new();
        for run in &runs {
            if !self.config.includes_folder(source.system(), run.folder()) {
                tracing::debug!(project = project_key, run = ?run.key(), folder = ?run.folder(), "run outside folder scope");
                continue;
            }
            let run_key = run
                .key()
                .ok_or(TranslateError::MissingRecord { record: "test run", field: "key" })?;
            units.push(SyncUnit { project_key: project_key.to_string(), run_key });
        }
        tracing::info!(project = project_key, runs = runs.len(), units = units.len(), "project planned");
        Ok(units)
    }

    /// Process `units` on a bounded pool of workers, each with its own store
    /// connection. A failed unit stops new units from starting.
    fn execute(
        &self,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        units: Vec<Planned>,
    ) -> Result<Vec<UnitReport>> {
        let next = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let results = Mutex::new(units.iter().map(|_| None).collect::<Vec<Option<UnitReport>>>());
        let workers = self.config.workers.min(units.len()).max(1);

        thread::scope(|scope| -> Result<()> {
            let (units, next, halted, results) = (&units, &next, &halted, &results);
            let handles = (0..workers)
                .map(|worker| {
                    scope.spawn(move || {
                        self.work(worker, source, cancel, units, next, halted, results)
                    })
                })
                .collect::<Vec<_>>();
            for handle in handles {
                handle.join().map_err(|_| anyhow!("sync worker panicked"))??;
            }
            Ok(())
        })?;

        let results = results.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(units
            .into_iter()
            .zip(results)
            .map(|((unit, committed), report)| {
                report.unwrap_or_else(|| UnitReport::pending(unit, committed))
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn work(
        &self,
        worker: usize,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        units: &[Planned],
        next: &AtomicUsize,
        halted: &AtomicBool,
        results: &Mutex<Vec<Option<UnitReport>>>,
    ) -> Result<()> {
        let mut store = SqliteStore::open(&self.db_path)
            .with_context(|| format!("worker {worker} failed to open the store"))?;

        loop {
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some((unit, committed)) = units.get(index) else {
                return Ok(());
            };

            let report = if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
                UnitReport::pending(unit.clone(), committed.clone())
            } else {
                tracing::debug!(worker, run = %unit.run_key, already_committed = committed.len(), "unit started");
                self.sync_unit(&mut store, source, cancel, unit, committed)
            };

            if report.status == UnitStatus::Failed {
                halted.store(true, Ordering::SeqCst);
            }
            if let Some(slot) = lock(results).get_mut(index) {
                *slot = Some(report);
            }
        }
    }

    fn sync_unit(
        &self,
        store: &mut SqliteStore,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        unit: &SyncUnit,
        already_committed: &[String],
    ) -> UnitReport {
        let mut report = UnitReport::pending(unit.clone(), already_committed.to_vec());
        let mut staged = Vec::new();

        let status = match self.stage_unit(store, source, cancel, unit, &mut report, &mut staged) {
            Ok(Staging::Ready) => UnitStatus::Completed,
            Ok(Staging::Cancelled) | Err(SyncError::Cancelled) => UnitStatus::Cancelled,
            Ok(Staging::Unreachable(reason)) => {
                tracing::warn!(run = %unit.run_key, %reason, "unit skipped");
                report.status = UnitStatus::Skipped;
                report.error = Some(reason);
                return report;
            }
            Err(err) => {
                tracing::error!(run = %unit.run_key, staged = staged.len(), error = %err, "unit failed before commit");
                report.status = UnitStatus::Failed;
                report.error = Some(err.to_string());
                return report;
            }
        };

        if !already_committed.is_empty() {
            let done = already_committed.iter().map(String::as_str).collect::<HashSet<_>>();
            let before = staged.len();
            staged.retain(|execution| !done.contains(execution.key.as_str()));
            tracing::debug!(run = %unit.run_key, left_out = before - staged.len(), "executions committed earlier left out");
        }
        report.staged = staged.len();

        let partition_size = self.config.partition_size;
        let committed = store.run_partitioned(&staged, partition_size, 0, |tx, execution| {
            merge_in(tx, execution).map(|_| ())
        });
        match committed {
            Ok(partitions) => {
                report.total_partitions = partitions.total_partitions;
                report.committed_keys.extend(partition_keys(&staged, partition_size, &partitions.committed));
                report.committed = partitions.committed;
                report.status = status;
            }
            Err(failure) => {
                tracing::error!(
                    run = %unit.run_key,
                    partition = failure.index,
                    key = ?failure.failing_key,
                    cause = %failure.cause,
                    "partition rolled back"
                );
                report.status = UnitStatus::Failed;
                report.total_partitions = failure.total_partitions;
                report.failing_key = failure.failing_key.clone();
                report.error = Some(failure.to_string());
                report.committed_keys.extend(partition_keys(&staged, partition_size, &failure.committed));
                report.committed = failure.committed;
            }
        }

        tracing::info!(
            run = %unit.run_key,
            status = ?report.status,
            committed = report.committed_executions(),
            skipped = report.skipped.len(),
            "unit finished"
        );
        report
    }

    /// Fetch the run and its executions, resolve every dependency in order
    /// (project, version, items, cycle, status and executor), and translate
    /// each execution into `staged`.
    fn stage_unit(
        &self,
        store: &SqliteStore,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        unit: &SyncUnit,
        report: &mut UnitReport,
        staged: &mut Vec<Execution>,
    ) -> Result<Staging, SyncError> {
        let what = format!("test run {}", unit.run_key);
        let run = match self.retry.fetch(&what, cancel, || source.get_test_run(&unit.run_key))? {
            Fetched::Value(run) => run,
            Fetched::Exhausted { last_error, .. } => {
                return Ok(Staging::Unreachable(format!("{what}: {last_error}")));
            }
        };

        let project = match self.resolve_project(store, source, cancel, &unit.project_key) {
            Ok(project) => project,
            Err(SyncError::Unreachable { what, last_error }) => {
                return Ok(Staging::Unreachable(format!("{what}: {last_error}")));
            }
            Err(err) => return Err(err),
        };
        let version =
            self.resolve_row(store, &Version::named(project.id, &or_unset(run.version_name())))?;

        let what = format!("executions of test run {}", unit.run_key);
        let executions =
            match self.retry.fetch(&what, cancel, || source.list_executions(&unit.run_key))? {
                Fetched::Value(executions) => executions,
                Fetched::Exhausted { last_error, .. } => {
                    return Ok(Staging::Unreachable(format!("{what}: {last_error}")));
                }
            };

        let mut resolved = Vec::with_capacity(executions.len());
        let mut cancelled = false;
        for execution in &executions {
            let Some(key) = execution.key() else {
                tracing::error!(run = %unit.run_key, record = ?execution, "execution without id");
                return Err(TranslateError::MissingRecord { record: "execution", field: "id" }.into());
            };

            match self.resolve_item(store, source, cancel, unit, execution, report) {
                Ok(Some(item)) => resolved.push((execution, item)),
                Ok(None) => {
                    let case_key = execution.test_case_key().unwrap_or_default();
                    report.skip(&key, format!("test case `{case_key}` could not be resolved"));
                }
                Err(SyncError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let cycle = translate_cycle(&run, &version)
            .map_err(SyncError::from)
            .and_then(|cycle| Ok(store.merge(&cycle)?))
            .inspect_err(|err| {
                tracing::error!(run = %unit.run_key, record = ?run, error = %err, "cycle merge failed");
            })?;
        self.entities.insert(&cycle.natural_key(), Lookup::Found(Entity::Cycle(cycle.clone())));

        for (execution, item) in resolved {
            let translated = self.link_execution(store, execution, &item, &cycle).inspect_err(|err| {
                tracing::error!(run = %unit.run_key, record = ?execution, error = %err, "execution staging failed");
            })?;
            staged.push(translated);
        }

        tracing::debug!(run = %unit.run_key, fetched = executions.len(), staged = staged.len(), cancelled, "unit staged");
        Ok(if cancelled { Staging::Cancelled } else { Staging::Ready })
    }

    /// Resolve the status and executor of one execution and translate it.
    fn link_execution(
        &self,
        store: &SqliteStore,
        execution: &SourceExecution,
        item: &Stored<Item>,
        cycle: &Stored<Cycle>,
    ) -> Result<Execution, SyncError> {
        let status = self.resolve_row(store, &status_from_name(execution.status_name()))?;
        let executor = self.resolve_row(store, &user_from_login(execution.executor()))?;
        let deps = ExecutionDeps { item, cycle, status: &status, executor: &executor };
        Ok(translate_execution(execution, deps)?)
    }

    /// Map a source project key to its canonical project, fetching it once per
    /// synchronizer. Absent projects resolve to the `UNSET` project.
    fn resolve_project(
        &self,
        store: &SqliteStore,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        project_key: &str,
    ) -> Result<Stored<Project>, SyncError> {
        self.projects.resolve(&project_key.to_string(), || -> Result<_, SyncError> {
            let what = format!("project {project_key}");
            let upstream = match self.retry.fetch(&what, cancel, || source.get_project(project_key))? {
                Fetched::Value(project) => project,
                Fetched::Exhausted { last_error, .. } => {
                    return Err(SyncError::Unreachable { what, last_error });
                }
            };
            if upstream.is_none() {
                tracing::warn!(project = project_key, "project unknown upstream; using UNSET");
            }
            Ok(store.merge(&project_from_jira(upstream.as_ref()))?)
        })
    }

    /// Resolve the item an execution references: fetched and merged once per
    /// synchronizer, falling back to the stored row when the source has no
    /// answer. `None` means the execution has to be skipped.
    fn resolve_item(
        &self,
        store: &SqliteStore,
        source: &dyn SourceClient,
        cancel: &CancelFlag,
        unit: &SyncUnit,
        execution: &SourceExecution,
        report: &mut UnitReport,
    ) -> Result<Option<Stored<Item>>, SyncError> {
        let Some(case_key) = execution.test_case_key().map(str::trim).filter(|key| !key.is_empty())
        else {
            return Ok(None);
        };
        let key = NaturalKey::item(case_key);

        let resolved = self.entities.resolve(&key, || -> Result<Lookup<Entity>, SyncError> {
            let what = format!("test case {case_key}");
            let case = match self.retry.fetch(&what, cancel, || source.get_test_case(case_key))? {
                Fetched::Value(Some(case)) => case,
                Fetched::Value(None) => {
                    tracing::debug!(test_case = case_key, "test case unknown upstream");
                    return Ok(store.find(&key)?.into());
                }
                Fetched::Exhausted { .. } => {
                    lock(&self.exhausted).insert(key.clone());
                    return Ok(store.find(&key)?.into());
                }
            };

            let project_key = case.project_key().unwrap_or(unit.project_key.as_str());
            let project = self.resolve_project(store, source, cancel, project_key)?;
            let merged = store.merge(&translate_item(&case, &project)?)?;
            Ok(Lookup::Found(Entity::Item(merged)))
        });

        match resolved {
            Ok(Lookup::Found(entity)) => Ok(Item::from_entity(entity)),
            Ok(Lookup::NotFound) => {
                if !report.unresolved.contains(&key) {
                    report.unresolved.push(key);
                }
                Ok(None)
            }
            Err(SyncError::Unreachable { what, last_error }) => {
                tracing::warn!(test_case = case_key, %what, %last_error, "test case project unreachable");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Drop the lookups this run cached after exhausting retries, so the next
    /// run on this synchronizer asks the source again.
    fn forget_exhausted_lookups(&self) {
        let keys = std::mem::take(&mut *lock(&self.exhausted));
        for key in &keys {
            self.entities.invalidate(key);
        }
        if !keys.is_empty() {
            tracing::debug!(keys = keys.len(), "dropped lookups cached after exhausted retries");
        }
    }

    /// Find-or-create a key-only row through the identity cache.
    fn resolve_row<T: Record>(&self, store: &SqliteStore, keyed: &T) -> Result<Stored<T>, SyncError> {
        let key = keyed.natural_key();
        let resolved = self.entities.resolve(&key, || {
            store.find_or_create_row(keyed).map(|stored| Lookup::Found(T::into_entity(stored)))
        })?;
        resolved
            .found()
            .and_then(T::from_entity)
            .ok_or_else(|| SyncError::Store(anyhow!("identity cache holds no {} for {key}", T::KIND)))
    }
}

/// Keys of the staged executions that landed in `partitions`.
fn partition_keys<'a>(
    staged: &'a [Execution],
    partition_size: usize,
    partitions: &'a [PartitionSummary],
) -> impl Iterator<Item = String> + 'a {
    partitions.iter().flat_map(move |partition| {
        staged
            .iter()
            .skip(partition.index * partition_size)
            .take(partition.rows)
            .map(|execution| execution.key.clone())
    })
}

fn finish(
    run_id: RunId,
    system: SourceSystem,
    started_at: OffsetDateTime,
    skipped_projects: Vec<String>,
    units: Vec<UnitReport>,
    error: Option<String>,
    cancel: &CancelFlag,
) -> RunReport {
    let outcome = if error.is_some() || units.iter().any(|unit| unit.status == UnitStatus::Failed) {
        RunOutcome::Failed
    } else if cancel.is_cancelled()
        || units.iter().any(|unit| matches!(unit.status, UnitStatus::Cancelled | UnitStatus::Pending))
    {
        RunOutcome::Cancelled
    } else {
        RunOutcome::Completed
    };

    let committed_executions: usize = units.iter().map(UnitReport::committed_executions).sum();
    let skipped_executions: usize = units.iter().map(|unit| unit.skipped.len()).sum();
    tracing::info!(
        %run_id,
        ?outcome,
        units = units.len(),
        committed_executions,
        skipped_executions,
        "sync run finished"
    );

    RunReport {
        run_id,
        system,
        outcome,
        started_at,
        finished_at: OffsetDateTime::now_utc(),
        skipped_projects,
        units,
        committed_executions,
        skipped_executions,
        error,
    }
}
