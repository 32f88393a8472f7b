use super::check_update::{CheckEnv, CheckResults, FlameCheckUpdate, ModrinthCheckUpdate};
use super::ensure_metadata::EnsureResults;
use super::{
    CheckFailure, EnsureMetadataTask, ProviderChoice, ProviderChooser, Resource, ResourceStatus,
    SourcePlatform, SourceRegistry, Updatable,
};
use crate::error::TaskError;
use crate::instance::{MetadataStore, UpdateConstraints};
use crate::tasks::{ConcurrentTask, Task, TaskControl};
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Combined outcome of a pipeline run. Failures never hide successes.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Sorted by name.
    pub updates: Vec<Updatable>,
    pub check_failures: Vec<CheckFailure>,
    pub metadata_failures: Vec<CheckFailure>,
    /// Resources the chooser skipped, and folders.
    pub skipped: Vec<String>,
    /// Resources that got metadata during this run.
    pub ensured: Vec<String>,
    pub aborted: bool,
}

impl PipelineReport {
    pub fn has_failures(&self) -> bool {
        !self.check_failures.is_empty() || !self.metadata_failures.is_empty()
    }
}

type Batches = BTreeMap<SourcePlatform, Vec<Resource>>;

/// Ensure metadata, then check every provider for updates.
///
/// Aborting is permanent for this pipeline; build a new one to run again.
pub struct UpdatePipeline {
    client: Client,
    registry: Arc<SourceRegistry>,
    resources_dir: PathBuf,
    store: MetadataStore,
    concurrency: usize,
    control: TaskControl,
}

impl UpdatePipeline {
    pub fn new(
        client: Client,
        registry: Arc<SourceRegistry>,
        resources_dir: PathBuf,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            store: MetadataStore::new(&resources_dir),
            registry,
            resources_dir,
            concurrency: concurrency.max(1),
            control: TaskControl::new(),
        }
    }

    /// Cancel whichever phase is running. Metadata already written stays.
    pub fn abort(&self) {
        log::info!("Update pipeline aborted");
        self.control.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.control.is_cancelled()
    }

    pub async fn run(
        &self,
        resources: Vec<Resource>,
        constraints: UpdateConstraints,
        chooser: &mut dyn ProviderChooser,
    ) -> PipelineReport {
        let mut report = PipelineReport::default();

        let tracked = match self.ensure_metadata(resources, chooser, &mut report).await {
            Ok(tracked) => tracked,
            Err(_) => {
                report.aborted = true;
                return report;
            }
        };

        if self.check_updates(tracked, constraints, &mut report).await.is_err() {
            report.aborted = true;
        }
        report.updates.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        log::info!(
            "Update check done: {} update(s), {} check failure(s), {} metadata failure(s)",
            report.updates.len(),
            report.check_failures.len(),
            report.metadata_failures.len()
        );
        report
    }

    /// Phase A. Returns every resource that has provider metadata afterwards.
    async fn ensure_metadata(
        &self,
        resources: Vec<Resource>,
        chooser: &mut dyn ProviderChooser,
        report: &mut PipelineReport,
    ) -> Result<Vec<Resource>, TaskError> {
        let mut tracked = Vec::new();
        let mut batches = Batches::new();
        let mut try_others = HashSet::new();
        let mut remembered: Option<ProviderChoice> = None;

        for resource in resources {
            if resource.status != ResourceStatus::NoMetadata {
                tracked.push(resource);
                continue;
            }
            if resource.is_folder {
                report.skipped.push(resource.name);
                continue;
            }
            let choice = match remembered {
                Some(choice) => choice,
                None => {
                    let answer = chooser.choose(&resource);
                    if answer.apply_to_all {
                        remembered = Some(answer.choice);
                    }
                    answer.choice
                }
            };
            match choice {
                ProviderChoice::Skip => report.skipped.push(resource.name),
                ProviderChoice::Use { provider, .. } if self.registry.get(provider).is_none() => {
                    report.metadata_failures.push(CheckFailure::new(
                        resource.name,
                        format!("{} is not available", provider),
                    ));
                }
                ProviderChoice::Use {
                    provider,
                    try_others: retry,
                } => {
                    if retry {
                        try_others.insert(resource.path.clone());
                    }
                    batches.entry(provider).or_default().push(resource);
                }
            }
        }

        let mut retry = Batches::new();
        for (platform, results) in self.ensure_round(batches).await? {
            for resource in results.ready {
                report.ensured.push(resource.name.clone());
                tracked.push(resource);
            }
            for (resource, reason) in results.failed {
                match self.registry.other(platform) {
                    Some(other) if try_others.contains(&resource.path) => {
                        log::info!("{}: {}, trying {}", resource.name, reason, other);
                        retry.entry(other).or_default().push(resource);
                    }
                    _ => report
                        .metadata_failures
                        .push(CheckFailure::new(resource.name, reason)),
                }
            }
        }

        // The fallback round is the last one, whatever the chooser said.
        for (_, results) in self.ensure_round(retry).await? {
            for resource in results.ready {
                report.ensured.push(resource.name.clone());
                tracked.push(resource);
            }
            for (resource, reason) in results.failed {
                report
                    .metadata_failures
                    .push(CheckFailure::new(resource.name, reason));
            }
        }
        Ok(tracked)
    }

    async fn ensure_round(
        &self,
        batches: Batches,
    ) -> Result<Vec<(SourcePlatform, EnsureResults)>, TaskError> {
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        let engine = ConcurrentTask::new("EnsureMetadata", self.concurrency);
        let tasks: Vec<Arc<EnsureMetadataTask>> = batches
            .into_iter()
            .map(|(platform, resources)| {
                Arc::new(EnsureMetadataTask::new(
                    platform,
                    self.registry.clone(),
                    self.store.clone(),
                    resources,
                    self.concurrency,
                ))
            })
            .collect();
        for task in &tasks {
            engine.add_task(task.clone());
        }

        let outcome = engine.run(self.control.context()).await;
        if let Err(TaskError::Aborted) = outcome {
            return Err(TaskError::Aborted);
        }
        if let Err(e) = outcome {
            log::warn!("Ensuring metadata: {}", e);
        }
        Ok(tasks
            .iter()
            .map(|t| (t.platform(), t.take_results()))
            .collect())
    }

    /// Phase B: one check per provider, run side by side.
    async fn check_updates(
        &self,
        tracked: Vec<Resource>,
        constraints: UpdateConstraints,
        report: &mut PipelineReport,
    ) -> Result<(), TaskError> {
        let mut by_provider = Batches::new();
        for resource in tracked {
            if let Some(provider) = resource.provider() {
                by_provider.entry(provider).or_default().push(resource);
            }
        }
        if by_provider.is_empty() {
            return Ok(());
        }

        let results = Arc::new(Mutex::new(CheckResults::default()));
        let env = CheckEnv {
            client: self.client.clone(),
            registry: self.registry.clone(),
            constraints,
            resources_dir: self.resources_dir.clone(),
            concurrency: self.concurrency,
            results: results.clone(),
        };

        let engine = ConcurrentTask::new("CheckUpdates", self.concurrency);
        for (platform, resources) in by_provider {
            if self.registry.get(platform).is_none() {
                for resource in resources {
                    report.check_failures.push(CheckFailure::new(
                        resource.name,
                        format!("{} is not available", platform),
                    ));
                }
                continue;
            }
            let task: Arc<dyn Task> = match platform {
                SourcePlatform::CurseForge => {
                    Arc::new(FlameCheckUpdate::new(env.clone(), resources))
                }
                SourcePlatform::Modrinth => {
                    Arc::new(ModrinthCheckUpdate::new(env.clone(), resources))
                }
            };
            engine.add_task(task);
        }

        let outcome = engine.run(self.control.context()).await;
        {
            let mut collected = results.lock();
            report.updates.append(&mut collected.updates);
            report.check_failures.append(&mut collected.failures);
        }
        match outcome {
            Err(TaskError::Aborted) => Err(TaskError::Aborted),
            Err(_) => {
                for failure in engine.failures() {
                    report
                        .check_failures
                        .push(CheckFailure::new(failure.name, failure.reason));
                }
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
