use crate::core::io::error::PersistenceError;
use crate::core::io::session::{SavedLogin, SessionState};
use crate::core::io::state::{find_structure_dirs, read_structure, write_structure};
use crate::core::io::traits::StateFile;
use crate::core::models::lattice::Lattice;
use crate::core::models::structure::{Status, Structure, StructureEntity};
use crate::core::symmetry::{LatticeSystemClassifier, SymmetryClassifier};
use crate::engine::backend::{BackendConfig, BackendError, JobBackend, JobState};
use crate::engine::config::{FailureAction, SearchConfig};
use crate::engine::decision::DecisionProvider;
use crate::engine::duplicates::{DuplicateReconciler, ReconcileWorker};
use crate::engine::error::EngineError;
use crate::engine::pipeline::OffspringPipeline;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::registry::PopulationRegistry;
use crate::engine::remote::LoginDetails;
use crate::engine::remote::setup::{ConnectionMode, ConnectionOutcome};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Delay between job status queries.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything persisted with a session besides the structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionSettings {
    pub search: SearchConfig,
    pub backend: BackendConfig,
}

pub type SessionFile = SessionState<SessionSettings>;

/// Population counts at one point of a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSummary {
    pub total: usize,
    pub waiting: usize,
    pub optimized: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Tag and enthalpy of the lowest-enthalpy optimized structure.
    pub best: Option<(String, f64)>,
}

enum JobOutcome {
    Optimized,
    Failed(String),
}

/// Top-level driver of an evolutionary search session.
pub struct SearchOrchestrator<'a> {
    settings: SessionSettings,
    config: Arc<SearchConfig>,
    description: String,
    session_dir: Option<PathBuf>,
    registry: Arc<PopulationRegistry>,
    classifier: Arc<dyn SymmetryClassifier>,
    pipeline: OffspringPipeline,
    reconciler: Arc<DuplicateReconciler>,
    worker: Option<ReconcileWorker>,
    backend: Arc<dyn JobBackend>,
    login: Option<LoginDetails>,
    read_only: bool,
    decisions: &'a dyn DecisionProvider,
    reporter: &'a ProgressReporter<'a>,
}

impl<'a> SearchOrchestrator<'a> {
    fn assemble(
        settings: SessionSettings,
        description: &str,
        session_dir: Option<PathBuf>,
        backend: Arc<dyn JobBackend>,
        decisions: &'a dyn DecisionProvider,
        reporter: &'a ProgressReporter<'a>,
    ) -> Self {
        let config = Arc::new(settings.search.clone());
        let registry = Arc::new(PopulationRegistry::new(session_dir.clone()));
        let classifier: Arc<dyn SymmetryClassifier> =
            Arc::new(LatticeSystemClassifier::new(config.symmetry_tolerance));
        let pipeline = OffspringPipeline::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&classifier),
        );
        let reconciler = Arc::new(DuplicateReconciler::new(
            Arc::clone(&registry),
            Arc::clone(&classifier),
            config.duplicates,
        ));
        Self {
            worker: Some(ReconcileWorker::spawn(Arc::clone(&reconciler))),
            settings,
            config,
            description: description.to_string(),
            session_dir,
            registry,
            classifier,
            pipeline,
            reconciler,
            login: backend.login(),
            backend,
            read_only: false,
            decisions,
            reporter,
        }
    }

    /// Starts a new session: checks the configuration, connects, loads the
    /// seeds and fills the initial population with random structures.
    ///
    /// With a `session_dir`, the directory is created and the session is
    /// saved once the initial population exists.
    #[instrument(skip_all, name = "search_start")]
    pub fn start(
        settings: SessionSettings,
        description: &str,
        session_dir: Option<PathBuf>,
        backend: Arc<dyn JobBackend>,
        decisions: &'a dyn DecisionProvider,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        reporter.report(Progress::PhaseStart {
            name: "Preparation",
        });
        settings.search.check_limits()?;
        if let Some(dir) = &session_dir {
            fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;
        }

        let mut orchestrator =
            Self::assemble(settings, description, session_dir, backend, decisions, reporter);
        if orchestrator.connect(ConnectionMode::Start)? == ConnectionOutcome::ReadOnly {
            return Err(EngineError::Aborted(
                "remote connections are required to start a session".into(),
            ));
        }
        reporter.report(Progress::PhaseFinish);

        orchestrator.load_seeds()?;
        orchestrator.generate_initial_population()?;
        if let Some(worker) = &orchestrator.worker {
            worker.request_reset();
        }
        orchestrator.save()?;
        info!(
            structures = orchestrator.registry.size(),
            "Session started."
        );
        Ok(orchestrator)
    }

    /// Reopens a saved session.
    ///
    /// `build_backend` receives the persisted backend configuration. The
    /// session degrades to read-only when connections cannot be established
    /// or the user declines to resume submitting jobs.
    #[instrument(skip_all, name = "search_resume", fields(dir = %session_dir.display()))]
    pub fn resume(
        session_dir: &Path,
        read_only: bool,
        build_backend: impl FnOnce(&BackendConfig) -> Result<Arc<dyn JobBackend>, EngineError>,
        decisions: &'a dyn DecisionProvider,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        reporter.report(Progress::PhaseStart {
            name: "Loading session",
        });
        let state = SessionFile::load_for_resume(session_dir)?;
        state.config.search.check_limits()?;
        let backend = build_backend(&state.config.backend)?;
        if backend.id() != state.backend {
            warn!(saved = %state.backend, current = backend.id(), "Backend differs from the saved session.");
        }

        let mut orchestrator = Self::assemble(
            state.config,
            &state.description,
            Some(session_dir.to_path_buf()),
            backend,
            decisions,
            reporter,
        );
        orchestrator.read_only = read_only;
        if !read_only && orchestrator.connect(ConnectionMode::Resume)? == ConnectionOutcome::ReadOnly {
            orchestrator.read_only = true;
        }

        orchestrator.load_structures(session_dir)?;
        reporter.report(Progress::PhaseFinish);

        if !orchestrator.read_only
            && !decisions.need_boolean("Resume submitting jobs for this session?")
        {
            info!("Session opened read-only at the user's request.");
            orchestrator.read_only = true;
        }
        if let Some(worker) = &orchestrator.worker {
            worker.request_reset();
        }
        Ok(orchestrator)
    }

    fn connect(&mut self, mode: ConnectionMode) -> Result<ConnectionOutcome, EngineError> {
        let Some(connector) = self.backend.connector() else {
            return Ok(ConnectionOutcome::Connected);
        };
        let Some(login) = self.login.as_mut() else {
            return Err(EngineError::Internal(format!(
                "backend '{}' needs connections but has no login",
                self.backend.id()
            )));
        };
        connector.establish(login, self.decisions, mode)
    }

    fn load_seeds(&self) -> Result<(), EngineError> {
        for path in &self.config.seeds {
            let entity = StructureEntity::new(Structure::new(Lattice::cubic(1.0)));
            let loaded = match self.backend.read(&entity, path) {
                Ok(true) => Ok(()),
                Ok(false) => Err(BackendError::JobFailed(format!(
                    "seed '{}' holds no structure",
                    path.display()
                ))),
                Err(e) => Err(e),
            };
            if let Err(e) = loaded {
                warn!(seed = %path.display(), error = %e, "Cannot load seed.");
                self.registry.delete_all_structures();
                return Err(e.into());
            }

            let mut structure = entity.snapshot();
            structure.status = Status::WaitingForOptimization;
            let entity = self
                .pipeline
                .adopt(structure, 1, format!("Seeded: {}", path.display()));
            info!(tag = %entity.read().tag(), seed = %path.display(), "Seed loaded.");
        }
        Ok(())
    }

    fn generate_initial_population(&self) -> Result<(), EngineError> {
        let target = self.config.population.initial_structures;
        let existing = self.registry.size();
        if existing >= target {
            return Ok(());
        }
        self.reporter.report(Progress::PhaseStart {
            name: "Generating initial population",
        });
        self.reporter.report(Progress::TaskStart {
            total_steps: (target - existing) as u64,
        });

        let mut rng = rand::thread_rng();
        let (mut kept, mut rejected) = (0usize, 0usize);
        while self.registry.size() < target {
            let (_, discarded) = self.pipeline.generate_random(&mut rng)?;
            kept += 1;
            rejected += discarded;
            self.reporter.status(format!("{kept} kept, {rejected} rejected"));
            self.reporter.report(Progress::TaskIncrement);
        }
        self.reporter.report(Progress::TaskFinish);
        self.reporter.report(Progress::PhaseFinish);
        info!(kept, rejected, "Initial population generated.");
        Ok(())
    }

    fn load_structures(&self, session_dir: &Path) -> Result<(), EngineError> {
        let dirs = find_structure_dirs(session_dir)?;
        self.reporter.report(Progress::TaskStart {
            total_steps: dirs.len() as u64,
        });

        let mut loaded = Vec::with_capacity(dirs.len());
        for dir in dirs {
            self.reporter.report(Progress::TaskIncrement);
            let structure = match read_structure(&dir) {
                Ok(structure) => structure,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable structure.");
                    continue;
                }
            };
            let status = structure.status;
            let entity = StructureEntity::new(structure);
            match self.backend.load(&entity) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(dir = %dir.display(), "Skipping structure without atoms.");
                    continue;
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping structure the backend cannot load.");
                    continue;
                }
            }
            {
                let mut s = entity.write();
                // Jobs do not outlive the process that submitted them.
                s.status = match status {
                    Status::InProgress => Status::WaitingForOptimization,
                    other => other,
                };
            }
            loaded.push(entity);
        }
        self.reporter.report(Progress::TaskFinish);

        loaded.sort_by_key(|e| e.read().index.unwrap_or(usize::MAX));
        for entity in loaded {
            self.registry.append(entity);
        }
        self.registry.reassign_indices();
        info!(structures = self.registry.size(), "Session structures loaded.");
        Ok(())
    }

    /// Runs the search until `max-structures` exist and none is waiting for
    /// optimization. A read-only session returns at once.
    #[instrument(skip_all, name = "search_run")]
    pub fn run(&mut self) -> Result<SearchSummary, EngineError> {
        if self.read_only {
            warn!("Session is read-only; no jobs are submitted.");
            return Ok(self.summary());
        }
        let population = self.config.population;
        let batch = population.concurrent_jobs.max(1);
        let mut rng = rand::thread_rng();

        self.reporter.report(Progress::PhaseStart { name: "Searching" });
        self.reporter.report(Progress::TaskStart {
            total_steps: population.max_structures as u64,
        });
        loop {
            let waiting = self.registry.with_status(Status::WaitingForOptimization);
            if waiting.is_empty() && self.registry.size() >= population.max_structures {
                break;
            }

            let dispatched: Vec<StructureEntity> = waiting.into_iter().take(batch).collect();
            for (entity, outcome) in self.dispatch(dispatched) {
                match outcome {
                    JobOutcome::Optimized => {
                        if let Some(worker) = &self.worker {
                            worker.request_check();
                        }
                        self.reporter.report(Progress::TaskIncrement);
                    }
                    JobOutcome::Failed(reason) => self.handle_failure(&entity, &reason, &mut rng)?,
                }
            }

            let waiting = self.registry.with_status(Status::WaitingForOptimization).len();
            let room = population.max_structures.saturating_sub(self.registry.size());
            let wanted = batch.saturating_sub(waiting).min(room);
            if wanted > 0 {
                let mut last_error = None;
                let mut generated = 0;
                for result in self.pipeline.generate_batch(wanted) {
                    match result {
                        Ok(_) => generated += 1,
                        Err(e) => {
                            warn!(error = %e, "Offspring generation failed.");
                            last_error = Some(e);
                        }
                    }
                }
                if let (0, 0, Some(e)) = (generated, waiting, last_error) {
                    return Err(e);
                }
            }

            let summary = self.summary();
            self.reporter.status(format!(
                "{} optimized, {} waiting, {} duplicates, {} failed",
                summary.optimized, summary.waiting, summary.duplicates, summary.failed
            ));
            self.save()?;
        }
        self.reporter.report(Progress::TaskFinish);
        self.reporter.report(Progress::PhaseFinish);

        let summary = self.summary();
        info!(
            total = summary.total,
            optimized = summary.optimized,
            duplicates = summary.duplicates,
            "Search finished."
        );
        Ok(summary)
    }

    fn dispatch(&self, entities: Vec<StructureEntity>) -> Vec<(StructureEntity, JobOutcome)> {
        let backend = &*self.backend;
        let classifier = &*self.classifier;

        #[cfg(feature = "parallel")]
        let iter = entities.into_par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = entities.into_iter();

        iter.map(|entity| {
            let outcome = optimize(backend, classifier, &entity);
            (entity, outcome)
        })
        .collect()
    }

    fn handle_failure(
        &self,
        entity: &StructureEntity,
        reason: &str,
        rng: &mut impl rand::Rng,
    ) -> Result<(), EngineError> {
        let (failures, tag) = {
            let mut s = entity.write();
            s.fail_count += 1;
            (s.fail_count, s.tag())
        };
        let limit = self.config.population.failure_limit;
        warn!(%tag, failures, limit, %reason, "Optimization failed.");

        if failures < limit {
            entity.write().status = Status::WaitingForOptimization;
            return Ok(());
        }
        match self.config.population.failure_action {
            FailureAction::Kill => {
                info!(%tag, "Structure killed after repeated failures.");
                entity.write().status = Status::Failed;
            }
            FailureAction::Replace => {
                info!(%tag, "Structure replaced after repeated failures.");
                self.pipeline
                    .replace_with_random(entity, "excessive failures", rng)?;
            }
        }
        Ok(())
    }

    /// Writes the session file and every structure state. The session file
    /// is marked successful only after all structures are written. Without a
    /// session directory this does nothing.
    pub fn save(&self) -> Result<(), EngineError> {
        let Some(dir) = &self.session_dir else {
            return Ok(());
        };
        let path = SessionFile::path_in(dir);
        let mut state = SessionFile::new(&self.description, self.backend.id(), self.settings.clone());
        state.login = self.login.as_ref().map(|login| SavedLogin {
            host: login.host.clone(),
            user: login.user.clone(),
            port: login.port,
        });
        state.write_to_path(&path)?;

        for (index, entity) in self.registry.snapshot().iter().enumerate() {
            let mut structure = entity.snapshot();
            structure.index = Some(index);
            if let Some(location) = &structure.location {
                write_structure(&structure, location)?;
            }
        }

        state.save_successful = true;
        state.write_to_path(&path)?;
        debug!(path = %path.display(), "Session saved.");
        Ok(())
    }

    /// Resets and rechecks duplicates synchronously. Returns the number of
    /// duplicates found.
    pub fn dedupe(&self) -> usize {
        self.reconciler.reset_duplicates()
    }

    /// Waits for outstanding duplicate reconciliation, then saves.
    #[instrument(skip_all, name = "search_shutdown")]
    pub fn shutdown(mut self) -> Result<SearchSummary, EngineError> {
        if let Some(worker) = self.worker.take() {
            worker.finish();
        }
        self.save()?;
        Ok(self.summary())
    }

    pub fn summary(&self) -> SearchSummary {
        let mut summary = SearchSummary {
            total: self.registry.size(),
            ..SearchSummary::default()
        };
        for entity in self.registry.snapshot() {
            let s = entity.read();
            match s.status {
                Status::WaitingForOptimization | Status::InProgress => summary.waiting += 1,
                Status::Optimized => summary.optimized += 1,
                Status::Duplicate => summary.duplicates += 1,
                Status::Failed => summary.failed += 1,
                Status::Empty => {}
            }
        }
        summary.best = self.registry.ranked().first().map(|(h, e)| (e.read().tag(), *h));
        summary
    }

    pub fn registry(&self) -> &Arc<PopulationRegistry> {
        &self.registry
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}

/// Submits one structure and waits for its job. Backend errors count as a
/// failed optimization of that structure only.
fn optimize(
    backend: &dyn JobBackend,
    classifier: &dyn SymmetryClassifier,
    entity: &StructureEntity,
) -> JobOutcome {
    entity.write().status = Status::InProgress;
    match run_job(backend, entity) {
        Ok(true) => {
            let mut s = entity.write();
            s.status = Status::Optimized;
            s.symmetry = classifier.classify(&s);
            debug!(tag = %s.tag(), enthalpy = ?s.enthalpy, "Structure optimized.");
            JobOutcome::Optimized
        }
        Ok(false) => JobOutcome::Failed("job output holds no enthalpy".into()),
        Err(e) => JobOutcome::Failed(e.to_string()),
    }
}

fn run_job(backend: &dyn JobBackend, entity: &StructureEntity) -> Result<bool, BackendError> {
    let handle = backend.submit(entity)?;
    loop {
        match backend.status(&handle)? {
            JobState::Running => thread::sleep(JOB_POLL_INTERVAL),
            JobState::Finished => return backend.fetch(entity, &handle),
            JobState::Failed(reason) => {
                backend.discard(&handle);
                return Err(BackendError::JobFailed(reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::session::SESSION_STATE_FILE;
    use crate::engine::backend::JobHandle;
    use crate::engine::backend::pair_potential::{PairPotentialBackend, tests::config as pair_config};
    use crate::engine::config::tests::sample_config;
    use crate::engine::decision::FixedDecisions;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn settings() -> SessionSettings {
        SessionSettings {
            search: sample_config(),
            backend: BackendConfig::PairPotential(pair_config()),
        }
    }

    fn pair_backend() -> Arc<dyn JobBackend> {
        Arc::new(PairPotentialBackend::new(pair_config()))
    }

    /// Backend whose jobs fail a set number of times for selected
    /// generation 1 ids.
    struct FlakyBackend {
        inner: PairPotentialBackend,
        failures_left: Mutex<HashMap<u32, u32>>,
        failed: Mutex<HashMap<u64, String>>,
    }

    impl FlakyBackend {
        fn new(failing_ids: &[u32], times: u32) -> Self {
            Self {
                inner: PairPotentialBackend::new(pair_config()),
                failures_left: Mutex::new(failing_ids.iter().map(|&id| (id, times)).collect()),
                failed: Mutex::new(HashMap::new()),
            }
        }
    }

    impl JobBackend for FlakyBackend {
        fn id(&self) -> &'static str {
            "flaky"
        }

        fn submit(&self, entity: &StructureEntity) -> Result<JobHandle, BackendError> {
            let (generation, id) = (entity.read().generation, entity.read().id);
            let handle = self.inner.submit(entity)?;
            if generation == 1 {
                if let Some(left) = self.failures_left.lock().get_mut(&id).filter(|left| **left > 0) {
                    *left -= 1;
                    self.failed.lock().insert(handle.id, "forced failure".into());
                }
            }
            Ok(handle)
        }

        fn status(&self, handle: &JobHandle) -> Result<JobState, BackendError> {
            match self.failed.lock().get(&handle.id) {
                Some(reason) => Ok(JobState::Failed(reason.clone())),
                None => self.inner.status(handle),
            }
        }

        fn fetch(&self, entity: &StructureEntity, handle: &JobHandle) -> Result<bool, BackendError> {
            self.inner.fetch(entity, handle)
        }

        fn discard(&self, handle: &JobHandle) {
            self.failed.lock().remove(&handle.id);
            self.inner.discard(handle)
        }
    }

    #[test]
    fn failed_job_is_forgotten_by_the_backend() {
        let backend = PairPotentialBackend::new(pair_config());
        let mut s = Structure::new(Lattice::cubic(4.0));
        s.add_atom("Xe", nalgebra::Vector3::zeros());
        let entity = StructureEntity::new(s);

        assert!(matches!(
            run_job(&backend, &entity),
            Err(BackendError::JobFailed(_))
        ));
        let handle = JobHandle {
            id: 1,
            result_location: None,
        };
        assert!(matches!(
            backend.status(&handle),
            Err(BackendError::UnknownJob(1))
        ));
    }

    #[test]
    fn start_fills_initial_population_and_saves() {
        let dir = tempdir().unwrap();
        let session = dir.path().join("session");
        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();

        let orchestrator = SearchOrchestrator::start(
            settings(),
            "AB search",
            Some(session.clone()),
            pair_backend(),
            &decisions,
            &reporter,
        )
        .unwrap();

        let summary = orchestrator.summary();
        assert_eq!(summary.total, 6);
        assert_eq!(summary.waiting, 6);
        assert!(session.join(SESSION_STATE_FILE).is_file());
        assert!(session.join("00001x00006").join("structure.state").is_file());

        let state = SessionFile::load_for_resume(&session).unwrap();
        assert!(state.save_successful);
        assert_eq!(state.backend, "pair-potential");
        assert_eq!(state.description, "AB search");
    }

    #[test]
    fn illogical_limits_abort_before_any_work() {
        let mut settings = settings();
        settings.search.population.initial_structures = 3;
        settings.search.lattice.a = crate::engine::config::ParamRange::new(9.0, 2.0);
        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();

        let result = SearchOrchestrator::start(settings, "", None, pair_backend(), &decisions, &reporter);
        assert!(matches!(result, Err(EngineError::Configuration { .. })));
    }

    #[test]
    fn missing_seed_aborts_start() {
        let mut settings = settings();
        settings.search.seeds = vec![PathBuf::from("/nonexistent/seed.txt")];
        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();

        let result = SearchOrchestrator::start(settings, "", None, pair_backend(), &decisions, &reporter);
        assert!(matches!(result, Err(EngineError::Backend { .. })));
    }

    #[test]
    fn seeds_are_registered_first() {
        let dir = tempdir().unwrap();
        let seed = dir.path().join("seed.txt");
        fs::write(
            &seed,
            "cell 4 4 4 90 90 90\natom A 0 0 0\natom A 0.5 0.5 0\natom B 0.5 0 0.5\natom B 0 0.5 0.5\n",
        )
        .unwrap();
        let mut settings = settings();
        settings.search.seeds = vec![seed.clone()];
        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();

        let orchestrator =
            SearchOrchestrator::start(settings, "", None, pair_backend(), &decisions, &reporter)
                .unwrap();
        let first = orchestrator.registry().snapshot()[0].snapshot();
        assert_eq!(first.parents, format!("Seeded: {}", seed.display()));
        assert_eq!((first.generation, first.id), (1, 1));
        assert_eq!(orchestrator.registry().size(), 6);
    }

    #[test]
    fn run_reaches_population_target_with_everything_settled() {
        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();
        let mut orchestrator =
            SearchOrchestrator::start(settings(), "", None, pair_backend(), &decisions, &reporter)
                .unwrap();

        let summary = orchestrator.run().unwrap();
        assert_eq!(summary.total, 12);
        assert_eq!(summary.waiting, 0);
        assert_eq!(summary.optimized + summary.duplicates + summary.failed, 12);
        assert!(summary.best.is_some());

        let generations: Vec<u32> = orchestrator
            .registry()
            .snapshot()
            .iter()
            .map(|e| e.read().generation)
            .collect();
        assert!(generations.iter().any(|&g| g > 1));
        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn repeated_failures_replace_structure_in_place() {
        let backend = Arc::new(FlakyBackend::new(&[2], 2));
        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();
        let mut orchestrator =
            SearchOrchestrator::start(settings(), "", None, backend, &decisions, &reporter).unwrap();

        orchestrator.run().unwrap();
        let replaced = orchestrator
            .registry()
            .snapshot()
            .into_iter()
            .find(|e| {
                let s = e.read();
                (s.generation, s.id) == (1, 2)
            })
            .unwrap();
        let s = replaced.read();
        assert_eq!(s.parents, "Randomly generated (excessive failures)");
        assert!(matches!(s.status, Status::Optimized | Status::Duplicate));
        assert!(s.enthalpy.is_some());
    }

    #[test]
    fn kill_action_marks_structure_failed() {
        let mut settings = settings();
        settings.search.population.failure_action = FailureAction::Kill;
        let backend = Arc::new(FlakyBackend::new(&[1, 3], 2));
        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();
        let mut orchestrator =
            SearchOrchestrator::start(settings, "", None, backend, &decisions, &reporter).unwrap();

        let summary = orchestrator.run().unwrap();
        assert_eq!(summary.failed, 2);
        for entity in orchestrator.registry().with_status(Status::Failed) {
            let s = entity.read();
            assert_eq!(s.generation, 1);
            assert_eq!(s.fail_count, 2);
        }
    }

    #[test]
    fn resume_restores_population_and_honours_decline() {
        let dir = tempdir().unwrap();
        let session = dir.path().to_path_buf();
        let reporter = ProgressReporter::new();
        {
            let decisions = FixedDecisions::accept_all();
            let mut orchestrator = SearchOrchestrator::start(
                settings(),
                "resumable",
                Some(session.clone()),
                pair_backend(),
                &decisions,
                &reporter,
            )
            .unwrap();
            orchestrator.run().unwrap();
            orchestrator.shutdown().unwrap();
        }

        let decisions = FixedDecisions::decline_all();
        let resumed = SearchOrchestrator::resume(
            &session,
            false,
            |config| {
                assert_eq!(config.id(), "pair-potential");
                Ok(pair_backend())
            },
            &decisions,
            &reporter,
        )
        .unwrap();
        assert!(resumed.is_read_only());
        let summary = resumed.summary();
        assert_eq!(summary.total, 12);
        assert_eq!(summary.waiting, 0);

        let indices: Vec<Option<usize>> = resumed
            .registry()
            .snapshot()
            .iter()
            .map(|e| e.read().index)
            .collect();
        assert_eq!(indices, (0..12).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn resume_refuses_incomplete_session() {
        let dir = tempdir().unwrap();
        let mut state = SessionFile::new("broken", "pair-potential", settings());
        state.save_successful = false;
        state.write_to_path(&SessionFile::path_in(dir.path())).unwrap();

        let decisions = FixedDecisions::accept_all();
        let reporter = ProgressReporter::new();
        let result =
            SearchOrchestrator::resume(dir.path(), false, |_| Ok(pair_backend()), &decisions, &reporter);
        assert!(matches!(
            result,
            Err(EngineError::Persistence {
                source: PersistenceError::Incomplete { .. }
            })
        ));
    }

    #[test]
    fn read_only_session_does_not_run() {
        let dir = tempdir().unwrap();
        let reporter = ProgressReporter::new();
        {
            let decisions = FixedDecisions::accept_all();
            let orchestrator = SearchOrchestrator::start(
                settings(),
                "",
                Some(dir.path().to_path_buf()),
                pair_backend(),
                &decisions,
                &reporter,
            )
            .unwrap();
            orchestrator.shutdown().unwrap();
        }
        let decisions = FixedDecisions::accept_all();
        let mut resumed =
            SearchOrchestrator::resume(dir.path(), true, |_| Ok(pair_backend()), &decisions, &reporter)
                .unwrap();
        let summary = resumed.run().unwrap();
        assert_eq!(summary.waiting, 6);
        assert_eq!(summary.total, 6);
    }
}
