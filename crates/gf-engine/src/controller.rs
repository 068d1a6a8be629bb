//! Per-generation lifecycle: INIT, SAMPLE, RENDER, EXECUTE, SCORE.

use gf_exec::{build_executor, ExecutionContext, JobExecutor, Model};
use gf_optimizer::{selection_pool, Evolver, Offspring, ParameterSpace, TournamentSelector};
use gf_types::{
    ExecutionReport, GenerationPhase, GeneticConfig, GfResult, RankingEntry, RunStatus,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::fitter::Fitter;
use crate::layout::{prepare_output_root, GenerationLayout};
use crate::render::{FirstTokenParser, TemplateRenderer};
use crate::store::{write_lineage_log, write_sampling, CsvTableStore, TableStore};

/// What one generation produced, as seen from this rank.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSummary {
    pub generation: usize,
    /// Individuals sampled or bred (coordinator only).
    pub individuals: usize,
    pub mutations: usize,
    pub crossovers: usize,
    pub report: ExecutionReport,
    /// Best-scored model of this generation (coordinator only).
    pub best: Option<RankingEntry>,
}

/// Drives generations of one optimization run.
///
/// Every rank of a distributed run builds a controller. File-system phases
/// run on the coordinator only; all ranks take part in EXECUTE.
pub struct GenerationController {
    config: GeneticConfig,
    context: ExecutionContext,
    evolver: Evolver,
    renderer: TemplateRenderer,
    store: Box<dyn TableStore>,
    executor: Box<dyn JobExecutor>,
    fitter: Arc<dyn Fitter>,
    status: RunStatus,
}

impl GenerationController {
    pub fn new(
        config: GeneticConfig,
        context: ExecutionContext,
        space: ParameterSpace,
        renderer: TemplateRenderer,
        executor: Box<dyn JobExecutor>,
        fitter: Arc<dyn Fitter>,
    ) -> GfResult<Self> {
        config.validate()?;
        let selector = TournamentSelector::new(config.k_frac, config.p)?;
        let evolver = Evolver::seeded(space, selector, config.fraction_mutation, config.seed)?;

        if context.is_coordinator() {
            prepare_output_root(&config.output_dir, config.existing, config.overwrite)?;
        }
        info!(
            run = %config.name,
            rank = context.rank(),
            size = context.size(),
            executor = executor.name(),
            parameters = evolver.space().len(),
            "controller ready"
        );

        let status = RunStatus::new(config.name.clone());
        Ok(Self {
            config,
            context,
            evolver,
            renderer,
            store: Box::new(CsvTableStore::new()),
            executor,
            fitter,
            status,
        })
    }

    /// Load the parameter space and template named in `config`, and pick
    /// the executor matching its mode.
    pub fn from_config(
        config: GeneticConfig,
        context: ExecutionContext,
        model: Arc<dyn Model>,
        fitter: Arc<dyn Fitter>,
    ) -> GfResult<Self> {
        config.validate()?;
        let space = ParameterSpace::from_config_file(&config.parameters)?;
        let renderer = TemplateRenderer::from_file(
            &config.template,
            config.placeholder.clone(),
            Box::new(FirstTokenParser),
        )?;
        let executor = build_executor(&config, &context, model)?;
        Self::new(config, context, space, renderer, executor, fitter)
    }

    pub fn with_store(mut self, store: Box<dyn TableStore>) -> Self {
        self.store = store;
        self
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn config(&self) -> &GeneticConfig {
        &self.config
    }

    pub fn layout(&self, generation: usize) -> GenerationLayout {
        GenerationLayout::new(&self.config.output_dir, generation)
    }

    /// Run `count` generations starting at `start`. Earlier generations'
    /// tables must already exist when `start > 1`.
    pub async fn run(&mut self, start: usize, count: usize) -> GfResult<Vec<GenerationSummary>> {
        self.status.mark_running();
        let mut summaries = Vec::with_capacity(count);
        for generation in start..start + count {
            match self.run_generation(generation).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!(generation, error = %e, "generation failed");
                    self.status.mark_failed(e.to_string());
                    return Err(e);
                }
            }
        }
        self.status.mark_completed();
        info!(
            run = %self.config.name,
            generations = self.status.generations_completed,
            best = ?self.status.best,
            "run complete"
        );
        Ok(summaries)
    }

    pub async fn run_generation(&mut self, generation: usize) -> GfResult<GenerationSummary> {
        let layout = self.layout(generation);
        let coordinator = self.context.is_coordinator();
        let mut summary = GenerationSummary {
            generation,
            ..GenerationSummary::default()
        };

        self.enter(generation, GenerationPhase::Init);
        if coordinator {
            layout.create(self.config.overwrite)?;
        }

        self.enter(generation, GenerationPhase::Sample);
        if coordinator {
            let offspring = self.sample(generation)?;
            self.write_offspring(&layout, &offspring)?;
            summary.individuals = offspring.individuals.len();
            summary.mutations = offspring.mutations;
            summary.crossovers = offspring.crossovers;
        }

        self.enter(generation, GenerationPhase::Render);
        if coordinator {
            self.render(&layout)?;
        }

        self.enter(generation, GenerationPhase::Execute);
        let jobs = if coordinator { layout.jobs()? } else { Vec::new() };
        summary.report = self.executor.execute(jobs).await?;

        self.enter(generation, GenerationPhase::Score);
        if coordinator {
            summary.best = self.score(&layout).await?;
        }

        self.status.finish_generation();
        Ok(summary)
    }

    fn enter(&mut self, generation: usize, phase: GenerationPhase) {
        self.status.enter(generation, phase);
        if self.context.is_coordinator() || !phase.coordinator_only() {
            info!(generation, phase = %phase, rank = self.context.rank(), "entering phase");
        }
    }

    fn sample(&mut self, generation: usize) -> GfResult<Offspring> {
        if generation == 1 {
            return Ok(self.evolver.seed_population(self.config.n_models));
        }

        let earlier: Vec<GenerationLayout> = (1..generation).map(|g| self.layout(g)).collect();
        let parameter_paths: Vec<PathBuf> = earlier.iter().map(|l| l.parameter_table()).collect();
        let results_paths: Vec<PathBuf> = earlier.iter().map(|l| l.results_table()).collect();

        let history = self.store.read_parameter_history(&parameter_paths)?;
        let results = self.store.read_results_history(&results_paths)?;
        let pool = selection_pool(results, self.config.n_models);
        if let Some(best) = pool.best() {
            info!(
                generation,
                model = %best.model_name,
                fitness = best.fitness,
                pool = pool.len(),
                "best fit so far"
            );
        }

        self.evolver
            .evolve(generation, self.config.n_output(), &pool, &history)
    }

    fn write_offspring(&self, layout: &GenerationLayout, offspring: &Offspring) -> GfResult<()> {
        let columns: Vec<&str> = self.evolver.space().names().collect();
        self.store
            .write_parameters(&layout.parameter_table(), &columns, &offspring.individuals)?;
        if offspring.generation > 1 {
            write_lineage_log(&layout.lineage_log(), &offspring.lineage)?;
            write_sampling(&layout.sampling_file(), &offspring.selected)?;
        }
        Ok(())
    }

    /// One parameter file per row of this generation's parameter table.
    fn render(&self, layout: &GenerationLayout) -> GfResult<()> {
        let individuals = self.store.read_parameters(&layout.parameter_table())?;
        for individual in &individuals {
            let path = layout.parameter_file(&individual.model_name);
            self.renderer
                .render_to(&path, layout.generation(), individual)?;
        }
        info!(
            generation = layout.generation(),
            files = individuals.len(),
            "rendered parameter files"
        );
        Ok(())
    }

    async fn score(&mut self, layout: &GenerationLayout) -> GfResult<Option<RankingEntry>> {
        let results_path = layout.results_table();
        self.fitter
            .run(&layout.models_dir(), &results_path, &layout.plots_dir())
            .await?;

        let ranking = self.store.read_results(&results_path)?;
        let best = ranking.best().cloned();
        match &best {
            Some(best) => {
                info!(
                    generation = layout.generation(),
                    model = %best.model_name,
                    fitness = best.fitness,
                    scored = ranking.len(),
                    "generation scored"
                );
                self.status.update_best(best);
            }
            None => info!(generation = layout.generation(), "no models were scored"),
        }
        Ok(best)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gf_exec::{CommandModel, LocalTransport, Transport};
    use gf_optimizer::ParameterSpec;
    use gf_types::{ExecutionMode, GfError, RankingTable, RunState, SchedulingConfig, TableError};
    use std::fs;
    use std::path::Path;

    const TEMPLATE: &str = "# toy model\nalpha VAR\nbeta VAR\ngamma VAR\nseed 42\n";
    const PARAMETERS: &str = "alpha linear -5 5\nbeta log 0.001 10\ngamma linear 0 1\n";

    /// Fitness is the value the model printed into `<name>.out`.
    struct OutputFitter;

    #[async_trait]
    impl Fitter for OutputFitter {
        async fn run(&self, models_dir: &Path, results_path: &Path, _plots: &Path) -> GfResult<()> {
            let mut entries = Vec::new();
            for entry in fs::read_dir(models_dir)? {
                let path = entry?.path();
                let name = path.file_stem().unwrap().to_string_lossy().into_owned();
                let fitness: f64 = fs::read_to_string(&path)?.trim().parse().unwrap();
                entries.push(RankingEntry::new(name, fitness));
            }
            CsvTableStore::new().write_results(results_path, &RankingTable::new(entries))
        }
    }

    fn toy_model() -> Arc<dyn Model> {
        Arc::new(CommandModel::shell(
            "awk '$1 != \"#\" && $1 != \"seed\" { s += ($2 - 0.5) ^ 2 } END { print s }' {par} > {out}/{name}.out",
        ))
    }

    fn config(root: &Path) -> GeneticConfig {
        fs::write(root.join("toy.par"), TEMPLATE).unwrap();
        fs::write(root.join("toy.conf"), PARAMETERS).unwrap();
        GeneticConfig::new("toy", root.join("run"))
            .with_inputs(root.join("toy.par"), root.join("toy.conf"))
            .with_population(10)
            .with_fractions(0.1, 0.5)
            .with_tournament(0.2, 0.9)
            .with_cores(4)
            .with_max_time(20.0)
            .with_seed(7)
            .with_scheduling(SchedulingConfig {
                poll_interval_ms: 5,
                drain_interval_ms: 20,
                spawn_stagger_ms: 1,
            })
    }

    fn local_controller(config: GeneticConfig) -> GenerationController {
        GenerationController::from_config(
            config,
            ExecutionContext::single(),
            toy_model(),
            Arc::new(OutputFitter),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn two_generations_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let mut controller = local_controller(config(root.path()));

        let summaries = controller.run(1, 2).await.unwrap();

        assert_eq!(summaries[0].individuals, 10);
        assert_eq!(summaries[0].report.completed(), 10);
        assert_eq!(summaries[1].individuals, 1);
        assert_eq!(summaries[1].mutations + summaries[1].crossovers, 1);

        let store = CsvTableStore::new();
        let space = ParameterSpace::parse(PARAMETERS).unwrap();
        let first = store
            .read_parameters(&controller.layout(1).parameter_table())
            .unwrap();
        assert_eq!(first.len(), 10);
        assert!(first.iter().all(|i| space.admits(i)));
        assert!(controller.layout(1).parameter_file("g1_9").exists());

        let log = fs::read_to_string(controller.layout(2).lineage_log()).unwrap();
        let line = log.lines().next().unwrap();
        assert!(line.starts_with("g2_0 = "));
        if summaries[1].crossovers == 1 {
            assert!(line.contains("crossover of g1_"));
        } else {
            assert!(line.contains("mutation of g1_"));
            assert!(line.contains("parameter="));
        }

        let status = controller.status();
        assert_eq!(status.state, RunState::Completed);
        assert_eq!(status.generations_completed, 2);
        assert!(status.best.is_some());
    }

    #[tokio::test]
    async fn resuming_needs_earlier_tables() {
        let root = tempfile::tempdir().unwrap();
        let mut controller = local_controller(config(root.path()));

        let err = controller.run(2, 1).await.unwrap_err();
        assert!(matches!(err, GfError::Table(TableError::NotFound { .. })));
        assert_eq!(controller.status().state, RunState::Failed);
    }

    #[tokio::test]
    async fn existing_output_requires_opt_in() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        fs::create_dir_all(&cfg.output_dir).unwrap();

        let result = GenerationController::from_config(
            cfg.clone(),
            ExecutionContext::single(),
            toy_model(),
            Arc::new(OutputFitter),
        );
        assert!(result.is_err());

        let mut resumed = cfg;
        resumed.existing = true;
        local_controller(resumed);
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path()).with_tournament(0.05, 0.9);
        let result = GenerationController::from_config(
            cfg,
            ExecutionContext::single(),
            toy_model(),
            Arc::new(OutputFitter),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn distributed_run_across_three_ranks() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path()).with_mode(ExecutionMode::Distributed);
        let space = ParameterSpace::new(vec![
            ParameterSpec::linear("alpha", -5.0, 5.0).unwrap(),
            ParameterSpec::log("beta", 0.001, 10.0).unwrap(),
            ParameterSpec::linear("gamma", 0.0, 1.0).unwrap(),
        ])
        .unwrap();

        let mut tasks = Vec::new();
        for transport in LocalTransport::cluster(3).unwrap() {
            let transport: Arc<dyn Transport> = Arc::new(transport);
            let context = ExecutionContext::distributed(transport).unwrap();
            let executor = build_executor(&cfg, &context, toy_model()).unwrap();
            let renderer = TemplateRenderer::new(TEMPLATE, "VAR", Box::new(FirstTokenParser));
            let mut controller = GenerationController::new(
                cfg.clone(),
                context,
                space.clone(),
                renderer,
                executor,
                Arc::new(OutputFitter),
            )
            .unwrap();
            tasks.push(tokio::spawn(async move { controller.run(1, 2).await.unwrap() }));
        }

        let mut summaries = Vec::new();
        for task in tasks {
            summaries.push(task.await.unwrap());
        }

        let master = &summaries[0];
        assert_eq!(master[0].report.assignments.len(), 10);
        assert_eq!(master[1].report.assignments.len(), 1);
        assert!(master[1].best.is_some());
        for worker in &summaries[1..] {
            assert!(worker.iter().all(|s| s.report.stops_received == 1));
            assert!(worker.iter().all(|s| s.best.is_none()));
        }
        let ran: usize = summaries[1..]
            .iter()
            .flat_map(|w| w.iter())
            .map(|s| s.report.completed())
            .sum();
        assert_eq!(ran, 11);
    }
}
