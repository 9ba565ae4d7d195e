//! End-to-end runs: load, classify, merge/collect, write
//!
//! ```rust,no_run
//! use relfeat::pipeline::Pipeline;
//!
//! let pipeline = Pipeline::from_file("study/pipeline.json")?;
//! let output = pipeline.run_and_write()?;
//! println!("{} vectors, {} features", output.vectors.len(), output.feature_map.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::classify::{Classifier, Example, SubjectId, Treatment};
use crate::config::{PipelineConfig, TableConfig};
use crate::delimited::DelimitedFile;
use crate::error::{Error, Result};
use crate::features::{default_features, Feature, FeatureMap, FeatureVector, RunContext};
use crate::merge::{CollectStats, MergeCollect, StudyDesign};
use crate::output;
use crate::records::bad_records::RouteBadRecords;
use crate::records::{
    BadRecordHandler, BadRecordPolicy, CollectSink, Counting, FailFast, FieldRef, Header,
    JsonLinesSink, LogSink, MapField, RecordSource, RecordTransformation, RejectedRecord,
    TransformStep,
};
use crate::storage::TableStore;

/// Results of one run
#[derive(Debug)]
pub struct RunOutput {
    /// One vector per example whose features succeeded, in example order
    pub vectors: Vec<FeatureVector>,
    pub feature_map: FeatureMap,
    /// Rows loaded per table
    pub rows: BTreeMap<String, usize>,
    /// Records rejected anywhere in the run (collect policy only)
    pub rejected: Vec<RejectedRecord>,
    /// Subjects dropped because a feature failed
    pub skipped: Vec<SubjectId>,
    pub stats: CollectStats,
}

enum Sink {
    Collect(CollectSink),
    Log(LogSink),
    Fail(FailFast),
}

impl Sink {
    fn new(policy: BadRecordPolicy) -> Self {
        match policy {
            BadRecordPolicy::Collect => Self::Collect(CollectSink::new()),
            BadRecordPolicy::Log => Self::Log(LogSink::new()),
            BadRecordPolicy::Error => Self::Fail(FailFast),
        }
    }

    fn handler(&mut self) -> &mut dyn BadRecordHandler {
        match self {
            Self::Collect(sink) => sink,
            Self::Log(sink) => sink,
            Self::Fail(sink) => sink,
        }
    }

    fn into_records(self) -> Vec<RejectedRecord> {
        match self {
            Self::Collect(sink) => sink.into_records(),
            Self::Log(_) | Self::Fail(_) => Vec::new(),
        }
    }
}

/// A configured run
pub struct Pipeline {
    config: PipelineConfig,
    base_dir: PathBuf,
    features: Vec<Arc<dyn Feature>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("base_dir", &self.base_dir)
            .field("features", &self.features.iter().map(|x| x.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    /// Pipeline resolving relative paths against `base_dir`
    #[must_use]
    pub fn new(config: PipelineConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
            features: Vec::new(),
        }
    }

    /// Load a configuration file; paths are relative to its directory
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is invalid
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = PipelineConfig::load(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::new(config, base_dir))
    }

    /// Add a feature definition; without any, the built-in set runs
    #[must_use]
    pub fn with_feature(mut self, feature: impl Feature + 'static) -> Self {
        self.features.push(Arc::new(feature));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    fn features(&self) -> Vec<Arc<dyn Feature>> {
        if self.features.is_empty() {
            default_features()
        } else {
            self.features.clone()
        }
    }

    /// Open the configured store, in memory when no directory is set
    ///
    /// # Errors
    /// Returns storage errors from reopening persisted tables
    pub fn open_store(&self) -> Result<TableStore> {
        match &self.config.output.store {
            Some(dir) => {
                let dir = self.resolve(dir);
                std::fs::create_dir_all(&dir)?;
                TableStore::open(dir)
            }
            None => Ok(TableStore::in_memory()),
        }
    }

    /// Typing transformation for a raw table: selects the `use` columns and
    /// parses each to its declared type
    ///
    /// # Errors
    /// Returns `UnknownField`/`IndexOutOfBounds` for bad `use` entries and
    /// `DuplicateField` when a column is used twice
    pub fn typing(raw: Arc<Header>, table: &TableConfig) -> Result<RecordTransformation> {
        let selected: Vec<FieldRef> = match &table.use_columns {
            Some(refs) => refs.iter().map(|r| r.to_field_ref()).collect::<Result<_>>()?,
            None => (0..raw.len()).map(FieldRef::Index).collect(),
        };
        let mut steps = Vec::with_capacity(selected.len());
        for field in selected {
            let index = raw.resolve(&field)?;
            let step = match table.columns.as_ref().and_then(|cols| cols.get(index)) {
                Some(column) => MapField::cast(index, column.data_type).nullable(column.nullable),
                None => MapField::cast(index, raw.type_at(index)?),
            };
            steps.push(TransformStep::from(step));
        }
        RecordTransformation::new(raw, steps)
    }

    /// Load one table from its delimited file into `store`
    ///
    /// Bad lines and rows failing their declared types go to `handler`.
    ///
    /// # Errors
    /// Returns configuration, IO and storage errors, or the handler's error
    pub fn load_table(
        &self,
        store: &mut TableStore,
        table: &TableConfig,
        handler: &mut dyn BadRecordHandler,
    ) -> Result<usize> {
        let source = DelimitedFile::open(
            self.resolve(&table.file),
            &table.name,
            table.format.clone(),
            table.column_names(),
            self.config.missing(),
        )?;
        let typing = Self::typing(source.header(), table)?;
        let mut counting = Counting::new(handler);
        let stream = source
            .stream()?
            .transform(&typing)?
            .with_bad_records(&mut counting);
        let rows = store
            .create_table(&table.name, typing.output_header().clone())?
            .load(stream)?;
        info!(
            table = %table.name,
            treat_as = %table.treat_as,
            rows,
            rejected = counting.count(),
            "Loaded source file"
        );
        Ok(rows)
    }

    /// Build the study design from the examples table
    ///
    /// # Errors
    /// Returns `DuplicateSubject` under the default duplicate policy
    pub fn study_design(
        &self,
        store: &TableStore,
        handler: &mut dyn BadRecordHandler,
    ) -> Result<StudyDesign> {
        let config = self
            .config
            .examples_tables()
            .next()
            .ok_or_else(|| Error::Config("No table is treated as examples".to_string()))?;
        let table = store.table(&config.name)?;
        let classifier =
            Classifier::new(&config.name, Treatment::Examples, table.header().clone())?;
        let stream = table.stream()?;
        let (name, provenance) = (stream.name().to_string(), stream.provenance().to_string());
        let examples: Vec<Example> =
            RouteBadRecords::new(classifier.examples(stream), handler, name, provenance)
                .collect::<Result<_>>()?;
        let design = StudyDesign::new(examples, self.config.duplicate_subjects)?;
        info!(subjects = design.len(), table = %config.name, "Built study design");
        Ok(design)
    }

    /// Classify every observation table and build the feature vectors
    ///
    /// # Errors
    /// Returns classification, handler and fatal feature errors
    pub fn collect(
        &self,
        store: &TableStore,
        design: &StudyDesign,
        handler: &mut dyn BadRecordHandler,
    ) -> Result<(Vec<FeatureVector>, RunContext, CollectStats)> {
        let mut collector = MergeCollect::new(design);
        for config in self.config.tables.iter().filter(|t| t.treat_as != Treatment::Examples) {
            let table = store.table(&config.name)?;
            let classifier =
                Classifier::new(&config.name, config.treat_as, table.header().clone())?;
            let stream = table.stream()?;
            let (name, provenance) = (stream.name().to_string(), stream.provenance().to_string());
            collector.extend(RouteBadRecords::new(
                classifier.observations(stream),
                &mut *handler,
                name,
                provenance,
            ))?;
        }
        let stats = collector.stats();
        info!(
            facts = stats.facts,
            events = stats.events,
            unknown_subject = stats.unknown_subject,
            outside_window = stats.outside_window,
            incomparable_time = stats.incomparable_time,
            "Merged observations"
        );
        let groups = collector.finish();
        let mut context = RunContext::new(self.features(), self.config.feature_failures);
        let vectors = context.build_vectors(&groups)?;
        Ok((vectors, context, stats))
    }

    /// Run with an explicit bad-records handler
    ///
    /// # Errors
    /// Returns the first fatal error, with the stage and table that raised it
    pub fn run_with(&self, handler: &mut dyn BadRecordHandler) -> anyhow::Result<RunOutput> {
        let mut store = self.open_store().context("opening table store")?;
        let mut rows = BTreeMap::new();
        for table in &self.config.tables {
            let n = self
                .load_table(&mut store, table, &mut *handler)
                .with_context(|| format!("loading table `{}`", table.name))?;
            rows.insert(table.name.clone(), n);
        }
        let design = self
            .study_design(&store, &mut *handler)
            .context("building study design")?;
        let (vectors, context, stats) = self
            .collect(&store, &design, handler)
            .context("building feature vectors")?;
        Ok(RunOutput {
            vectors,
            rows,
            rejected: Vec::new(),
            skipped: context.skipped().to_vec(),
            feature_map: context.into_feature_map(),
            stats,
        })
    }

    /// Run with the configured bad-records policy
    ///
    /// # Errors
    /// Same as [`Pipeline::run_with`]
    pub fn run(&self) -> anyhow::Result<RunOutput> {
        let mut sink = Sink::new(self.config.bad_records);
        let mut output = self.run_with(sink.handler())?;
        output.rejected = sink.into_records();
        Ok(output)
    }

    /// Run, then write vectors, the feature map and any collected bad
    /// records to the configured files
    ///
    /// # Errors
    /// Same as [`Pipeline::run`], plus output IO errors
    pub fn run_and_write(&self) -> anyhow::Result<RunOutput> {
        let output = self.run()?;
        self.write_outputs(&output)?;
        Ok(output)
    }

    /// Write a run's results to the configured files
    ///
    /// # Errors
    /// Returns IO errors naming the file being written
    pub fn write_outputs(&self, run: &RunOutput) -> anyhow::Result<()> {
        let paths = &self.config.output;
        let vectors_path = self.resolve(&paths.vectors);
        let map_path = self.resolve(&paths.feature_map);
        output::write_outputs(
            &run.vectors,
            &run.feature_map,
            paths.vector_format,
            &self.config.label_encoding(),
            &vectors_path,
            &map_path,
        )
        .with_context(|| format!("writing {}", vectors_path.display()))?;
        if !run.rejected.is_empty() {
            let path = self.resolve(&paths.bad_records);
            let mut sink = JsonLinesSink::create(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            for rejected in &run.rejected {
                sink.handle(rejected.clone())?;
            }
            sink.flush()?;
            info!(records = sink.count(), path = %path.display(), "Wrote bad records");
        }
        Ok(())
    }
}
