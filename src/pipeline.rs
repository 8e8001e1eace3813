// 🚚 Pipeline - Ingestion → Raw Store → Cleaning → Enrichment → Star Schema → Validation
// Stages run one after another; each fully consumes its input first.

use crate::cleaning::{CleaningEngine, QualityReport};
use crate::config::PipelineConfig;
use crate::dimensions::StarSchema;
use crate::enrichment::EnrichmentEngine;
use crate::error::PipelineError;
use crate::ingestion::{DatasetSource, RawCsvReader};
use crate::processed::store_processed;
use crate::raw::{load_raw_run, stage_raw_chunk};
use crate::sink::Sink;
use crate::validation::{validate, RunContext, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, info_span};

/// Where the run's raw rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawInput {
    /// Fetch the configured dataset and stage it under a new run id
    Fetch,
    /// Re-process rows already staged under this run id
    Replay(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub millis: u64,
    pub rows_in: usize,
    pub rows_out: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub replayed: bool,
    pub dataset: String,
    pub source_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub raw_rows: usize,
    pub rows_valid: usize,
    pub rows_invalid: usize,
    pub rows_dropped: usize,
    pub processed_rows: usize,
    pub facts_written: usize,
    pub facts_skipped: usize,
    pub skipped_rows: Vec<u64>,
    pub dimension_rows_written: usize,
    pub dimension_sizes: BTreeMap<String, usize>,
    pub validation_passed: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub quality: QualityReport,
    pub validation: ValidationReport,
}

pub struct Pipeline<S: Sink, D: DatasetSource> {
    config: PipelineConfig,
    sink: S,
    source: D,
}

impl<S: Sink, D: DatasetSource> Pipeline<S, D> {
    pub fn new(config: PipelineConfig, sink: S, source: D) -> Self {
        Pipeline {
            config,
            sink,
            source,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn run(&mut self, input: RawInput) -> Result<RunOutcome, PipelineError> {
        let started_at = Utc::now();
        let mut stages = Vec::new();
        let schemas = self.config.schemas.clone();
        let chunk_size = self.config.chunk_size;

        // Built before any I/O so a bad rules file fails fast
        let enricher = EnrichmentEngine::from_config(&self.config)?;
        let cleaner = CleaningEngine::new(self.config.outliers.clone());

        // --- Extract + stage raw ---------------------------------------------
        let (run_id, raw, source_file, replayed) = match input {
            RawInput::Fetch => {
                let run_id = uuid::Uuid::new_v4().to_string();
                let span = info_span!("stage", name = "ingestion", run_id = %run_id);
                let _guard = span.enter();
                let clock = Instant::now();

                let path = self.source.fetch(
                    &self.config.dataset.identifier,
                    self.config.dataset.file_name.as_deref(),
                )?;
                let mut raw = Vec::new();
                for chunk in RawCsvReader::open(&path, chunk_size)? {
                    raw.extend(chunk?);
                }
                stages.push(stage_report("ingestion", clock, 0, raw.len()));

                // Nothing is staged until the whole file has been read
                let clock = Instant::now();
                for chunk in raw.chunks(chunk_size.max(1)) {
                    stage_raw_chunk(&mut self.sink, &schemas.raw, &run_id, chunk)?;
                }
                info!(stage = "raw_store", rows = raw.len(), path = %path.display(), "staged raw rows");
                stages.push(stage_report("raw_store", clock, raw.len(), raw.len()));

                (run_id, raw, Some(path), false)
            }
            RawInput::Replay(run_id) => {
                let span = info_span!("stage", name = "replay", run_id = %run_id);
                let _guard = span.enter();
                let clock = Instant::now();

                let raw = load_raw_run(&self.sink, &schemas.raw, &run_id)?;
                if raw.is_empty() {
                    return Err(PipelineError::UnknownRun(run_id));
                }
                info!(stage = "replay", rows = raw.len(), "loaded raw rows");
                stages.push(stage_report("replay", clock, raw.len(), raw.len()));

                (run_id, raw, None, true)
            }
        };
        let raw_rows = raw.len();

        // --- Clean -----------------------------------------------------------
        let (clean, quality) = {
            let _guard = info_span!("stage", name = "cleaning", run_id = %run_id).entered();
            let clock = Instant::now();
            let (clean, quality) = cleaner.clean(&raw);
            stages.push(stage_report("cleaning", clock, raw_rows, clean.len()));
            (clean, quality)
        };
        drop(raw);

        // --- Enrich + processed store ---------------------------------------
        let enriched = {
            let _guard = info_span!("stage", name = "enrichment", run_id = %run_id).entered();
            let clock = Instant::now();
            let rows_in = clean.len();
            let enriched = enricher.enrich(clean);
            stages.push(stage_report("enrichment", clock, rows_in, enriched.len()));

            let clock = Instant::now();
            let stored = store_processed(&mut self.sink, &schemas.processed, &run_id, &enriched, chunk_size)?;
            stages.push(stage_report("processed_store", clock, enriched.len(), stored));
            enriched
        };

        // --- Dimensional model ----------------------------------------------
        let (facts, dimension_sizes) = {
            let _guard = info_span!("stage", name = "modeling", run_id = %run_id).entered();
            let clock = Instant::now();
            let mut star = StarSchema::load(&self.sink, &schemas.warehouse)?;
            let facts = star.load_facts(&mut self.sink, &schemas.warehouse, &enriched, chunk_size)?;
            stages.push(stage_report("modeling", clock, enriched.len(), facts.facts_written));
            (facts, star.dimension_sizes())
        };

        // --- Validate --------------------------------------------------------
        let validation = {
            let _guard = info_span!("stage", name = "validation", run_id = %run_id).entered();
            let clock = Instant::now();
            let context = RunContext {
                run_id: run_id.clone(),
                dropped: quality.rows_dropped,
            };
            let report = validate(&self.sink, &schemas, Some(&context))?;
            stages.push(stage_report("validation", clock, facts.facts_written, report.checks.len()));
            report
        };

        let summary = RunSummary {
            run_id,
            replayed,
            dataset: self.config.dataset.identifier.clone(),
            source_file,
            started_at,
            finished_at: Utc::now(),
            stages,
            raw_rows,
            rows_valid: quality.rows_valid,
            rows_invalid: quality.rows_invalid,
            rows_dropped: quality.rows_dropped,
            processed_rows: enriched.len(),
            facts_written: facts.facts_written,
            facts_skipped: facts.facts_skipped,
            skipped_rows: facts.skipped_rows,
            dimension_rows_written: facts.dimension_rows_written,
            dimension_sizes,
            validation_passed: validation.passed(),
        };

        info!(
            run_id = %summary.run_id,
            raw = summary.raw_rows,
            facts = summary.facts_written,
            validation = %validation.summary(),
            "run complete"
        );

        Ok(RunOutcome {
            summary,
            quality,
            validation,
        })
    }

    /// Validation report over what the warehouse holds now.
    pub fn validate_only(&self) -> Result<ValidationReport, PipelineError> {
        let _guard = info_span!("stage", name = "validation").entered();
        Ok(validate(&self.sink, &self.config.schemas, None)?)
    }
}

fn stage_report(stage: &str, clock: Instant, rows_in: usize, rows_out: usize) -> StageReport {
    let millis = clock.elapsed().as_millis() as u64;
    info!(stage, millis, rows_in, rows_out, "stage finished");
    StageReport {
        stage: stage.to_string(),
        millis,
        rows_in,
        rows_out,
    }
}

// ============================================================================
// RUN OUTPUTS
// ============================================================================

pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
pub const QUALITY_REPORT_FILE: &str = "quality_report.json";
pub const VALIDATION_REPORT_FILE: &str = "validation_report.json";

pub fn write_json<T: Serialize>(
    dir: &Path,
    file: &str,
    what: &'static str,
    value: &T,
) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(dir).map_err(|source| PipelineError::Output {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(file);
    let json =
        serde_json::to_string_pretty(value).map_err(|source| PipelineError::Serialize { what, source })?;
    fs::write(&path, json).map_err(|source| PipelineError::Output {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Persist the run summary and both reports as JSON in `dir`.
pub fn write_outputs(dir: &Path, outcome: &RunOutcome) -> Result<Vec<PathBuf>, PipelineError> {
    Ok(vec![
        write_json(dir, RUN_SUMMARY_FILE, "run summary", &outcome.summary)?,
        write_json(dir, QUALITY_REPORT_FILE, "quality report", &outcome.quality)?,
        write_json(dir, VALIDATION_REPORT_FILE, "validation report", &outcome.validation)?,
    ])
}
