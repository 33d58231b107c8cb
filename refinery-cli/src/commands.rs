//! Subcommand handlers.

use crate::io::{read_records, write_records};
use crate::{Commands, ConfigAction, TuneAction};
use anyhow::Context;
use refinery_core::config::{CONFIG_FILE, WORKSPACE_DIR};
use refinery_core::transformers::{SchemaInferrer, SchemaInferrerConfig};
use refinery_core::{
    AutoTuner, HistoryStore, JsonFileHistoryStore, PerformanceSample, PipelineConfig, Record,
    Stage, build_chain, load_config,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            input,
            output,
            quarantine,
            batch_size,
            with_metadata,
            record_performance,
        } => {
            let config = load(workspace, config_path)?;
            handle_run(
                &config,
                workspace,
                RunOptions {
                    input,
                    output,
                    quarantine,
                    batch_size,
                    with_metadata,
                    record_performance,
                },
            )
        }
        Commands::InferSchema { input, sample_size } => handle_infer_schema(&input, sample_size),
        Commands::Tune { action } => {
            let config = load(workspace, config_path)?;
            handle_tune(action, &config, workspace)
        }
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    load_config(Some(workspace), config_path).context("Configuration error")
}

struct RunOptions {
    input: PathBuf,
    output: Option<PathBuf>,
    quarantine: Option<PathBuf>,
    batch_size: Option<usize>,
    with_metadata: bool,
    record_performance: bool,
}

fn handle_run(config: &PipelineConfig, workspace: &Path, opts: RunOptions) -> anyhow::Result<()> {
    let batch_size = opts.batch_size.unwrap_or(config.batch_size).max(1);
    let mut chain = build_chain(config).context("Pipeline assembly failed")?;

    let mut records = read_records(&opts.input)?;
    for record in &mut records {
        record.metadata.pipeline_id = config.pipeline_id.clone();
    }
    let total = records.len();
    // Input size stands in for the working set; the tuner only compares runs.
    let memory_mb = std::fs::metadata(&opts.input)
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0);

    tracing::info!(
        pipeline_id = %config.pipeline_id,
        operators = chain.len(),
        records = total,
        batch_size,
        "Starting run"
    );
    let start = Instant::now();
    let mut output: Vec<Record> = Vec::with_capacity(total);
    let mut quarantined: Vec<Record> = Vec::new();
    let mut pending = records.into_iter().peekable();
    while pending.peek().is_some() {
        let batch: Vec<Record> = pending.by_ref().take(batch_size).collect();
        let result = chain.run(batch);
        output.extend(result.records);
        quarantined.extend(result.quarantined);
    }
    let elapsed = start.elapsed().as_secs_f64();

    let loaded_at = chrono::Utc::now();
    for record in output.iter_mut() {
        record.metadata.stage = Stage::Load;
        record.loaded_at = Some(loaded_at);
    }
    write_records(opts.output.as_deref(), &output, opts.with_metadata)?;

    match (&opts.quarantine, quarantined.is_empty()) {
        (Some(path), _) => {
            write_records(Some(path), &quarantined, opts.with_metadata)?;
            eprintln!("Quarantined {} record(s) to {}", quarantined.len(), path.display());
        }
        (None, false) => {
            tracing::warn!(
                count = quarantined.len(),
                "Records were quarantined but no --quarantine path was given; they are discarded"
            );
        }
        (None, true) => {}
    }

    let reports = chain.stats_reports();
    let errors: u64 = reports.iter().map(|r| r.stats.errors).sum();
    for report in &reports {
        eprintln!("  {report}");
    }
    eprintln!(
        "Processed {} record(s) -> {} in {:.3}s ({} error(s))",
        total,
        output.len(),
        elapsed,
        errors
    );

    if opts.record_performance {
        let tuner = tuner(config, workspace)?;
        let sample = PerformanceSample::new(
            config.pipeline_id.clone(),
            total as u64,
            elapsed,
            batch_size,
            memory_mb,
        );
        tuner.record_performance(sample)?;
    }
    Ok(())
}

fn handle_infer_schema(input: &Path, sample_size: Option<usize>) -> anyhow::Result<()> {
    let mut config = SchemaInferrerConfig::default();
    if let Some(n) = sample_size {
        config.sample_size = n;
    }
    let inferrer = SchemaInferrer::new(config)?;
    let records = read_records(input)?;
    let schema = inferrer
        .infer(&records)
        .with_context(|| format!("Could not infer a schema from {}", input.display()))?;
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn tuner(config: &PipelineConfig, workspace: &Path) -> anyhow::Result<AutoTuner> {
    let store = JsonFileHistoryStore::new(config.history_dir(workspace));
    Ok(AutoTuner::new(Arc::new(store), config.autotuner.clone())?)
}

fn handle_tune(action: TuneAction, config: &PipelineConfig, workspace: &Path) -> anyhow::Result<()> {
    let tuner = tuner(config, workspace)?;
    let pipeline_or_default = |p: Option<String>| p.unwrap_or_else(|| config.pipeline_id.clone());

    match action {
        TuneAction::Record {
            pipeline,
            records,
            duration,
            batch_size,
            memory_mb,
            failed,
        } => {
            let mut sample = PerformanceSample::new(
                pipeline_or_default(pipeline),
                records,
                duration,
                batch_size,
                memory_mb,
            );
            if let Some(message) = failed {
                sample = sample.failed(message);
            }
            let summary = format!(
                "Recorded {} run: {:.1} records/s at batch size {}",
                sample.pipeline_id, sample.throughput, sample.batch_size
            );
            tuner.record_performance(sample)?;
            println!("{summary}");
        }
        TuneAction::Recommend { pipeline, current } => {
            let pipeline = pipeline_or_default(pipeline);
            let current = current.or(Some(config.batch_size));
            let report = tuner.recommend(&pipeline, current)?;
            println!("Pipeline: {}", report.pipeline_id);
            println!("Target:   {}", report.optimization_target.as_str());
            println!("Samples:  {}", report.samples_considered);
            if let Some(rec) = &report.recommendation {
                println!("Best batch size: {}", rec.batch_size);
                println!("Confidence:      {:.1}%", rec.confidence_pct);
                println!("Improvement:     {:.1}%", rec.expected_improvement_pct);
            }
            println!("{}", report.reason);
        }
        TuneAction::Summary { pipeline } => {
            let pipeline = pipeline_or_default(pipeline);
            match tuner.performance_summary(&pipeline)? {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => println!("No performance data available for '{pipeline}'"),
            }
        }
        TuneAction::Suggest { pipeline, current } => {
            let pipeline = pipeline_or_default(pipeline);
            let next =
                tuner.suggest_next_batch_size(&pipeline, current.unwrap_or(config.batch_size))?;
            println!("{next}");
        }
        TuneAction::List => {
            let store = JsonFileHistoryStore::new(config.history_dir(workspace));
            for id in store.pipeline_ids()? {
                println!("{id}");
            }
        }
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(WORKSPACE_DIR);
            std::fs::create_dir_all(&config_dir)?;

            let path = config_dir.join(CONFIG_FILE);
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&PipelineConfig::example())?;
            std::fs::write(&path, &toml_str)?;
            println!("Created example configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_path)?;
            config.validate().context("Configuration is invalid")?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
