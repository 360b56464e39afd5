//! CLI argument parsing and command dispatch

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use unibench_cluster::atlas_from_env;
use unibench_core::{
    ConfigError, LoadedSuite, RecordStore, ResultSink, SuiteConfig, SuiteRunnerBuilder,
    SuiteSummary,
};
use unibench_storage::{FanOutSink, JsonDirSink, MemoryStore, MongoStore, StoreResultSink};
use unibench_workloads::WorkloadRegistry;

#[derive(Parser, Debug)]
#[command(name = "unibench")]
#[command(author, version, about = "Database workload benchmark runner", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Connection string of the database under test
    #[arg(long, env = "MONGO_URI", hide_env_values = true)]
    pub uri: Option<String>,

    /// Connection string of the database results are recorded in
    #[arg(long, env = "MONGO_RECORDING_URI", hide_env_values = true)]
    pub recording_uri: Option<String>,

    /// Directory that result records are written to
    #[arg(long, env = "UNIBENCH_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Suite configuration file
    pub suite: Option<PathBuf>,
}

/// Print usage to stdout
pub fn print_usage() -> Result<()> {
    Cli::command()
        .print_help()
        .context("failed to print usage")?;
    println!();
    Ok(())
}

/// Data-plane store for a suite
///
/// Without a connection string the suite runs in process, which is refused
/// when the suite manages a cluster since that cluster would see no load.
async fn data_store(cli: &Cli, loaded: &LoadedSuite) -> Result<Arc<dyn RecordStore>> {
    match &cli.uri {
        Some(uri) => {
            let store = MongoStore::connect(uri)
                .await
                .context("failed to connect to the database under test")?;
            Ok(Arc::new(store))
        }
        None if loaded.suite.cluster.is_some() => Err(ConfigError::Invalid(
            "suite manages a cluster but no MONGO_URI or --uri is set".to_string(),
        )
        .into()),
        None => {
            tracing::warn!("No MONGO_URI set; running against the in-process store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Result sinks for the configured destinations, if any
async fn result_sink(cli: &Cli) -> Result<Option<Arc<dyn ResultSink>>> {
    let mut sinks: Vec<Arc<dyn ResultSink>> = Vec::new();

    if let Some(uri) = &cli.recording_uri {
        let store = MongoStore::connect(uri)
            .await
            .context("failed to connect to the results database")?;
        tracing::info!(store = store.name(), "Recording results");
        sinks.push(Arc::new(StoreResultSink::new(Arc::new(store))));
    }
    if let Some(dir) = &cli.results_dir {
        tracing::info!(dir = %dir.display(), "Writing results");
        sinks.push(Arc::new(JsonDirSink::new(dir)));
    }

    Ok(match sinks.len() {
        0 => {
            tracing::info!("No results destination configured; results will not be recorded");
            None
        }
        1 => sinks.pop(),
        _ => Some(Arc::new(FanOutSink::new(sinks))),
    })
}

/// Load the suite at `path` and run it to completion
pub async fn run_suite(cli: &Cli, path: &Path) -> Result<SuiteSummary> {
    let loaded = SuiteConfig::load(path)
        .with_context(|| format!("failed to load suite {}", path.display()))?;

    let mut builder = SuiteRunnerBuilder::new()
        .store(data_store(cli, &loaded).await?)
        .factory(Arc::new(WorkloadRegistry::new()));

    if loaded.suite.cluster.is_some() {
        let manager = atlas_from_env(loaded.suite.poll)
            .context("cluster management needs Atlas credentials in the environment")?;
        builder = builder.reconciler(Arc::new(manager));
    }

    if let Some(sink) = result_sink(cli).await? {
        builder = builder.sink(sink);
    }

    let runner = builder.build().context("failed to build suite runner")?;
    let summary = runner
        .run(&loaded)
        .await
        .with_context(|| format!("suite {} failed", path.display()))?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suite_and_flags() {
        let cli = Cli::try_parse_from(["unibench", "-v", "--results-dir", "out", "suite.json"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.results_dir, Some(PathBuf::from("out")));
        assert_eq!(cli.suite, Some(PathBuf::from("suite.json")));
    }

    #[test]
    fn test_suite_is_optional() {
        let cli = Cli::try_parse_from(["unibench"]).unwrap();
        assert!(cli.suite.is_none());
    }

    #[tokio::test]
    async fn test_run_suite_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let workload = dir.path().join("small_inserts.json");
        std::fs::write(
            &workload,
            r#"{
                "workloadType": "insert",
                "database": "bench",
                "collection": "inserts",
                "totalDocsToInsert": 100,
                "docSizeKB": 0.25,
                "threadCount": 2,
                "variants": [{ "writeBatchSize": 10 }, { "writeBatchSize": 50 }]
            }"#,
        )
        .unwrap();
        let suite = dir.path().join("suite.json");
        std::fs::write(&suite, r#"{ "workloads": ["small_inserts.json"] }"#).unwrap();

        let results = dir.path().join("results");
        let cli = Cli {
            verbose: false,
            uri: None,
            recording_uri: None,
            results_dir: Some(results.clone()),
            suite: Some(suite.clone()),
        };
        let summary = run_suite(&cli, &suite).await.unwrap();

        assert_eq!(summary.variants_completed, 2);
        assert_eq!(summary.records_emitted, 2);
        let history = std::fs::read_to_string(results.join("results_history.jsonl")).unwrap();
        assert_eq!(history.lines().count(), 2);
    }

    #[test]
    fn test_parse_connection_strings() {
        let cli = Cli::try_parse_from([
            "unibench",
            "--uri",
            "mongodb://bench:27017",
            "--recording-uri",
            "mongodb://results:27017",
            "suite.json",
        ])
        .unwrap();
        assert_eq!(cli.uri.as_deref(), Some("mongodb://bench:27017"));
        assert_eq!(cli.recording_uri.as_deref(), Some("mongodb://results:27017"));
    }

    #[tokio::test]
    async fn test_cluster_suite_needs_database_uri() {
        let dir = tempfile::tempdir().unwrap();
        let suite = dir.path().join("suite.json");
        std::fs::write(
            &suite,
            r#"{ "cluster": { "tier": "M30" }, "workloads": [] }"#,
        )
        .unwrap();

        let cli = Cli {
            verbose: false,
            uri: None,
            recording_uri: None,
            results_dir: None,
            suite: Some(suite.clone()),
        };
        let err = run_suite(&cli, &suite).await.unwrap_err();

        let config = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config, ConfigError::Invalid(msg) if msg.contains("MONGO_URI")));
    }

    #[tokio::test]
    async fn test_missing_suite_file_is_an_error() {
        let cli = Cli::try_parse_from(["unibench"]).unwrap();
        let err = run_suite(&cli, Path::new("/nonexistent/suite.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to load suite"));
    }
}
