//! Builder pattern for SuiteRunner construction

use std::sync::Arc;

use crate::cluster::ClusterReconciler;
use crate::error::{BenchError, BenchResult};
use crate::store::RecordStore;
use crate::traits::{ResultSink, WorkloadFactory};

use super::executor::SuiteRunner;

/// Builder for creating a SuiteRunner
///
/// # Example
///
/// ```ignore
/// let runner = SuiteRunnerBuilder::new()
///     .store(store)
///     .factory(registry)
///     .reconciler(manager)
///     .sink(sink)
///     .build()?;
///
/// let summary = runner.run(&loaded).await?;
/// ```
#[derive(Default)]
pub struct SuiteRunnerBuilder {
    store: Option<Arc<dyn RecordStore>>,
    factory: Option<Arc<dyn WorkloadFactory>>,
    reconciler: Option<Arc<dyn ClusterReconciler>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl SuiteRunnerBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data-plane store
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the workload registry
    pub fn factory(mut self, factory: Arc<dyn WorkloadFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Enable cluster management
    pub fn reconciler(mut self, reconciler: Arc<dyn ClusterReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Set the result sink; without one, records are not emitted
    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the runner
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store or factory is not set.
    pub fn build(self) -> BenchResult<SuiteRunner> {
        let store = self
            .store
            .ok_or_else(|| BenchError::missing_config("store"))?;

        let factory = self
            .factory
            .ok_or_else(|| BenchError::missing_config("factory"))?;

        Ok(SuiteRunner {
            store,
            factory,
            reconciler: self.reconciler,
            sink: self.sink,
        })
    }
}
