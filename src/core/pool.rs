use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::engine::{run_one_with_tables, validate_scenario};
use super::error::InputError;
use super::sampler::derive_seed;
use super::tax::{BuiltinTaxTables, TaxTableSource};
use super::types::{RunOutput, Scenario};

const MAX_DEFAULT_WORKERS: usize = 8;

/// One settled task: exactly one of `result` and `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub simulation_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All tasks settled, in submission order. A task's failure is data, not
/// a batch failure; `errors` mirrors the failed entries by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub tasks: Vec<TaskResult>,
    pub errors: HashMap<u64, String>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.result.is_some()).count()
    }
}

fn describe_fault(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            format!("worker panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("worker panicked: {s}")
        } else {
            "worker panicked".to_string()
        }
    } else {
        err.to_string()
    }
}

/// Bounded pool of blocking simulation workers. Slots are taken in
/// submission order, so the queue is FIFO; results come back in input
/// order regardless of completion order. There is no cancellation or
/// timeout; backpressure is the bounded slot count.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        WorkerPool {
            slots: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Sized to the host CPU count, capped.
    pub fn with_default_size() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cpus.min(MAX_DEFAULT_WORKERS))
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run closures on blocking threads, at most `max_workers` at a time.
    /// A panic escaping a task is captured as an error string in its slot
    /// without disturbing siblings.
    pub async fn run_tasks<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T, String>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let permit = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .expect("pool semaphore is never closed");
            handles.push(tokio::task::spawn_blocking(move || {
                let output = task();
                drop(permit);
                output
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.map_err(describe_fault));
        }
        results
    }

    /// Run one draw per scenario, seeded per simulation id from the base
    /// seed. Scenarios are validated up front; a malformed one rejects
    /// the whole batch before anything runs.
    pub async fn run_batch(
        &self,
        scenarios: Vec<Scenario>,
        base_seed: u64,
    ) -> Result<BatchResult, InputError> {
        let source = BuiltinTaxTables;
        let mut tasks: Vec<Box<dyn FnOnce() -> Result<RunOutput, String> + Send>> =
            Vec::with_capacity(scenarios.len());
        for (id, scenario) in scenarios.into_iter().enumerate() {
            validate_scenario(&scenario)?;
            let tables = source.table_for(scenario.start_year, &scenario.residence_state)?;
            let seed = derive_seed(base_seed, id as u64);
            tasks.push(Box::new(move || {
                run_one_with_tables(&scenario, seed, tables).map_err(|e| e.to_string())
            }));
        }

        let raw = self.run_tasks(tasks).await;
        let mut batch = BatchResult {
            tasks: Vec::with_capacity(raw.len()),
            errors: HashMap::new(),
        };
        for (id, settled) in raw.into_iter().enumerate() {
            let simulation_id = id as u64;
            match settled {
                Ok(Ok(output)) => batch.tasks.push(TaskResult {
                    simulation_id,
                    result: Some(output),
                    error: None,
                }),
                Ok(Err(message)) | Err(message) => {
                    warn!(simulation_id, %message, "simulation failed");
                    batch.errors.insert(simulation_id, message.clone());
                    batch.tasks.push(TaskResult {
                        simulation_id,
                        result: None,
                        error: Some(message),
                    });
                }
            }
        }
        info!(
            total = batch.tasks.len(),
            succeeded = batch.succeeded(),
            "batch settled"
        );
        Ok(batch)
    }

    /// Monte Carlo entry point: `count` independent draws of one scenario.
    pub async fn run_simulations(
        &self,
        scenario: &Scenario,
        count: usize,
        base_seed: u64,
    ) -> Result<BatchResult, InputError> {
        if count == 0 {
            return Err(InputError::ZeroSimulations);
        }
        let scenarios = vec![scenario.clone(); count];
        self.run_batch(scenarios, base_seed).await
    }
}
