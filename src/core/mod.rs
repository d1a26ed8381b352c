mod engine;
mod error;
mod events;
mod pool;
mod roth;
mod sampler;
mod sweep;
mod tax;
mod waterfall;

pub mod types;

pub use engine::{run_one, run_one_with_tables, validate_scenario};
pub use error::{InputError, RunError};
pub use pool::{BatchResult, TaskResult, WorkerPool};
pub use sampler::{derive_seed, rng_for_seed};
pub use sweep::{
    SweepAxis, SweepCell, SweepParameter, SweepPoint, run_sweep_1d, run_sweep_2d,
};
pub use tax::{BuiltinTaxTables, TaxTableSource, default_tax_table};
pub use types::{RunOutput, Scenario, YearlyResult};
