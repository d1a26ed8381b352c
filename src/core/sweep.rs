use serde::{Deserialize, Serialize};
use tracing::info;

use super::engine::validate_scenario;
use super::error::InputError;
use super::pool::{BatchResult, WorkerPool};
use super::sampler::derive_seed;
use super::types::{AssetAllocation, Distribution, EventPayload, EventStart, Scenario};

/// A scenario knob a sweep can turn. Event-scoped parameters name the
/// event they mutate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SweepParameter {
    RothEnabled,
    RothStartYear,
    EventStartYear { event: String },
    EventDuration { event: String },
    EventAmount { event: String },
    /// First-asset percentage of a fixed two-asset allocation; the second
    /// asset takes the remainder.
    AllocationSplit { event: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepAxis {
    pub parameter: SweepParameter,
    pub values: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepPoint {
    pub value: f64,
    pub batch: BatchResult,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepCell {
    pub x: f64,
    pub y: f64,
    pub batch: BatchResult,
}

fn event_allocation<'a>(scenario: &'a Scenario, id: &str) -> Option<&'a AssetAllocation> {
    match &scenario.event(id)?.payload {
        EventPayload::Invest(spec) => Some(&spec.allocation),
        EventPayload::Rebalance(spec) => Some(&spec.allocation),
        _ => None,
    }
}

fn validate_axis(scenario: &Scenario, axis: &SweepAxis) -> Result<(), InputError> {
    if axis.values.is_empty() {
        return Err(InputError::EmptyAxis);
    }
    match &axis.parameter {
        SweepParameter::RothEnabled | SweepParameter::RothStartYear => Ok(()),
        SweepParameter::EventStartYear { event }
        | SweepParameter::EventDuration { event }
        | SweepParameter::EventAmount { event } => {
            if scenario.event(event).is_none() {
                return Err(InputError::UnknownAxisEvent(event.clone()));
            }
            Ok(())
        }
        SweepParameter::AllocationSplit { event } => {
            match event_allocation(scenario, event) {
                Some(AssetAllocation::Fixed { targets }) if targets.len() == 2 => Ok(()),
                Some(_) => Err(InputError::AxisNotTwoAsset(event.clone())),
                None => Err(InputError::UnknownAxisEvent(event.clone())),
            }
        }
    }
}

/// Mutate a cloned scenario for one grid point. Axes are validated
/// before any run, so lookups here cannot miss.
fn apply_parameter(scenario: &mut Scenario, parameter: &SweepParameter, value: f64) {
    match parameter {
        SweepParameter::RothEnabled => {
            scenario.roth_conversion.enabled = value != 0.0;
        }
        SweepParameter::RothStartYear => {
            scenario.roth_conversion.start_year = value.round().max(0.0) as u32;
        }
        SweepParameter::EventStartYear { event } => {
            if let Some(ev) = scenario.event_series.iter_mut().find(|e| e.id == *event) {
                ev.start = EventStart::Year {
                    distribution: Distribution::Fixed { value },
                };
            }
        }
        SweepParameter::EventDuration { event } => {
            if let Some(ev) = scenario.event_series.iter_mut().find(|e| e.id == *event) {
                ev.duration = Distribution::Fixed { value };
            }
        }
        SweepParameter::EventAmount { event } => {
            if let Some(ev) = scenario.event_series.iter_mut().find(|e| e.id == *event) {
                match &mut ev.payload {
                    EventPayload::Income(spec) => spec.initial_amount = value,
                    EventPayload::Expense(spec) => spec.initial_amount = value,
                    _ => {}
                }
            }
        }
        SweepParameter::AllocationSplit { event } => {
            if let Some(ev) = scenario.event_series.iter_mut().find(|e| e.id == *event) {
                let allocation = match &mut ev.payload {
                    EventPayload::Invest(spec) => &mut spec.allocation,
                    EventPayload::Rebalance(spec) => &mut spec.allocation,
                    _ => return,
                };
                if let AssetAllocation::Fixed { targets } = allocation {
                    if targets.len() == 2 {
                        targets[0].percentage = value;
                        targets[1].percentage = 100.0 - value;
                    }
                }
            }
        }
    }
}

/// Sweep one parameter: each axis value gets a full batch of draws.
/// Grid points run sequentially; draws within a point run in parallel.
pub async fn run_sweep_1d(
    pool: &WorkerPool,
    base: &Scenario,
    axis: &SweepAxis,
    simulations: usize,
    base_seed: u64,
) -> Result<Vec<SweepPoint>, InputError> {
    if simulations == 0 {
        return Err(InputError::ZeroSimulations);
    }
    validate_scenario(base)?;
    validate_axis(base, axis)?;

    let mut points = Vec::with_capacity(axis.values.len());
    for (i, &value) in axis.values.iter().enumerate() {
        let mut scenario = base.clone();
        apply_parameter(&mut scenario, &axis.parameter, value);
        let seed = derive_seed(base_seed, i as u64);
        let batch = pool.run_simulations(&scenario, simulations, seed).await?;
        info!(value, succeeded = batch.succeeded(), "sweep point settled");
        points.push(SweepPoint { value, batch });
    }
    Ok(points)
}

/// Sweep two parameters over their cross product, row-major in the first
/// axis.
pub async fn run_sweep_2d(
    pool: &WorkerPool,
    base: &Scenario,
    axis_x: &SweepAxis,
    axis_y: &SweepAxis,
    simulations: usize,
    base_seed: u64,
) -> Result<Vec<SweepCell>, InputError> {
    if simulations == 0 {
        return Err(InputError::ZeroSimulations);
    }
    validate_scenario(base)?;
    validate_axis(base, axis_x)?;
    validate_axis(base, axis_y)?;

    let mut cells = Vec::with_capacity(axis_x.values.len() * axis_y.values.len());
    for (i, &x) in axis_x.values.iter().enumerate() {
        for (j, &y) in axis_y.values.iter().enumerate() {
            let mut scenario = base.clone();
            apply_parameter(&mut scenario, &axis_x.parameter, x);
            apply_parameter(&mut scenario, &axis_y.parameter, y);
            let seed = derive_seed(base_seed, (i * axis_y.values.len() + j) as u64);
            let batch = pool.run_simulations(&scenario, simulations, seed).await?;
            cells.push(SweepCell { x, y, batch });
        }
    }
    Ok(cells)
}
