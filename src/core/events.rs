use tracing::debug;

use super::error::RunError;
use super::sampler::SimRng;
use super::types::{
    AssetAllocation, Event, EventPayload, Investment, InvestmentType, TaxStatus,
};

/// An event with its start window resolved to concrete years and its
/// income/expense amount carried forward year over year.
#[derive(Clone, Debug)]
pub struct RuntimeEvent {
    pub event: Event,
    pub start: u32,
    pub duration: u32,
    pub amount: f64,
}

impl RuntimeEvent {
    pub fn is_active(&self, year: u32) -> bool {
        year >= self.start && year < self.start + self.duration
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IncomeReceipts {
    pub income: f64,
    pub ss: f64,
}

/// Amounts owed by this year's active expense events, already updated for
/// annual change and inflation.
#[derive(Clone, Debug, Default)]
pub struct ExpensesDue {
    pub nondiscretionary: f64,
    /// (event id, amount) for discretionary expenses; paid later in
    /// spending-strategy order.
    pub discretionary: Vec<(String, f64)>,
}

fn cash_index(investments: &[Investment]) -> Option<usize> {
    investments.iter().position(|inv| inv.is_cash())
}

/// Process every active income event: roll its amount forward, accumulate
/// income totals, and deposit the proceeds into the cash investment.
pub fn process_income(
    events: &mut [RuntimeEvent],
    year: u32,
    investments: &mut [Investment],
    inflation_factor: f64,
    rng: &mut SimRng,
) -> Result<IncomeReceipts, RunError> {
    let cash = cash_index(investments).ok_or(RunError::MissingCashInvestment)?;

    let mut receipts = IncomeReceipts::default();
    for ev in events.iter_mut() {
        if !ev.is_active(year) {
            continue;
        }
        let EventPayload::Income(spec) = &ev.event.payload else {
            continue;
        };

        ev.amount = spec.expected_annual_change.apply_change(ev.amount, rng);
        if spec.inflation_adjusted {
            ev.amount *= inflation_factor;
        }

        receipts.income += ev.amount;
        if spec.social_security {
            receipts.ss += ev.amount;
        }
        investments[cash].value += ev.amount;
        debug!(event = %ev.event.id, amount = ev.amount, "income received");
    }
    Ok(receipts)
}

/// Roll every active expense event forward one year and report what is
/// due, split by discretionary flag.
pub fn update_expenses(
    events: &mut [RuntimeEvent],
    year: u32,
    inflation_factor: f64,
    rng: &mut SimRng,
) -> ExpensesDue {
    let mut due = ExpensesDue::default();
    for ev in events.iter_mut() {
        if !ev.is_active(year) {
            continue;
        }
        let EventPayload::Expense(spec) = &ev.event.payload else {
            continue;
        };

        ev.amount = spec.expected_annual_change.apply_change(ev.amount, rng);
        if spec.inflation_adjusted {
            ev.amount *= inflation_factor;
        }

        if spec.discretionary {
            due.discretionary.push((ev.event.id.clone(), ev.amount));
        } else {
            due.nondiscretionary += ev.amount;
        }
    }
    due
}

/// Grow every investment listed under an invest-type event: sampled income
/// is added first, then the sampled return applies to value plus income,
/// net of the expense ratio charged on the average holding value.
/// Returns realized taxable (non-retirement) income.
pub fn grow_investments(
    event: &RuntimeEvent,
    investments: &mut [Investment],
    types: &[InvestmentType],
    rng: &mut SimRng,
) -> Result<f64, RunError> {
    let EventPayload::Invest(spec) = &event.event.payload else {
        return Ok(0.0);
    };
    let ids = spec.allocation.investment_ids();
    if ids.is_empty() {
        return Err(RunError::EmptyAllocation(event.event.id.clone()));
    }

    let mut taxable_income = 0.0;
    for id in ids {
        let Some(inv) = investments.iter_mut().find(|inv| inv.id == id) else {
            continue;
        };
        let Some(kind) = types.iter().find(|t| t.name == inv.investment_type) else {
            continue;
        };

        let start_value = inv.value;
        let income = kind.expected_annual_income.sample_income(inv.value, rng);
        inv.value += income;
        if inv.tax_status == TaxStatus::NonRetirement && kind.taxable {
            taxable_income += income;
        }

        inv.value = kind.expected_annual_return.apply_return(inv.value, rng);
        let expenses = (start_value + inv.value) / 2.0 * kind.expense_ratio;
        inv.value = (inv.value - expenses).max(0.0);
    }
    Ok(taxable_income)
}

/// The year's target weights as (investment id, fraction) pairs. Glide
/// paths interpolate linearly over the elapsed share of the event window.
pub fn resolve_targets(event: &RuntimeEvent, allocation: &AssetAllocation, year: u32) -> Vec<(String, f64)> {
    match allocation {
        AssetAllocation::Fixed { targets } => targets
            .iter()
            .map(|t| (t.investment.clone(), t.percentage / 100.0))
            .collect(),
        AssetAllocation::GlidePath {
            initial,
            final_targets,
        } => {
            let f = if event.duration <= 1 {
                0.0
            } else {
                ((year.saturating_sub(event.start)) as f64 / (event.duration - 1) as f64)
                    .clamp(0.0, 1.0)
            };
            // Union of both lists: an asset missing from one side has
            // weight 0 there, so the blend always sums to 100.
            let mut targets: Vec<(String, f64)> = initial
                .iter()
                .map(|t| {
                    let end = final_targets
                        .iter()
                        .find(|ft| ft.investment == t.investment)
                        .map(|ft| ft.percentage)
                        .unwrap_or(0.0);
                    let pct = t.percentage * (1.0 - f) + end * f;
                    (t.investment.clone(), pct / 100.0)
                })
                .collect();
            for ft in final_targets {
                if !initial.iter().any(|t| t.investment == ft.investment) {
                    targets.push((ft.investment.clone(), ft.percentage * f / 100.0));
                }
            }
            targets
        }
    }
}

/// Sell part of a holding at market, realizing a pro-rata share of the
/// unrealized gain and reducing cost basis to keep the weighted-average
/// basis correct. Returns the realized gain (may be negative).
pub fn sell_pro_rata(inv: &mut Investment, amount: f64) -> f64 {
    if inv.value <= 0.0 || amount <= 0.0 {
        return 0.0;
    }
    let sold = amount.min(inv.value);
    let fraction = sold / inv.value;
    let basis_sold = inv.purchase_price * fraction;
    inv.value -= sold;
    inv.purchase_price = (inv.purchase_price - basis_sold).max(0.0);
    sold - basis_sold
}

fn buy(inv: &mut Investment, amount: f64) {
    inv.value += amount;
    inv.purchase_price += amount;
}

/// Apply an invest event: route cash above `max_cash` into under-weight
/// holdings proportional to target weight, or cover a cash deficit with
/// proportional sells. Returns capital gains realized on non-retirement
/// sells.
pub fn apply_invest(
    event: &RuntimeEvent,
    year: u32,
    investments: &mut [Investment],
) -> Result<f64, RunError> {
    let EventPayload::Invest(spec) = &event.event.payload else {
        return Ok(0.0);
    };
    let targets = resolve_targets(event, &spec.allocation, year);
    if targets.is_empty() {
        return Err(RunError::EmptyAllocation(event.event.id.clone()));
    }
    let Some(cash) = cash_index(investments) else {
        return Err(RunError::MissingCashInvestment);
    };

    // The cash holding never receives its own overflow.
    let targets: Vec<(String, f64)> = targets
        .into_iter()
        .filter(|(id, _)| *id != investments[cash].id)
        .collect();
    let total_target_value: f64 = targets
        .iter()
        .filter_map(|(id, _)| investments.iter().find(|inv| inv.id == *id))
        .map(|inv| inv.value)
        .sum();

    let cash_value = investments[cash].value;
    let mut realized_gains = 0.0;

    if cash_value > spec.max_cash {
        let excess = cash_value - spec.max_cash;
        let invested_total = total_target_value + excess;

        let mut under: Vec<(usize, f64)> = Vec::new();
        for (id, weight) in &targets {
            let Some(idx) = investments.iter().position(|inv| inv.id == *id) else {
                continue;
            };
            if investments[idx].value < weight * invested_total {
                under.push((idx, *weight));
            }
        }
        // Cash is debited only by what was actually bought; an allocation
        // with no non-cash destination moves nothing.
        let mut invested = 0.0;
        let weight_sum: f64 = under.iter().map(|(_, w)| w).sum();
        if weight_sum > 0.0 {
            for (idx, weight) in under {
                let amount = excess * weight / weight_sum;
                buy(&mut investments[idx], amount);
                invested += amount;
            }
        } else {
            // Everything already at or above target: spread by raw weight.
            let all_weight: f64 = targets.iter().map(|(_, w)| w).sum();
            if all_weight > 0.0 {
                for (id, weight) in &targets {
                    if let Some(inv) = investments.iter_mut().find(|inv| inv.id == *id) {
                        let amount = excess * weight / all_weight;
                        buy(inv, amount);
                        invested += amount;
                    }
                }
            }
        }
        investments[cash].value -= invested;
        debug!(event = %event.event.id, invested, "invested cash overflow");
    } else if cash_value < spec.max_cash && total_target_value > 0.0 {
        let deficit = (spec.max_cash - cash_value).min(total_target_value);
        let mut raised = 0.0;
        for (id, _) in &targets {
            let Some(inv) = investments.iter_mut().find(|inv| inv.id == *id) else {
                continue;
            };
            let share = deficit * inv.value / total_target_value;
            let before = inv.value;
            let gain = sell_pro_rata(inv, share);
            let sold = before - inv.value;
            if inv.tax_status == TaxStatus::NonRetirement {
                realized_gains += gain;
            }
            raised += sold;
        }
        investments[cash].value += raised;
        debug!(event = %event.event.id, raised, "sold holdings to refill cash");
    }

    Ok(realized_gains)
}

/// Apply a rebalance event: sell over-weight and buy under-weight holdings
/// to the year's target in one pass with zero net cash effect. Returns
/// capital gains realized on non-retirement sells.
pub fn apply_rebalance(
    event: &RuntimeEvent,
    year: u32,
    investments: &mut [Investment],
) -> Result<f64, RunError> {
    let EventPayload::Rebalance(spec) = &event.event.payload else {
        return Ok(0.0);
    };
    let targets = resolve_targets(event, &spec.allocation, year);
    if targets.is_empty() {
        return Err(RunError::EmptyAllocation(event.event.id.clone()));
    }

    let total: f64 = targets
        .iter()
        .filter_map(|(id, _)| investments.iter().find(|inv| inv.id == *id))
        .map(|inv| inv.value)
        .sum();
    if total <= 0.0 {
        return Ok(0.0);
    }

    let mut realized_gains = 0.0;
    for (id, weight) in &targets {
        let Some(inv) = investments.iter_mut().find(|inv| inv.id == *id) else {
            continue;
        };
        let desired = weight * total;
        if inv.value > desired {
            let gain = sell_pro_rata(inv, inv.value - desired);
            if inv.tax_status == TaxStatus::NonRetirement {
                realized_gains += gain;
            }
        } else if inv.value < desired {
            buy(inv, desired - inv.value);
        }
    }
    Ok(realized_gains)
}
