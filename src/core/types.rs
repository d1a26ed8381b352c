use serde::{Deserialize, Serialize};

use super::error::InputError;

/// How a sampled scalar is interpreted by its consumer. Percentage follows
/// the "100 = x1.00" convention, so a draw of 110 is a 1.10 multiplier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Amount,
    Percentage,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Distribution {
    Fixed { value: f64 },
    Normal { mean: f64, std_dev: f64 },
    Uniform { min: f64, max: f64 },
}

impl Distribution {
    pub fn validate(&self) -> Result<(), InputError> {
        match *self {
            Distribution::Fixed { .. } => Ok(()),
            Distribution::Normal { std_dev, .. } => {
                if std_dev < 0.0 {
                    Err(InputError::NegativeStdDev(std_dev))
                } else {
                    Ok(())
                }
            }
            Distribution::Uniform { min, max } => {
                if min > max {
                    Err(InputError::InvertedUniform { min, max })
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A distribution together with the interpretation of its draws.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueDistribution {
    #[serde(flatten)]
    pub distribution: Distribution,
    pub value_type: ValueType,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaxStatus {
    NonRetirement,
    PreTax,
    AfterTax,
}

/// Shared return/income profile; investments reference it by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentType {
    pub name: String,
    pub expected_annual_return: ValueDistribution,
    pub expense_ratio: f64,
    pub expected_annual_income: ValueDistribution,
    pub taxable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub id: String,
    pub investment_type: String,
    pub value: f64,
    /// Cost basis used for capital gains on partial sells.
    pub purchase_price: f64,
    pub tax_status: TaxStatus,
}

impl Investment {
    /// The designated cash holding is the one backed by the "cash"
    /// investment type.
    pub fn is_cash(&self) -> bool {
        self.investment_type.eq_ignore_ascii_case("cash")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationTarget {
    pub investment: String,
    pub percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AssetAllocation {
    Fixed {
        targets: Vec<AllocationTarget>,
    },
    GlidePath {
        initial: Vec<AllocationTarget>,
        #[serde(rename = "final")]
        final_targets: Vec<AllocationTarget>,
    },
}

impl AssetAllocation {
    pub fn investment_ids(&self) -> Vec<&str> {
        match self {
            AssetAllocation::Fixed { targets } => {
                targets.iter().map(|t| t.investment.as_str()).collect()
            }
            AssetAllocation::GlidePath {
                initial,
                final_targets,
            } => {
                let mut ids: Vec<&str> = initial.iter().map(|t| t.investment.as_str()).collect();
                for t in final_targets {
                    if !ids.contains(&t.investment.as_str()) {
                        ids.push(t.investment.as_str());
                    }
                }
                ids
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSpec {
    pub initial_amount: f64,
    pub expected_annual_change: ValueDistribution,
    pub inflation_adjusted: bool,
    pub social_security: bool,
    pub wage: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSpec {
    pub initial_amount: f64,
    pub expected_annual_change: ValueDistribution,
    pub inflation_adjusted: bool,
    pub discretionary: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestSpec {
    pub allocation: AssetAllocation,
    pub max_cash: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceSpec {
    pub allocation: AssetAllocation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum EventPayload {
    Income(IncomeSpec),
    Expense(ExpenseSpec),
    Invest(InvestSpec),
    Rebalance(RebalanceSpec),
}

/// Event start: an explicit year distribution, or a reference to another
/// event's resolved start or end. Reference chains must be acyclic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventStart {
    Year { distribution: Distribution },
    WithEvent { event: String },
    AfterEvent { event: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    pub start: EventStart,
    pub duration: Distribution,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RothConversionPlan {
    pub enabled: bool,
    pub start_year: u32,
    pub end_year: u32,
    /// Ordered pre-tax candidate investment ids.
    pub strategy: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub start_year: u32,
    pub birth_year: u32,
    pub life_expectancy: Distribution,
    #[serde(default)]
    pub spouse_birth_year: Option<u32>,
    #[serde(default)]
    pub spouse_life_expectancy: Option<Distribution>,
    pub residence_state: String,
    pub inflation: ValueDistribution,
    pub investment_types: Vec<InvestmentType>,
    pub investments: Vec<Investment>,
    pub event_series: Vec<Event>,
    /// Ordered discretionary-expense event ids.
    pub spending_strategy: Vec<String>,
    /// Ordered investment ids liquidated to cover taxes and expenses.
    pub expense_withdrawal_strategy: Vec<String>,
    /// Ordered pre-tax investment ids for required minimum distributions.
    pub rmd_strategy: Vec<String>,
    pub roth_conversion: RothConversionPlan,
    pub financial_goal: f64,
}

impl Scenario {
    pub fn is_couple(&self) -> bool {
        self.spouse_birth_year.is_some()
    }

    pub fn investment(&self, id: &str) -> Option<&Investment> {
        self.investments.iter().find(|inv| inv.id == id)
    }

    pub fn investment_type(&self, name: &str) -> Option<&InvestmentType> {
        self.investment_types.iter().find(|t| t.name == name)
    }

    pub fn event(&self, id: &str) -> Option<&Event> {
        self.event_series.iter().find(|e| e.id == id)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilingStatus {
    Single,
    Married,
}

/// One progressive bracket; an `upper` of None means unbounded.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub lower: f64,
    pub upper: Option<f64>,
    pub rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilingBrackets {
    pub single: Vec<TaxBracket>,
    pub married: Vec<TaxBracket>,
}

impl FilingBrackets {
    pub fn for_status(&self, status: FilingStatus) -> &[TaxBracket] {
        match status {
            FilingStatus::Single => &self.single,
            FilingStatus::Married => &self.married,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracketSet {
    pub year: u32,
    pub state: String,
    pub federal_income: FilingBrackets,
    pub state_income: FilingBrackets,
    pub capital_gains: FilingBrackets,
    pub standard_deduction_single: f64,
    pub standard_deduction_married: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentSnapshot {
    pub id: String,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyResult {
    pub year: u32,
    pub age: u32,
    pub investments: Vec<InvestmentSnapshot>,
    pub total_value: f64,
    pub cur_year_income: f64,
    pub cur_year_ss: f64,
    pub cur_year_gains: f64,
    pub cur_year_early_withdrawals: f64,
    pub taxes_paid: f64,
    pub expenses_paid: f64,
    pub discretionary_paid: f64,
    pub discretionary_due: f64,
    /// Whether total value met the scenario's financial goal this year.
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub years: Vec<YearlyResult>,
    /// False when a liquidation shortfall stopped the run early.
    pub success: bool,
}
