use tracing::debug;

use super::events::sell_pro_rata;
use super::tax::{RMD_START_AGE, rmd_divisor};
use super::types::{FilingStatus, Investment, TaxBracketSet, TaxStatus};

/// Fraction of social-security income exempt from income tax.
const SS_EXEMPT_FRACTION: f64 = 0.15;

/// Tax-relevant side effects of forced liquidations, applied by the
/// caller to the year's running totals.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WaterfallDeltas {
    pub early_withdrawals: f64,
    pub gains: f64,
    pub income: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaterfallResult {
    pub deltas: WaterfallDeltas,
    pub taxes_paid: f64,
    pub expenses_paid: f64,
    /// Amount still owed after the withdrawal strategy was exhausted.
    pub shortfall: Option<f64>,
}

fn cash_index(investments: &[Investment]) -> Option<usize> {
    investments.iter().position(|inv| inv.is_cash())
}

/// Raise `required` by draining cash, then liquidating the withdrawal
/// strategy in order. Retirement-account sells before the RMD age accrue
/// as early withdrawals; pre-tax sells count as ordinary income and
/// taxable-account or Roth sells realize gains above basis. Returns the
/// amount actually raised.
fn raise_funds(
    required: f64,
    age: u32,
    strategy: &[String],
    investments: &mut [Investment],
    deltas: &mut WaterfallDeltas,
) -> f64 {
    let mut raised = 0.0;
    if let Some(cash) = cash_index(investments) {
        let from_cash = required.min(investments[cash].value.max(0.0));
        investments[cash].value -= from_cash;
        raised += from_cash;
    }

    for id in strategy {
        if raised >= required {
            break;
        }
        let Some(inv) = investments.iter_mut().find(|inv| inv.id == *id) else {
            continue;
        };
        if inv.is_cash() || inv.value <= 0.0 {
            continue;
        }
        let want = required - raised;
        let before = inv.value;
        let gain = sell_pro_rata(inv, want);
        let sold = before - inv.value;
        if sold <= 0.0 {
            continue;
        }

        match inv.tax_status {
            TaxStatus::NonRetirement => deltas.gains += gain,
            TaxStatus::PreTax => {
                deltas.income += sold;
                if age < RMD_START_AGE {
                    deltas.early_withdrawals += sold;
                }
            }
            TaxStatus::AfterTax => {
                deltas.gains += gain.max(0.0);
                if age < RMD_START_AGE {
                    deltas.early_withdrawals += sold;
                }
            }
        }
        debug!(investment = %inv.id, sold, "liquidated to cover outflow");
        raised += sold;
    }
    raised
}

/// Compute the year's tax bill, add due non-discretionary expenses, and
/// pay the total from cash and then the withdrawal strategy. Income tax
/// treats the exempt fraction of social security as a subtraction; gains
/// are taxed under the capital-gains brackets.
pub fn pay_taxes_and_expenses(
    income: f64,
    ss: f64,
    gains: f64,
    expenses_due: f64,
    age: u32,
    status: FilingStatus,
    tables: &TaxBracketSet,
    withdrawal_strategy: &[String],
    investments: &mut [Investment],
) -> WaterfallResult {
    let federal_taxable = income - SS_EXEMPT_FRACTION * ss - tables.standard_deduction(status);
    let state_taxable = income - SS_EXEMPT_FRACTION * ss;
    let taxes = tables.federal_income_tax(federal_taxable, status)
        + tables.state_income_tax(state_taxable, status)
        + tables.capital_gains_tax(gains, status);
    let required = taxes + expenses_due;

    let mut deltas = WaterfallDeltas::default();
    let raised = raise_funds(required, age, withdrawal_strategy, investments, &mut deltas);

    let shortfall = required - raised;
    WaterfallResult {
        deltas,
        taxes_paid: taxes.min(raised),
        expenses_paid: (raised - taxes).max(0.0),
        shortfall: (shortfall > 1e-9).then_some(shortfall),
    }
}

/// Withdraw the year's required minimum distribution, sized by the prior
/// year-end pre-tax total over the age divisor. Funds move from pre-tax
/// holdings (in strategy order) into a taxable twin of the same
/// investment type, created on first use. Returns the distributed total,
/// which is ordinary income to the caller.
pub fn apply_rmd(
    strategy: &[String],
    age: u32,
    prior_pre_tax_total: f64,
    investments: &mut Vec<Investment>,
) -> f64 {
    if age < RMD_START_AGE || prior_pre_tax_total <= 0.0 {
        return 0.0;
    }
    let mut remaining = prior_pre_tax_total / rmd_divisor(age);
    let mut distributed = 0.0;

    for id in strategy {
        if remaining <= 0.0 {
            break;
        }
        let Some(source) = investments.iter().position(|inv| inv.id == *id) else {
            continue;
        };
        if investments[source].tax_status != TaxStatus::PreTax || investments[source].value <= 0.0 {
            continue;
        }

        let amount = remaining.min(investments[source].value);
        let fraction = amount / investments[source].value;
        investments[source].value -= amount;
        investments[source].purchase_price =
            (investments[source].purchase_price * (1.0 - fraction)).max(0.0);
        let kind = investments[source].investment_type.clone();
        let source_id = investments[source].id.clone();

        match investments.iter_mut().find(|inv| {
            inv.investment_type == kind && inv.tax_status == TaxStatus::NonRetirement
        }) {
            Some(twin) => {
                twin.value += amount;
                twin.purchase_price += amount;
            }
            None => investments.push(Investment {
                id: format!("{source_id} rmd"),
                investment_type: kind,
                value: amount,
                purchase_price: amount,
                tax_status: TaxStatus::NonRetirement,
            }),
        }

        debug!(source = %source_id, amount, "required minimum distribution");
        remaining -= amount;
        distributed += amount;
    }
    distributed
}

/// Pay discretionary expenses in spending-strategy order, but only while
/// total assets net of the payment stay at or above the financial goal.
/// Partially affordable items are skipped entirely. Payments draw on
/// cash then the withdrawal strategy without accruing tax effects.
pub fn pay_discretionary(
    due: &[(String, f64)],
    spending_strategy: &[String],
    financial_goal: f64,
    age: u32,
    withdrawal_strategy: &[String],
    investments: &mut [Investment],
) -> f64 {
    let mut paid = 0.0;
    for id in spending_strategy {
        let Some((_, amount)) = due.iter().find(|(event, _)| event == id) else {
            continue;
        };
        let amount = *amount;
        if amount <= 0.0 {
            continue;
        }
        let total: f64 = investments.iter().map(|inv| inv.value).sum();
        if total - amount < financial_goal {
            continue;
        }
        // Affordability is checked before anything is sold; a skipped item
        // must leave every holding untouched.
        let liquid = cash_index(investments)
            .map(|i| investments[i].value.max(0.0))
            .unwrap_or(0.0)
            + withdrawal_strategy
                .iter()
                .filter_map(|wid| investments.iter().find(|inv| inv.id == *wid))
                .filter(|inv| !inv.is_cash())
                .map(|inv| inv.value.max(0.0))
                .sum::<f64>();
        if liquid + 1e-9 < amount {
            continue;
        }
        let mut discard = WaterfallDeltas::default();
        raise_funds(amount, age, withdrawal_strategy, investments, &mut discard);
        debug!(event = %id, amount, "discretionary expense paid");
        paid += amount;
    }
    paid
}
