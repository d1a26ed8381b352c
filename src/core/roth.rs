use tracing::debug;

use super::types::{FilingStatus, Investment, RothConversionPlan, TaxBracketSet, TaxStatus};

/// Convert pre-tax balances to Roth up to the top of the current federal
/// bracket. Candidates are drained in plan order; each converted amount
/// lands in an after-tax twin of the same investment type, created on
/// first use as a deemed sale (basis = transferred value). Returns the
/// total converted, which the caller adds to taxable income. Conversions
/// never incur the early-withdrawal penalty.
pub fn convert_to_roth(
    plan: &RothConversionPlan,
    year: u32,
    taxable_income: f64,
    status: FilingStatus,
    tables: &TaxBracketSet,
    investments: &mut Vec<Investment>,
) -> f64 {
    if !plan.enabled || year < plan.start_year || year > plan.end_year {
        return 0.0;
    }
    // In the top (unbounded) bracket there is no ceiling to fill up to.
    let Some(ceiling) = tables.federal_bracket_ceiling(taxable_income, status) else {
        return 0.0;
    };
    let mut room = ceiling - taxable_income.max(0.0);
    if room <= 0.0 {
        return 0.0;
    }

    let mut converted = 0.0;
    for id in &plan.strategy {
        if room <= 0.0 {
            break;
        }
        let Some(source) = investments.iter().position(|inv| inv.id == *id) else {
            continue;
        };
        if investments[source].tax_status != TaxStatus::PreTax
            || investments[source].value <= 0.0
        {
            continue;
        }

        let amount = room.min(investments[source].value);
        let fraction = amount / investments[source].value;
        investments[source].value -= amount;
        investments[source].purchase_price =
            (investments[source].purchase_price * (1.0 - fraction)).max(0.0);
        let kind = investments[source].investment_type.clone();
        let source_id = investments[source].id.clone();

        match investments.iter_mut().find(|inv| {
            inv.investment_type == kind && inv.tax_status == TaxStatus::AfterTax
        }) {
            Some(twin) => {
                twin.value += amount;
                twin.purchase_price += amount;
            }
            None => investments.push(Investment {
                id: format!("{source_id} roth"),
                investment_type: kind,
                value: amount,
                purchase_price: amount,
                tax_status: TaxStatus::AfterTax,
            }),
        }

        debug!(source = %source_id, amount, "roth conversion");
        room -= amount;
        converted += amount;
    }
    converted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tax::default_tax_table;

    fn plan(strategy: Vec<&str>) -> RothConversionPlan {
        RothConversionPlan {
            enabled: true,
            start_year: 2025,
            end_year: 2035,
            strategy: strategy.into_iter().map(String::from).collect(),
        }
    }

    fn pre_tax(id: &str, value: f64) -> Investment {
        Investment {
            id: id.to_string(),
            investment_type: "index fund".to_string(),
            value,
            purchase_price: value,
            tax_status: TaxStatus::PreTax,
        }
    }

    #[test]
    fn zero_room_converts_nothing() {
        let tables = default_tax_table(2025, "CA");
        let mut investments = vec![pre_tax("ira", 50_000.0)];
        let before = investments.clone();

        // Inside the unbounded top bracket there is no ceiling to fill.
        let converted = convert_to_roth(
            &plan(vec!["ira"]),
            2025,
            700_000.0,
            FilingStatus::Single,
            &tables,
            &mut investments,
        );

        assert_eq!(converted, 0.0);
        assert_eq!(investments, before);
    }

    #[test]
    fn converts_up_to_the_bracket_ceiling() {
        let tables = default_tax_table(2025, "CA");
        let taxable = 10_000.0;
        let ceiling = tables
            .federal_bracket_ceiling(taxable, FilingStatus::Single)
            .unwrap();
        let mut investments = vec![pre_tax("ira", 1_000_000.0)];

        let converted = convert_to_roth(
            &plan(vec!["ira"]),
            2025,
            taxable,
            FilingStatus::Single,
            &tables,
            &mut investments,
        );

        assert!((converted - (ceiling - taxable)).abs() < 1e-6);
        assert!((investments[0].value - (1_000_000.0 - converted)).abs() < 1e-6);
        let twin = investments.iter().find(|i| i.id == "ira roth").unwrap();
        assert_eq!(twin.tax_status, TaxStatus::AfterTax);
        assert!((twin.value - converted).abs() < 1e-6);
        assert!((twin.purchase_price - converted).abs() < 1e-6);
    }

    #[test]
    fn drains_candidates_in_strategy_order() {
        let tables = default_tax_table(2025, "CA");
        let taxable = 10_000.0;
        let ceiling = tables
            .federal_bracket_ceiling(taxable, FilingStatus::Single)
            .unwrap();
        let room = ceiling - taxable;
        let first_value = room / 2.0;
        let mut investments = vec![pre_tax("small", first_value), pre_tax("large", 1_000_000.0)];

        let converted = convert_to_roth(
            &plan(vec!["small", "large"]),
            2025,
            taxable,
            FilingStatus::Single,
            &tables,
            &mut investments,
        );

        assert!((converted - room).abs() < 1e-6);
        assert!(investments[0].value.abs() < 1e-6, "first candidate drained");
        assert!((investments[1].value - (1_000_000.0 - room / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn outside_window_or_disabled_is_a_no_op() {
        let tables = default_tax_table(2025, "CA");
        let mut investments = vec![pre_tax("ira", 50_000.0)];

        let mut disabled = plan(vec!["ira"]);
        disabled.enabled = false;
        assert_eq!(
            convert_to_roth(
                &disabled,
                2025,
                0.0,
                FilingStatus::Single,
                &tables,
                &mut investments
            ),
            0.0
        );
        assert_eq!(
            convert_to_roth(
                &plan(vec!["ira"]),
                2040,
                0.0,
                FilingStatus::Single,
                &tables,
                &mut investments
            ),
            0.0
        );
        assert!((investments[0].value - 50_000.0).abs() < 1e-9);
    }
}
