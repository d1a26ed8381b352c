use super::error::InputError;
use super::types::{FilingBrackets, FilingStatus, TaxBracket, TaxBracketSet};

/// Supplies the initial bracket table for a (year, state) pair. The engine
/// never re-fetches: subsequent years chain multiplicatively from the
/// prior year's table via [`TaxBracketSet::inflate`].
pub trait TaxTableSource {
    fn table_for(&self, year: u32, state: &str) -> Result<TaxBracketSet, InputError>;
}

/// Built-in federal tables with a generic flat-ish state schedule, used
/// when no external provider is wired in.
pub struct BuiltinTaxTables;

impl TaxTableSource for BuiltinTaxTables {
    fn table_for(&self, year: u32, state: &str) -> Result<TaxBracketSet, InputError> {
        Ok(default_tax_table(year, state))
    }
}

fn bracket(lower: f64, upper: Option<f64>, rate: f64) -> TaxBracket {
    TaxBracket { lower, upper, rate }
}

pub fn default_tax_table(year: u32, state: &str) -> TaxBracketSet {
    let federal_single = vec![
        bracket(0.0, Some(11_925.0), 0.10),
        bracket(11_925.0, Some(48_475.0), 0.12),
        bracket(48_475.0, Some(103_350.0), 0.22),
        bracket(103_350.0, Some(197_300.0), 0.24),
        bracket(197_300.0, Some(250_525.0), 0.32),
        bracket(250_525.0, Some(626_350.0), 0.35),
        bracket(626_350.0, None, 0.37),
    ];
    let federal_married = vec![
        bracket(0.0, Some(23_850.0), 0.10),
        bracket(23_850.0, Some(96_950.0), 0.12),
        bracket(96_950.0, Some(206_700.0), 0.22),
        bracket(206_700.0, Some(394_600.0), 0.24),
        bracket(394_600.0, Some(501_050.0), 0.32),
        bracket(501_050.0, Some(751_600.0), 0.35),
        bracket(751_600.0, None, 0.37),
    ];
    let state_single = vec![
        bracket(0.0, Some(20_000.0), 0.04),
        bracket(20_000.0, None, 0.06),
    ];
    let state_married = vec![
        bracket(0.0, Some(40_000.0), 0.04),
        bracket(40_000.0, None, 0.06),
    ];
    let gains_single = vec![
        bracket(0.0, Some(48_350.0), 0.0),
        bracket(48_350.0, Some(533_400.0), 0.15),
        bracket(533_400.0, None, 0.20),
    ];
    let gains_married = vec![
        bracket(0.0, Some(96_700.0), 0.0),
        bracket(96_700.0, Some(600_050.0), 0.15),
        bracket(600_050.0, None, 0.20),
    ];

    TaxBracketSet {
        year,
        state: state.to_string(),
        federal_income: FilingBrackets {
            single: federal_single,
            married: federal_married,
        },
        state_income: FilingBrackets {
            single: state_single,
            married: state_married,
        },
        capital_gains: FilingBrackets {
            single: gains_single,
            married: gains_married,
        },
        standard_deduction_single: 15_000.0,
        standard_deduction_married: 30_000.0,
    }
}

fn apply_brackets(brackets: &[TaxBracket], taxable: f64) -> f64 {
    let taxable = taxable.max(0.0);
    let mut tax = 0.0;
    for b in brackets {
        if taxable <= b.lower {
            break;
        }
        let top = b.upper.unwrap_or(f64::INFINITY).min(taxable);
        tax += (top - b.lower).max(0.0) * b.rate;
    }
    tax
}

fn scale_brackets(brackets: &mut [TaxBracket], factor: f64) {
    for b in brackets.iter_mut() {
        b.lower *= factor;
        if let Some(upper) = b.upper.as_mut() {
            *upper *= factor;
        }
    }
}

impl TaxBracketSet {
    pub fn federal_income_tax(&self, taxable: f64, status: FilingStatus) -> f64 {
        apply_brackets(self.federal_income.for_status(status), taxable)
    }

    pub fn state_income_tax(&self, taxable: f64, status: FilingStatus) -> f64 {
        apply_brackets(self.state_income.for_status(status), taxable)
    }

    pub fn capital_gains_tax(&self, gains: f64, status: FilingStatus) -> f64 {
        apply_brackets(self.capital_gains.for_status(status), gains)
    }

    pub fn standard_deduction(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::Single => self.standard_deduction_single,
            FilingStatus::Married => self.standard_deduction_married,
        }
    }

    /// Upper boundary of the federal bracket containing `taxable`, or None
    /// inside the unbounded top bracket (no bracket left to fill).
    pub fn federal_bracket_ceiling(&self, taxable: f64, status: FilingStatus) -> Option<f64> {
        let taxable = taxable.max(0.0);
        for b in self.federal_income.for_status(status) {
            match b.upper {
                Some(upper) if taxable < upper => return Some(upper),
                Some(_) => {}
                None => return None,
            }
        }
        None
    }

    /// Chain one simulated year of inflation: every boundary, threshold,
    /// and deduction scales by the sampled factor.
    pub fn inflate(&mut self, factor: f64) {
        self.year += 1;
        scale_brackets(&mut self.federal_income.single, factor);
        scale_brackets(&mut self.federal_income.married, factor);
        scale_brackets(&mut self.state_income.single, factor);
        scale_brackets(&mut self.state_income.married, factor);
        scale_brackets(&mut self.capital_gains.single, factor);
        scale_brackets(&mut self.capital_gains.married, factor);
        self.standard_deduction_single *= factor;
        self.standard_deduction_married *= factor;
    }
}

/// IRS uniform lifetime divisors, ages 73 and up.
const RMD_DIVISORS: &[f64] = &[
    26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2, 14.4,
    13.7, 12.9, 12.2, 11.5, 10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, 5.6, 5.2, 4.9,
    4.6, 4.3, 4.1, 3.9, 3.7, 3.5, 3.4, 3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0,
];

pub const RMD_START_AGE: u32 = 73;

pub fn rmd_divisor(age: u32) -> f64 {
    let idx = age.saturating_sub(RMD_START_AGE) as usize;
    RMD_DIVISORS[idx.min(RMD_DIVISORS.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_tax_progressively() {
        let table = default_tax_table(2025, "NY");
        // 50_000 single: 10% of 11_925 + 12% of (48_475-11_925) + 22% of (50_000-48_475)
        let expected = 11_925.0 * 0.10 + (48_475.0 - 11_925.0) * 0.12 + (50_000.0 - 48_475.0) * 0.22;
        let actual = table.federal_income_tax(50_000.0, FilingStatus::Single);
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    #[test]
    fn zero_and_negative_taxable_owe_nothing() {
        let table = default_tax_table(2025, "NY");
        assert_eq!(table.federal_income_tax(0.0, FilingStatus::Single), 0.0);
        assert_eq!(table.federal_income_tax(-500.0, FilingStatus::Married), 0.0);
    }

    #[test]
    fn inflation_scales_boundaries_and_deduction() {
        let mut table = default_tax_table(2025, "NY");
        let before = table.federal_income_tax(100_000.0, FilingStatus::Single);
        table.inflate(1.10);
        assert_eq!(table.year, 2026);
        assert!((table.standard_deduction_single - 16_500.0).abs() < 1e-9);
        // Same real income (scaled nominally) owes the scaled tax.
        let after = table.federal_income_tax(110_000.0, FilingStatus::Single);
        assert!((after - before * 1.10).abs() < 1e-6);
    }

    #[test]
    fn bracket_ceiling_tracks_current_bracket() {
        let table = default_tax_table(2025, "NY");
        assert_eq!(
            table.federal_bracket_ceiling(30_000.0, FilingStatus::Single),
            Some(48_475.0)
        );
        assert_eq!(
            table.federal_bracket_ceiling(700_000.0, FilingStatus::Single),
            None
        );
    }

    #[test]
    fn rmd_divisors_decline_with_age() {
        assert!((rmd_divisor(73) - 26.5).abs() < 1e-9);
        assert!((rmd_divisor(80) - 20.2).abs() < 1e-9);
        assert!(rmd_divisor(130) > 0.0);
        for age in 73..120 {
            assert!(rmd_divisor(age + 1) <= rmd_divisor(age));
        }
    }
}
