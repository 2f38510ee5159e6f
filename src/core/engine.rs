use tracing::debug;

use super::error::ProjectionError;
use super::tables::TaxTable;
use super::types::{Parameters, ReturnModel, YearRecord};
use super::year::solve_year;

/// Calendar years a projection may start in.
pub const START_YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2200;
/// Longest projection, in years after `start_year`.
pub const MAX_HORIZON_YEARS: i64 = 150;
/// Oldest age accepted at `start_year`.
pub const MAX_AGE_AT_START: i64 = 130;

/// Projects every year in `[start_year, end_year]`, threading each year's
/// closing balances into the next. Invalid parameters fail before any year
/// is computed.
pub fn project(params: &Parameters, table: &TaxTable) -> Result<Vec<YearRecord>, ProjectionError> {
    validate_parameters(params)?;

    let horizon = (i64::from(params.end_year) - i64::from(params.start_year) + 1).max(0) as usize;
    let mut records: Vec<YearRecord> = Vec::with_capacity(horizon);
    for _ in 0..horizon {
        let record = solve_year(params, table, &records);
        records.push(record);
    }

    debug!(
        start_year = params.start_year,
        end_year = params.end_year,
        heir_value = terminal_heir_value(&records),
        "projection complete"
    );
    Ok(records)
}

/// After-tax account passes at fair value (stepped-up basis), the IRA is
/// taxed in full at the heir's combined rate, Roth passes untaxed.
pub fn heir_value_of(params: &Parameters, at: f64, ira: f64, roth: f64) -> f64 {
    let heir_rate = (params.heir_federal_rate + params.heir_state_rate).clamp(0.0, 1.0);
    at.max(0.0) + ira.max(0.0) * (1.0 - heir_rate) + roth.max(0.0)
}

pub fn terminal_heir_value(records: &[YearRecord]) -> f64 {
    records.last().map_or(0.0, |r| r.heir_value)
}

pub fn total_unmet_need(records: &[YearRecord]) -> f64 {
    records.iter().map(|r| r.unmet_need).sum()
}

pub fn unconverged_years(records: &[YearRecord]) -> Vec<i32> {
    records
        .iter()
        .filter(|r| !r.convergence.converged)
        .map(|r| r.year)
        .collect()
}

fn check_amount(problems: &mut Vec<String>, name: &str, value: f64) {
    if !value.is_finite() || value < 0.0 {
        problems.push(format!("{name} must be a finite amount >= 0"));
    }
}

fn check_rate(problems: &mut Vec<String>, name: &str, value: f64) {
    if !value.is_finite() || value <= -1.0 {
        problems.push(format!("{name} must be > -100%"));
    }
}

fn check_fraction(problems: &mut Vec<String>, name: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        problems.push(format!("{name} must be between 0 and 1"));
    }
}

/// Collects every violated rule so callers see the whole list at once.
pub fn validate_parameters(params: &Parameters) -> Result<(), ProjectionError> {
    let mut problems = Vec::new();

    let start = i64::from(params.start_year);
    let span = i64::from(params.end_year) - start;
    let age_at_start = start - i64::from(params.birth_year);
    if !START_YEAR_RANGE.contains(&params.start_year) {
        problems.push(format!(
            "start_year must be between {} and {}",
            START_YEAR_RANGE.start(),
            START_YEAR_RANGE.end()
        ));
    }
    if span < 0 {
        problems.push("end_year must be >= start_year".to_string());
    } else if span > MAX_HORIZON_YEARS {
        problems.push(format!(
            "end_year must be within {MAX_HORIZON_YEARS} years of start_year"
        ));
    }
    if age_at_start < 0 {
        problems.push("birth_year must be <= start_year".to_string());
    } else if age_at_start > MAX_AGE_AT_START {
        problems.push(format!(
            "birth_year must be within {MAX_AGE_AT_START} years of start_year"
        ));
    }

    check_amount(&mut problems, "after_tax_start", params.after_tax_start);
    check_amount(&mut problems, "after_tax_cost_basis", params.after_tax_cost_basis);
    check_amount(&mut problems, "ira_start", params.ira_start);
    check_amount(&mut problems, "roth_start", params.roth_start);
    check_amount(&mut problems, "annual_expenses", params.annual_expenses);
    check_amount(&mut problems, "ss_monthly_benefit", params.ss_monthly_benefit);
    if params.after_tax_cost_basis > params.after_tax_start {
        problems.push("after_tax_cost_basis must be <= after_tax_start".to_string());
    }

    check_rate(&mut problems, "expense_inflation", params.expense_inflation);
    check_rate(&mut problems, "ss_cola", params.ss_cola);
    check_rate(&mut problems, "discount_rate", params.discount_rate);
    match params.returns {
        ReturnModel::Fixed {
            after_tax,
            ira,
            roth,
        } => {
            check_rate(&mut problems, "after_tax_return", after_tax);
            check_rate(&mut problems, "ira_return", ira);
            check_rate(&mut problems, "roth_return", roth);
        }
        ReturnModel::RiskBanded {
            low,
            moderate,
            high,
        } => {
            for (name, band) in [("low", low), ("moderate", moderate), ("high", high)] {
                check_amount(&mut problems, &format!("{name}_band_target"), band.target);
                check_rate(&mut problems, &format!("{name}_band_rate"), band.rate);
            }
        }
    }

    check_fraction(&mut problems, "heir_federal_rate", params.heir_federal_rate);
    check_fraction(&mut problems, "heir_state_rate", params.heir_state_rate);
    if params.heir_federal_rate + params.heir_state_rate > 1.0 {
        problems.push("heir_federal_rate + heir_state_rate must be <= 1".to_string());
    }

    for (year, amount) in &params.roth_conversions {
        if !amount.is_finite() || *amount < 0.0 {
            problems.push(format!("roth conversion for {year} must be a finite amount >= 0"));
        }
    }

    if let Some(survivor) = params.survivor {
        check_fraction(&mut problems, "survivor ss_retention", survivor.ss_retention);
        check_fraction(
            &mut problems,
            "survivor expense_retention",
            survivor.expense_retention,
        );
    }

    if !params.withdrawal_order.is_permutation() {
        problems.push("withdrawal_order must list each account exactly once".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ProjectionError::InvalidParameters(problems))
    }
}
