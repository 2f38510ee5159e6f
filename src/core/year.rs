//! One projected year: withdrawals and taxes resolved together by a bounded
//! fixed-point iteration, then balances rolled forward.

use tracing::{debug, warn};

use super::engine::heir_value_of;
use super::tables::{TaxTable, YearSchedule};
use super::tax::{
    federal_ordinary_tax, irmaa, ltcg_tax, niit, state_tax, taxable_social_security,
};
use super::types::{
    AccountKind, Convergence, FilingStatus, Parameters, ReturnModel, RiskBand, WithdrawalOrder,
    YearContext, YearRecord,
};

/// A pass whose tax total moves by less than this has converged.
pub const CONVERGENCE_THRESHOLD: f64 = 100.0;
/// Pass cap; reaching it keeps the last estimate and flags the year.
pub const MAX_TAX_PASSES: u32 = 10;
pub const MEDICARE_AGE: u32 = 65;

#[derive(Debug, Clone, Copy)]
struct OpeningBalances {
    at: f64,
    ira: f64,
    roth: f64,
    basis: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Allocation {
    at: f64,
    ira: f64,
    roth: f64,
    unmet: f64,
}

impl Allocation {
    fn total(self) -> f64 {
        self.at + self.ira + self.roth
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct IncomeBreakdown {
    capital_gains: f64,
    ordinary: f64,
    taxable_social_security: f64,
    taxable_ordinary: f64,
    /// Gains left taxable once any deduction unused by ordinary income is
    /// applied to them.
    taxable_gains: f64,
    magi: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TaxBreakdown {
    federal: f64,
    ltcg: f64,
    niit: f64,
    state: f64,
}

impl TaxBreakdown {
    fn total(self) -> f64 {
        self.federal + self.ltcg + self.niit + self.state
    }

    fn after_tax_account(self) -> f64 {
        self.ltcg + self.niit + self.state
    }
}

#[derive(Debug, Clone, Copy)]
struct PassOutcome {
    need: f64,
    allocation: Allocation,
    income: IncomeBreakdown,
    taxes: TaxBreakdown,
}

/// Inputs that stay fixed across the passes of one year.
struct YearSetup<'a> {
    opening: OpeningBalances,
    expenses: f64,
    social_security: f64,
    rmd_required: f64,
    roth_conversion: f64,
    order: WithdrawalOrder,
    schedule: &'a YearSchedule,
}

/// Produces the record for the year following `history`. The first year
/// starts from the parameters' opening balances.
pub fn solve_year(params: &Parameters, table: &TaxTable, history: &[YearRecord]) -> YearRecord {
    let year_index = history.len() as u32;
    let year = params.start_year + year_index as i32;
    let age = (year - params.birth_year).max(0) as u32;
    let context = year_context(params, year);
    let prior = history.last();

    let opening = OpeningBalances {
        at: prior.map_or(params.after_tax_start, |r| r.at_eoy),
        ira: prior.map_or(params.ira_start, |r| r.ira_eoy),
        roth: prior.map_or(params.roth_start, |r| r.roth_eoy),
        basis: prior.map_or(
            params.after_tax_cost_basis.min(params.after_tax_start),
            |r| r.basis_eoy,
        ),
    };
    let total_boy = opening.at + opening.ira + opening.roth;

    let expenses = current_expenses(params, year, year_index);
    let social_security = current_social_security(params, year, year_index, age);

    let rmd_factor = table.rmd_divisor(age);
    let rmd_required = match rmd_factor {
        Some(divisor) if opening.ira > 0.0 && divisor > 0.0 => opening.ira / divisor,
        _ => 0.0,
    };
    let requested_conversion = params
        .roth_conversions
        .get(&year)
        .copied()
        .unwrap_or(0.0)
        .max(0.0);
    let roth_conversion = requested_conversion.min((opening.ira - rmd_required).max(0.0));

    let schedule = table.year_schedule(year, context.filing_status);
    let setup = YearSetup {
        opening,
        expenses,
        social_security,
        rmd_required,
        roth_conversion,
        order: params.withdrawal_order,
        schedule: &schedule,
    };

    let (outcome, convergence) = resolve_taxes(&setup, params.iterative_tax, year);

    let irmaa_magi = if age >= MEDICARE_AGE && history.len() >= 2 {
        Some(history[history.len() - 2].magi)
    } else {
        None
    };
    let charge = irmaa(irmaa_magi, &schedule.irmaa);
    let persons = context.medicare_persons as f64;
    let (irmaa_part_b, irmaa_part_d) = if age >= MEDICARE_AGE {
        (
            charge.part_b_monthly * 12.0 * persons,
            charge.part_d_monthly * 12.0 * persons,
        )
    } else {
        (0.0, 0.0)
    };
    let irmaa_total = irmaa_part_b + irmaa_part_d;

    let allocation = outcome.allocation;
    let reinvested_surplus = (allocation.total() - outcome.need).max(0.0);
    let (at_return_rate, ira_return_rate, roth_return_rate) =
        return_rates(&params.returns, total_boy);

    let at_eoy =
        ((opening.at - allocation.at).max(0.0) + reinvested_surplus) * (1.0 + at_return_rate);
    let ira_eoy =
        (opening.ira - allocation.ira - roth_conversion).max(0.0) * (1.0 + ira_return_rate);
    let roth_eoy =
        (opening.roth - allocation.roth + roth_conversion).max(0.0) * (1.0 + roth_return_rate);
    let withdrawn_fraction = if opening.at > 0.0 {
        (allocation.at / opening.at).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let basis_eoy = (opening.basis * (1.0 - withdrawn_fraction)).max(0.0) + reinvested_surplus;
    let total_eoy = at_eoy + ira_eoy + roth_eoy;

    let taxes = outcome.taxes;
    let total_tax = taxes.total();
    let after_tax_account_tax = taxes.after_tax_account();
    let cumulative_tax = prior.map_or(0.0, |r| r.cumulative_tax) + total_tax;
    let cumulative_irmaa = prior.map_or(0.0, |r| r.cumulative_irmaa) + irmaa_total;
    let cumulative_expenses = prior.map_or(0.0, |r| r.cumulative_expenses) + expenses;
    let cumulative_after_tax_tax =
        prior.map_or(0.0, |r| r.cumulative_after_tax_tax) + after_tax_account_tax;

    let heir_value = heir_value_of(params, at_eoy, ira_eoy, roth_eoy);

    let discount = (1.0 + params.discount_rate).powi(year_index as i32);
    let pv = |amount: f64| if discount > 0.0 { amount / discount } else { amount };
    let pv_total_tax = pv(total_tax);
    let pv_irmaa = pv(irmaa_total);
    let pv_expenses = pv(expenses);

    if allocation.unmet > 0.0 {
        warn!(year, unmet = allocation.unmet, "withdrawal need not fully met");
    }
    debug!(
        year,
        passes = convergence.passes,
        total_tax,
        total_withdrawal = allocation.total(),
        unmet_need = allocation.unmet,
        "projected year"
    );

    YearRecord {
        year,
        age,
        year_index,
        context,
        at_boy: opening.at,
        ira_boy: opening.ira,
        roth_boy: opening.roth,
        total_boy,
        basis_boy: opening.basis,
        expenses,
        social_security,
        roth_conversion,
        rmd_factor,
        rmd_required,
        withdrawal_need: outcome.need,
        at_withdrawal: allocation.at,
        ira_withdrawal: allocation.ira,
        roth_withdrawal: allocation.roth,
        total_withdrawal: allocation.total(),
        unmet_need: allocation.unmet,
        capital_gains: outcome.income.capital_gains,
        ordinary_income: outcome.income.ordinary,
        taxable_social_security: outcome.income.taxable_social_security,
        taxable_ordinary: outcome.income.taxable_ordinary,
        magi: outcome.income.magi,
        federal_tax: taxes.federal,
        ltcg_tax: taxes.ltcg,
        niit: taxes.niit,
        state_tax: taxes.state,
        total_tax,
        after_tax_account_tax,
        irmaa_magi,
        irmaa_part_b,
        irmaa_part_d,
        irmaa_total,
        at_return_rate,
        ira_return_rate,
        roth_return_rate,
        reinvested_surplus,
        at_eoy,
        ira_eoy,
        roth_eoy,
        total_eoy,
        basis_eoy,
        cumulative_tax,
        cumulative_irmaa,
        cumulative_expenses,
        cumulative_after_tax_tax,
        heir_value,
        pv_total_eoy: pv(total_eoy),
        pv_total_tax,
        pv_irmaa,
        pv_expenses,
        pv_heir_value: pv(heir_value),
        pv_cumulative_tax: prior.map_or(0.0, |r| r.pv_cumulative_tax) + pv_total_tax,
        pv_total_withdrawal: pv(allocation.total()),
        pv_federal_tax: pv(taxes.federal),
        pv_ltcg_tax: pv(taxes.ltcg),
        pv_niit: pv(taxes.niit),
        pv_state_tax: pv(taxes.state),
        pv_cumulative_irmaa: prior.map_or(0.0, |r| r.pv_cumulative_irmaa) + pv_irmaa,
        pv_cumulative_expenses: prior.map_or(0.0, |r| r.pv_cumulative_expenses) + pv_expenses,
        convergence,
    }
}

fn year_context(params: &Parameters, year: i32) -> YearContext {
    let survivor_active = params.survivor.is_some_and(|s| year >= s.year);
    // The year of death still files jointly.
    let filing_status = match params.survivor {
        Some(s) if year > s.year => FilingStatus::Single,
        _ => params.filing_status,
    };
    let medicare_persons = match (params.filing_status, survivor_active) {
        (FilingStatus::MarriedJoint, false) => 2,
        _ => 1,
    };

    YearContext {
        filing_status,
        survivor_active,
        medicare_persons,
        iterative_tax: params.iterative_tax,
        banded_returns: matches!(params.returns, ReturnModel::RiskBanded { .. }),
        withdrawal_order: params.withdrawal_order,
    }
}

fn current_expenses(params: &Parameters, year: i32, year_index: u32) -> f64 {
    let inflated =
        params.annual_expenses * (1.0 + params.expense_inflation).powi(year_index as i32);
    let retention = match params.survivor {
        Some(s) if year >= s.year => s.expense_retention,
        _ => 1.0,
    };
    (inflated * retention).max(0.0)
}

fn current_social_security(params: &Parameters, year: i32, year_index: u32, age: u32) -> f64 {
    if age < params.ss_start_age {
        return 0.0;
    }
    let annual = params.ss_monthly_benefit * 12.0 * (1.0 + params.ss_cola).powi(year_index as i32);
    let retention = match params.survivor {
        Some(s) if year >= s.year => s.ss_retention,
        _ => 1.0,
    };
    (annual * retention).max(0.0)
}

/// Runs withdrawal/tax passes until the tax estimate settles. Single-pass mode
/// funds no tax from the withdrawal and reports the first pass as final.
fn resolve_taxes(setup: &YearSetup<'_>, iterative: bool, year: i32) -> (PassOutcome, Convergence) {
    let mut estimate = 0.0;
    let mut estimates = Vec::with_capacity(MAX_TAX_PASSES as usize);
    let mut converged = false;

    let outcome = loop {
        let pass = run_pass(setup, estimate);
        let computed = pass.taxes.total();
        estimates.push(computed);

        if !iterative {
            converged = true;
            break pass;
        }

        let delta = (computed - estimate).abs();
        estimate = computed;
        if delta < CONVERGENCE_THRESHOLD {
            converged = true;
            break pass;
        }
        if estimates.len() as u32 >= MAX_TAX_PASSES {
            warn!(
                year,
                passes = MAX_TAX_PASSES,
                last_delta = delta,
                "tax estimate did not converge; using last estimate"
            );
            break pass;
        }
    };

    let convergence = Convergence {
        passes: estimates.len() as u32,
        converged,
        estimates,
    };
    (outcome, convergence)
}

fn run_pass(setup: &YearSetup<'_>, tax_estimate: f64) -> PassOutcome {
    let need = (setup.expenses + tax_estimate - setup.social_security).max(0.0);
    let allocation = allocate_withdrawals(
        need,
        setup.rmd_required,
        setup.roth_conversion,
        setup.opening,
        setup.order,
    );
    let income = income_for(setup, allocation);
    let taxes = taxes_for(setup.schedule, income);
    PassOutcome {
        need,
        allocation,
        income,
        taxes,
    }
}

/// The RMD leaves the IRA first; the rest of the need walks `order`, each
/// account giving at most what it holds. Whatever no account can cover is
/// reported as unmet rather than borrowed.
fn allocate_withdrawals(
    need: f64,
    rmd_required: f64,
    roth_conversion: f64,
    opening: OpeningBalances,
    order: WithdrawalOrder,
) -> Allocation {
    let ira_available = (opening.ira - roth_conversion).max(0.0);
    let mut allocation = Allocation {
        ira: rmd_required.min(ira_available),
        ..Allocation::default()
    };
    let mut remaining = (need - allocation.ira).max(0.0);

    for kind in order.0 {
        if remaining <= 0.0 {
            break;
        }
        let (taken, balance) = match kind {
            AccountKind::AfterTax => (&mut allocation.at, opening.at),
            AccountKind::Ira => (&mut allocation.ira, ira_available),
            AccountKind::Roth => (&mut allocation.roth, opening.roth),
        };
        let take = remaining.min((balance - *taken).max(0.0));
        *taken += take;
        remaining -= take;
    }

    allocation.unmet = remaining.max(0.0);
    allocation
}

fn income_for(setup: &YearSetup<'_>, allocation: Allocation) -> IncomeBreakdown {
    let opening = setup.opening;
    let gain_fraction = if opening.at > 0.0 {
        ((opening.at - opening.basis) / opening.at).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let capital_gains = allocation.at * gain_fraction;
    let ordinary = allocation.ira + setup.roth_conversion;
    let taxable_social_security = taxable_social_security(
        setup.social_security,
        ordinary + capital_gains,
        setup.schedule.ss_thresholds,
    );
    let deduction = setup.schedule.standard_deduction;
    let taxable_ordinary = (ordinary + taxable_social_security - deduction).max(0.0);
    let taxable_income = (ordinary + taxable_social_security + capital_gains - deduction).max(0.0);
    let taxable_gains = capital_gains.min(taxable_income);

    IncomeBreakdown {
        capital_gains,
        ordinary,
        taxable_social_security,
        taxable_ordinary,
        taxable_gains,
        magi: ordinary + taxable_social_security + capital_gains,
    }
}

fn taxes_for(schedule: &YearSchedule, income: IncomeBreakdown) -> TaxBreakdown {
    TaxBreakdown {
        federal: federal_ordinary_tax(income.taxable_ordinary, &schedule.federal),
        ltcg: ltcg_tax(income.taxable_ordinary, income.taxable_gains, &schedule.ltcg),
        niit: niit(income.magi, income.capital_gains, schedule.niit_threshold),
        state: state_tax(income.capital_gains, schedule.state_rate),
    }
}

fn return_rates(model: &ReturnModel, total_boy: f64) -> (f64, f64, f64) {
    match *model {
        ReturnModel::Fixed {
            after_tax,
            ira,
            roth,
        } => (after_tax, ira, roth),
        ReturnModel::RiskBanded {
            low,
            moderate,
            high,
        } => {
            let rate = banded_rate(total_boy, [low, moderate, high]);
            (rate, rate, rate)
        }
    }
}

fn banded_rate(total: f64, bands: [RiskBand; 3]) -> f64 {
    let high_rate = bands[2].rate;
    if total <= 0.0 {
        return bands[0].rate;
    }

    let target_sum: f64 = bands.iter().map(|b| b.target.max(0.0)).sum();
    if target_sum <= 0.0 {
        return high_rate;
    }

    let mut left = total;
    let mut weighted = 0.0;
    for band in bands {
        let filled = left.min(band.target.max(0.0));
        weighted += filled * band.rate;
        left -= filled;
    }
    if left > 0.0 {
        for band in bands {
            weighted += left * (band.target.max(0.0) / target_sum) * band.rate;
        }
    }
    weighted / total
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::types::SurvivorEvent;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn flat_table() -> TaxTable {
        TaxTable::federal_default().with_inflation_rate(0.0)
    }

    fn sample_params() -> Parameters {
        Parameters {
            start_year: 2026,
            end_year: 2026,
            birth_year: 1960,
            filing_status: FilingStatus::MarriedJoint,
            after_tax_start: 0.0,
            after_tax_cost_basis: 0.0,
            ira_start: 0.0,
            roth_start: 0.0,
            annual_expenses: 0.0,
            expense_inflation: 0.0,
            ss_monthly_benefit: 0.0,
            ss_cola: 0.0,
            ss_start_age: 67,
            returns: ReturnModel::Fixed {
                after_tax: 0.0,
                ira: 0.0,
                roth: 0.0,
            },
            discount_rate: 0.0,
            heir_federal_rate: 0.24,
            heir_state_rate: 0.0,
            roth_conversions: BTreeMap::new(),
            survivor: None,
            withdrawal_order: WithdrawalOrder::default(),
            iterative_tax: true,
        }
    }

    #[test]
    fn rmd_only_year_withdraws_exactly_the_rmd() {
        let mut params = sample_params();
        params.birth_year = 1953;
        params.ira_start = 1_000_000.0;

        let record = solve_year(&params, &flat_table(), &[]);
        assert_eq!(record.age, 73);
        assert_eq!(record.rmd_factor, Some(26.5));
        assert_approx(record.ira_withdrawal, 1_000_000.0 / 26.5);
        assert_approx(record.at_withdrawal, 0.0);
        assert_approx(record.roth_withdrawal, 0.0);
        assert!(record.convergence.converged);
    }

    #[test]
    fn rmd_surplus_is_reinvested_into_after_tax_account() {
        let mut params = sample_params();
        params.birth_year = 1953;
        params.ira_start = 1_000_000.0;

        let record = solve_year(&params, &flat_table(), &[]);
        let surplus = record.ira_withdrawal - record.withdrawal_need;
        assert!(surplus > 0.0);
        assert_approx(record.reinvested_surplus, surplus);
        assert_approx(record.at_eoy, surplus);
        assert_approx(record.basis_eoy, surplus);
        assert_approx(record.ira_eoy, 1_000_000.0 - record.ira_withdrawal);
    }

    #[test]
    fn withdrawals_follow_after_tax_then_ira_then_roth() {
        let mut params = sample_params();
        params.after_tax_start = 10_000.0;
        params.after_tax_cost_basis = 10_000.0;
        params.ira_start = 20_000.0;
        params.roth_start = 100_000.0;
        params.annual_expenses = 50_000.0;
        params.iterative_tax = false;

        let record = solve_year(&params, &flat_table(), &[]);
        assert_approx(record.at_withdrawal, 10_000.0);
        assert_approx(record.ira_withdrawal, 20_000.0);
        assert_approx(record.roth_withdrawal, 20_000.0);
        assert_approx(record.unmet_need, 0.0);
    }

    #[test]
    fn configurable_order_draws_roth_first() {
        let mut params = sample_params();
        params.after_tax_start = 100_000.0;
        params.after_tax_cost_basis = 100_000.0;
        params.roth_start = 30_000.0;
        params.annual_expenses = 50_000.0;
        params.withdrawal_order =
            WithdrawalOrder([AccountKind::Roth, AccountKind::AfterTax, AccountKind::Ira]);

        let record = solve_year(&params, &flat_table(), &[]);
        assert_approx(record.roth_withdrawal, 30_000.0);
        assert_approx(record.at_withdrawal, 20_000.0);
        assert_approx(record.ira_withdrawal, 0.0);
    }

    #[test]
    fn shortfall_is_reported_as_unmet_need() {
        let mut params = sample_params();
        params.after_tax_start = 5_000.0;
        params.after_tax_cost_basis = 5_000.0;
        params.roth_start = 5_000.0;
        params.annual_expenses = 30_000.0;

        let record = solve_year(&params, &flat_table(), &[]);
        assert_approx(record.total_withdrawal, 10_000.0);
        assert_approx(record.unmet_need, 20_000.0);
        assert_approx(record.at_eoy, 0.0);
        assert_approx(record.roth_eoy, 0.0);
    }

    #[test]
    fn zero_balances_and_zero_expenses_yield_zeros() {
        let params = sample_params();
        let record = solve_year(&params, &flat_table(), &[]);
        assert_approx(record.total_boy, 0.0);
        assert_approx(record.total_withdrawal, 0.0);
        assert_approx(record.total_tax, 0.0);
        assert_approx(record.capital_gains, 0.0);
        assert_approx(record.heir_value, 0.0);
        assert_eq!(record.convergence.passes, 1);
    }

    #[test]
    fn capital_gains_follow_unrealized_gain_fraction() {
        let mut params = sample_params();
        params.after_tax_start = 100_000.0;
        params.after_tax_cost_basis = 40_000.0;
        params.annual_expenses = 10_000.0;
        params.iterative_tax = false;

        let record = solve_year(&params, &flat_table(), &[]);
        assert_approx(record.capital_gains, 6_000.0);
        // Basis shrinks by the withdrawn fraction (10%).
        assert_approx(record.basis_eoy, 36_000.0);
        assert_approx(record.at_eoy, 90_000.0);
    }

    #[test]
    fn unused_deduction_shelters_capital_gains() {
        let mut params = sample_params();
        params.after_tax_start = 200_000.0;
        params.after_tax_cost_basis = 0.0;
        params.annual_expenses = 150_000.0;
        params.iterative_tax = false;

        let record = solve_year(&params, &flat_table(), &[]);
        assert_approx(record.capital_gains, 150_000.0);
        assert_approx(record.taxable_ordinary, 0.0);
        // 120k taxable gains: 96.7k at 0%, the remaining 23.3k at 15%.
        assert_approx(record.ltcg_tax, 3_495.0);
    }

    #[test]
    fn iterative_mode_grosses_up_withdrawal_for_tax() {
        let mut params = sample_params();
        params.ira_start = 500_000.0;
        params.annual_expenses = 80_000.0;

        let record = solve_year(&params, &flat_table(), &[]);
        assert!(record.convergence.converged);
        assert!(record.convergence.passes > 1);
        assert!(record.total_tax > 0.0);
        // Withdrawal covers expenses plus the funded estimate, which sits
        // within the convergence threshold of the final tax.
        assert_approx(record.withdrawal_need, record.ira_withdrawal);
        assert_approx_tol(
            record.ira_withdrawal,
            80_000.0 + record.total_tax,
            CONVERGENCE_THRESHOLD,
        );
    }

    #[test]
    fn single_pass_mode_reports_first_pass_taxes() {
        let mut params = sample_params();
        params.ira_start = 500_000.0;
        params.annual_expenses = 80_000.0;

        let converged = solve_year(&params, &flat_table(), &[]);
        params.iterative_tax = false;
        let single = solve_year(&params, &flat_table(), &[]);

        assert_eq!(single.convergence.passes, 1);
        assert_approx(single.total_tax, converged.convergence.estimates[0]);
        assert_approx(single.ira_withdrawal, 80_000.0);
        assert!(converged.total_tax - single.total_tax > 0.0);
    }

    #[test]
    fn estimate_deltas_shrink_until_converged() {
        let mut params = sample_params();
        params.ira_start = 2_000_000.0;
        params.annual_expenses = 300_000.0;

        let record = solve_year(&params, &flat_table(), &[]);
        let mut previous = 0.0;
        let mut last_delta = f64::INFINITY;
        for estimate in &record.convergence.estimates {
            let delta = (estimate - previous).abs();
            assert!(delta <= last_delta + 1e-6);
            last_delta = delta;
            previous = *estimate;
        }
        assert!(last_delta < CONVERGENCE_THRESHOLD);
    }

    #[test]
    fn roth_conversion_is_ordinary_income_and_capped_by_rmd() {
        let mut params = sample_params();
        params.birth_year = 1953;
        params.ira_start = 100_000.0;
        params.roth_conversions.insert(2026, 1_000_000.0);

        let record = solve_year(&params, &flat_table(), &[]);
        let rmd = 100_000.0 / 26.5;
        assert_approx(record.rmd_required, rmd);
        assert_approx(record.roth_conversion, 100_000.0 - rmd);
        assert_approx(record.ordinary_income, record.ira_withdrawal + record.roth_conversion);
        assert_approx(record.roth_eoy, 100_000.0 - rmd);
        assert_approx(record.ira_eoy, 0.0);
    }

    #[test]
    fn social_security_starts_at_configured_age_and_compounds_cola() {
        let mut params = sample_params();
        params.birth_year = 1959;
        params.ss_monthly_benefit = 2_000.0;
        params.ss_cola = 0.02;
        params.ss_start_age = 67;

        let first = solve_year(&params, &flat_table(), &[]);
        assert_eq!(first.age, 67);
        assert_approx(first.social_security, 24_000.0);

        params.ss_start_age = 68;
        let deferred = solve_year(&params, &flat_table(), &[]);
        assert_approx(deferred.social_security, 0.0);

        params.ss_start_age = 67;
        params.end_year = 2027;
        let second = solve_year(&params, &flat_table(), &[first]);
        assert_approx(second.social_security, 24_000.0 * 1.02);
    }

    #[test]
    fn survivor_year_applies_retention_and_files_single_afterwards() {
        let mut params = sample_params();
        params.end_year = 2028;
        params.annual_expenses = 10_000.0;
        params.roth_start = 1_000_000.0;
        params.survivor = Some(SurvivorEvent {
            year: 2027,
            ss_retention: 0.6,
            expense_retention: 0.7,
        });

        let table = flat_table();
        let mut history = Vec::new();
        for _ in 0..3 {
            let record = solve_year(&params, &table, &history);
            history.push(record);
        }

        assert!(!history[0].context.survivor_active);
        assert_approx(history[0].expenses, 10_000.0);
        assert!(history[1].context.survivor_active);
        assert_eq!(history[1].context.filing_status, FilingStatus::MarriedJoint);
        assert_approx(history[1].expenses, 7_000.0);
        assert_eq!(history[2].context.filing_status, FilingStatus::Single);
        assert_eq!(history[2].context.medicare_persons, 1);
    }

    #[test]
    fn irmaa_reads_magi_from_two_years_earlier() {
        let mut params = sample_params();
        params.birth_year = 1958;
        params.end_year = 2028;
        params.ira_start = 2_000_000.0;
        params.annual_expenses = 10_000.0;
        params.roth_conversions.insert(2026, 400_000.0);

        let table = flat_table();
        let mut history = Vec::new();
        for _ in 0..3 {
            let record = solve_year(&params, &table, &history);
            history.push(record);
        }

        assert_eq!(history[0].irmaa_magi, None);
        assert_eq!(history[1].irmaa_magi, None);
        assert_approx(history[0].irmaa_total, 0.0);
        assert_eq!(history[2].irmaa_magi, Some(history[0].magi));
        // 2026 MAGI > 400k joint (2025 tier 4): 406.90 + 78.60 per person-month.
        assert_approx(history[2].irmaa_part_b, 406.90 * 12.0 * 2.0);
        assert_approx(history[2].irmaa_part_d, 78.60 * 12.0 * 2.0);
    }

    #[test]
    fn irmaa_is_zero_before_medicare_age() {
        let mut params = sample_params();
        params.birth_year = 1970;
        params.ira_start = 2_000_000.0;
        params.roth_conversions.insert(2026, 500_000.0);
        let first = solve_year(&params, &flat_table(), &[]);
        let second = solve_year(&params, &flat_table(), &[first]);
        let third = solve_year(&params, &flat_table(), &[second.clone(), second]);
        assert_eq!(third.irmaa_magi, None);
        assert_approx(third.irmaa_total, 0.0);
    }

    #[test]
    fn banded_rate_fills_low_then_moderate_then_spreads_excess() {
        let bands = [
            RiskBand {
                target: 100.0,
                rate: 0.02,
            },
            RiskBand {
                target: 100.0,
                rate: 0.05,
            },
            RiskBand {
                target: 200.0,
                rate: 0.08,
            },
        ];
        assert_approx(banded_rate(50.0, bands), 0.02);
        assert_approx(banded_rate(150.0, bands), (100.0 * 0.02 + 50.0 * 0.05) / 150.0);
        // 800 = 400 filled + 400 spread 1:1:2
        let expected =
            (100.0 * 0.02 + 100.0 * 0.05 + 200.0 * 0.08 + 100.0 * 0.02 + 100.0 * 0.05 + 200.0 * 0.08)
                / 800.0;
        assert_approx(banded_rate(800.0, bands), expected);
        assert_approx(banded_rate(0.0, bands), 0.02);
    }

    #[test]
    fn fixed_returns_apply_per_account() {
        let mut params = sample_params();
        params.after_tax_start = 100.0;
        params.after_tax_cost_basis = 100.0;
        params.ira_start = 100.0;
        params.roth_start = 100.0;
        params.returns = ReturnModel::Fixed {
            after_tax: 0.05,
            ira: 0.06,
            roth: 0.07,
        };

        let record = solve_year(&params, &flat_table(), &[]);
        assert_approx(record.at_eoy, 105.0);
        assert_approx(record.ira_eoy, 106.0);
        assert_approx(record.roth_eoy, 107.0);
        assert_approx(record.total_eoy, 318.0);
        assert_approx(record.basis_eoy, 100.0);
    }

    #[test]
    fn present_values_discount_by_years_from_start() {
        let mut params = sample_params();
        params.end_year = 2027;
        params.roth_start = 1_000.0;
        params.annual_expenses = 100.0;
        params.discount_rate = 0.25;

        let table = flat_table();
        let first = solve_year(&params, &table, &[]);
        assert_approx(first.pv_expenses, 100.0);
        let second = solve_year(&params, &table, &[first]);
        assert_approx(second.pv_expenses, 80.0);
        assert_approx(second.pv_total_eoy, second.total_eoy / 1.25);
        assert_approx(second.pv_total_withdrawal, second.total_withdrawal / 1.25);
        assert_approx(second.pv_federal_tax, second.federal_tax / 1.25);
        assert_approx(second.cumulative_expenses, 200.0);
        assert_approx(second.pv_cumulative_expenses, 180.0);
    }
}
