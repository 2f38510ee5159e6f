use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::engine::{project, terminal_heir_value, total_unmet_need};
use super::error::ProjectionError;
use super::tables::TaxTable;
use super::types::Parameters;

/// Candidates whose summed unmet need stays under this count as feasible.
pub const FEASIBILITY_TOLERANCE: f64 = 0.01;

/// Year → requested Roth conversion amount.
pub type ConversionSchedule = BTreeMap<i32, f64>;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Objective {
    #[default]
    HeirValue,
    PvHeirValue,
    NegativeCumulativeTax,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOutcome {
    /// Position of the candidate in the submitted list.
    pub index: usize,
    pub schedule: ConversionSchedule,
    pub score: f64,
    pub heir_value: f64,
    pub pv_heir_value: f64,
    pub cumulative_tax: f64,
    pub total_unmet_need: f64,
    pub feasible: bool,
}

/// Projects `params` with `schedule` in place of its own conversions.
pub fn evaluate_schedule(
    params: &Parameters,
    table: &TaxTable,
    schedule: &ConversionSchedule,
    objective: Objective,
) -> Result<CandidateOutcome, ProjectionError> {
    let mut candidate = params.clone();
    candidate.roth_conversions = schedule.clone();
    let records = project(&candidate, table)?;

    let heir_value = terminal_heir_value(&records);
    let last = records.last();
    let pv_heir_value = last.map_or(0.0, |r| r.pv_heir_value);
    let cumulative_tax = last.map_or(0.0, |r| r.cumulative_tax);
    let unmet = total_unmet_need(&records);

    let score = match objective {
        Objective::HeirValue => heir_value,
        Objective::PvHeirValue => pv_heir_value,
        Objective::NegativeCumulativeTax => -cumulative_tax,
    };

    Ok(CandidateOutcome {
        index: 0,
        schedule: schedule.clone(),
        score,
        heir_value,
        pv_heir_value,
        cumulative_tax,
        total_unmet_need: unmet,
        feasible: unmet <= FEASIBILITY_TOLERANCE,
    })
}

/// Feasible candidates first, then descending score. Ties keep submission
/// order.
pub fn rank_schedules(
    params: &Parameters,
    table: &TaxTable,
    candidates: &[ConversionSchedule],
    objective: Objective,
) -> Result<Vec<CandidateOutcome>, ProjectionError> {
    let mut outcomes = candidates
        .iter()
        .enumerate()
        .map(|(index, schedule)| {
            evaluate_schedule(params, table, schedule, objective)
                .map(|outcome| CandidateOutcome { index, ..outcome })
        })
        .collect::<Result<Vec<_>, _>>()?;

    outcomes.sort_by(|a, b| {
        b.feasible
            .cmp(&a.feasible)
            .then_with(|| b.score.total_cmp(&a.score))
    });
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FilingStatus, ReturnModel, WithdrawalOrder};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn deterministic_params() -> Parameters {
        Parameters {
            start_year: 2026,
            end_year: 2040,
            birth_year: 1962,
            filing_status: FilingStatus::MarriedJoint,
            after_tax_start: 600_000.0,
            after_tax_cost_basis: 500_000.0,
            ira_start: 1_500_000.0,
            roth_start: 50_000.0,
            annual_expenses: 80_000.0,
            expense_inflation: 0.02,
            ss_monthly_benefit: 3_500.0,
            ss_cola: 0.02,
            ss_start_age: 70,
            returns: ReturnModel::Fixed {
                after_tax: 0.05,
                ira: 0.05,
                roth: 0.05,
            },
            discount_rate: 0.03,
            heir_federal_rate: 0.32,
            heir_state_rate: 0.05,
            roth_conversions: BTreeMap::new(),
            survivor: None,
            withdrawal_order: WithdrawalOrder::default(),
            iterative_tax: true,
        }
    }

    #[test]
    fn evaluation_replaces_the_parameter_schedule() {
        let mut params = deterministic_params();
        params.roth_conversions.insert(2026, 500_000.0);
        let table = TaxTable::federal_default();

        let empty = evaluate_schedule(&params, &table, &BTreeMap::new(), Objective::HeirValue)
            .expect("valid params");
        let baseline_params = Parameters {
            roth_conversions: BTreeMap::new(),
            ..params.clone()
        };
        let records = project(&baseline_params, &table).expect("valid params");
        assert_close(empty.heir_value, terminal_heir_value(&records), 1e-9);
        assert!(empty.feasible);
    }

    #[test]
    fn objectives_pick_the_matching_score() {
        let params = deterministic_params();
        let table = TaxTable::federal_default();
        let schedule = BTreeMap::from([(2027, 50_000.0)]);

        let heir = evaluate_schedule(&params, &table, &schedule, Objective::HeirValue)
            .expect("valid params");
        let pv = evaluate_schedule(&params, &table, &schedule, Objective::PvHeirValue)
            .expect("valid params");
        let tax = evaluate_schedule(&params, &table, &schedule, Objective::NegativeCumulativeTax)
            .expect("valid params");

        assert_eq!(heir.score, heir.heir_value);
        assert_eq!(pv.score, pv.pv_heir_value);
        assert_eq!(tax.score, -tax.cumulative_tax);
        assert!(pv.pv_heir_value < heir.heir_value);
    }

    #[test]
    fn ranking_puts_feasible_candidates_first() {
        let mut params = deterministic_params();
        params.after_tax_start = 0.0;
        params.after_tax_cost_basis = 0.0;
        params.ira_start = 400_000.0;
        params.roth_start = 0.0;
        params.annual_expenses = 60_000.0;
        params.end_year = 2030;
        let table = TaxTable::federal_default();

        // Converting everything up front leaves nothing to fund 2027+.
        let drain = BTreeMap::from([(2026, 400_000.0)]);
        let none = BTreeMap::new();
        let ranked = rank_schedules(&params, &table, &[drain, none], Objective::HeirValue)
            .expect("valid params");

        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].feasible);
        assert_eq!(ranked[0].index, 1);
        assert!(!ranked[1].feasible);
        assert!(ranked[1].total_unmet_need > FEASIBILITY_TOLERANCE);
    }

    #[test]
    fn ranking_orders_by_descending_score_and_keeps_ties_stable() {
        let params = deterministic_params();
        let table = TaxTable::federal_default();
        let same = BTreeMap::from([(2028, 30_000.0)]);
        let candidates = vec![
            same.clone(),
            BTreeMap::from([(2026, 80_000.0), (2027, 80_000.0)]),
            same,
        ];

        let ranked = rank_schedules(&params, &table, &candidates, Objective::NegativeCumulativeTax)
            .expect("valid params");
        for pair in ranked.windows(2) {
            if pair[0].feasible == pair[1].feasible {
                assert!(pair[0].score >= pair[1].score);
            }
        }
        let tied: Vec<usize> = ranked
            .iter()
            .filter(|o| o.index != 1)
            .map(|o| o.index)
            .collect();
        assert_eq!(tied, vec![0, 2]);
    }

    #[test]
    fn invalid_candidate_amount_is_rejected() {
        let params = deterministic_params();
        let table = TaxTable::federal_default();
        let bad = BTreeMap::from([(2027, -5.0)]);
        let err = rank_schedules(&params, &table, &[bad], Objective::HeirValue)
            .expect_err("negative conversion must be rejected");
        assert!(err.to_string().contains("roth conversion for 2027"));
    }
}
