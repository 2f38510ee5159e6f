use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    MarriedJoint,
    Single,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    AfterTax,
    Ira,
    Roth,
}

impl AccountKind {
    pub fn label(self) -> &'static str {
        match self {
            AccountKind::AfterTax => "after-tax",
            AccountKind::Ira => "ira",
            AccountKind::Roth => "roth",
        }
    }
}

/// Priority in which the year's withdrawal need is drawn from the accounts.
/// The IRA always releases its RMD first, whatever its position here.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WithdrawalOrder(pub [AccountKind; 3]);

impl WithdrawalOrder {
    pub const AFTER_TAX_IRA_ROTH: WithdrawalOrder =
        WithdrawalOrder([AccountKind::AfterTax, AccountKind::Ira, AccountKind::Roth]);

    pub fn is_permutation(&self) -> bool {
        [AccountKind::AfterTax, AccountKind::Ira, AccountKind::Roth]
            .iter()
            .all(|kind| self.0.iter().filter(|k| *k == kind).count() == 1)
    }

    /// Accounts drawn before `kind`.
    pub fn ahead_of(&self, kind: AccountKind) -> &[AccountKind] {
        let position = self.0.iter().position(|k| *k == kind).unwrap_or(0);
        &self.0[..position]
    }
}

impl Default for WithdrawalOrder {
    fn default() -> Self {
        Self::AFTER_TAX_IRA_ROTH
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskBand {
    pub target: f64,
    pub rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReturnModel {
    /// Each account grows at its own rate.
    Fixed { after_tax: f64, ira: f64, roth: f64 },
    /// `totalBOY` fills the low band up to its target, then moderate, then
    /// high; anything past the three targets is spread across the bands in
    /// proportion to their targets. The dollar-weighted rate applies to every
    /// account.
    RiskBanded {
        low: RiskBand,
        moderate: RiskBand,
        high: RiskBand,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivorEvent {
    pub year: i32,
    pub ss_retention: f64,
    pub expense_retention: f64,
}

#[derive(Debug, Clone)]
pub struct Parameters {
    pub start_year: i32,
    pub end_year: i32,
    pub birth_year: i32,
    pub filing_status: FilingStatus,
    pub after_tax_start: f64,
    pub after_tax_cost_basis: f64,
    pub ira_start: f64,
    pub roth_start: f64,
    pub annual_expenses: f64,
    pub expense_inflation: f64,
    pub ss_monthly_benefit: f64,
    pub ss_cola: f64,
    pub ss_start_age: u32,
    pub returns: ReturnModel,
    pub discount_rate: f64,
    pub heir_federal_rate: f64,
    pub heir_state_rate: f64,
    pub roth_conversions: BTreeMap<i32, f64>,
    pub survivor: Option<SurvivorEvent>,
    pub withdrawal_order: WithdrawalOrder,
    pub iterative_tax: bool,
}

/// Per-year facts that decide which inputs a derived field reads.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearContext {
    pub filing_status: FilingStatus,
    pub survivor_active: bool,
    pub medicare_persons: u32,
    pub iterative_tax: bool,
    pub banded_returns: bool,
    pub withdrawal_order: WithdrawalOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Convergence {
    pub passes: u32,
    pub converged: bool,
    /// Total tax computed by each pass, in pass order.
    pub estimates: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub year: i32,
    pub age: u32,
    pub year_index: u32,
    pub context: YearContext,

    #[serde(rename = "atBOY")]
    pub at_boy: f64,
    #[serde(rename = "iraBOY")]
    pub ira_boy: f64,
    #[serde(rename = "rothBOY")]
    pub roth_boy: f64,
    #[serde(rename = "totalBOY")]
    pub total_boy: f64,
    #[serde(rename = "basisBOY")]
    pub basis_boy: f64,

    pub expenses: f64,
    pub social_security: f64,
    pub roth_conversion: f64,
    pub rmd_factor: Option<f64>,
    pub rmd_required: f64,

    pub withdrawal_need: f64,
    pub at_withdrawal: f64,
    pub ira_withdrawal: f64,
    pub roth_withdrawal: f64,
    pub total_withdrawal: f64,
    pub unmet_need: f64,

    pub capital_gains: f64,
    pub ordinary_income: f64,
    pub taxable_social_security: f64,
    pub taxable_ordinary: f64,
    pub magi: f64,

    pub federal_tax: f64,
    pub ltcg_tax: f64,
    pub niit: f64,
    pub state_tax: f64,
    pub total_tax: f64,
    pub after_tax_account_tax: f64,

    pub irmaa_magi: Option<f64>,
    pub irmaa_part_b: f64,
    pub irmaa_part_d: f64,
    pub irmaa_total: f64,

    pub at_return_rate: f64,
    pub ira_return_rate: f64,
    pub roth_return_rate: f64,
    pub reinvested_surplus: f64,

    #[serde(rename = "atEOY")]
    pub at_eoy: f64,
    #[serde(rename = "iraEOY")]
    pub ira_eoy: f64,
    #[serde(rename = "rothEOY")]
    pub roth_eoy: f64,
    #[serde(rename = "totalEOY")]
    pub total_eoy: f64,
    #[serde(rename = "basisEOY")]
    pub basis_eoy: f64,

    pub cumulative_tax: f64,
    pub cumulative_irmaa: f64,
    pub cumulative_expenses: f64,
    pub cumulative_after_tax_tax: f64,

    pub heir_value: f64,

    #[serde(rename = "pvTotalEOY")]
    pub pv_total_eoy: f64,
    pub pv_total_tax: f64,
    pub pv_irmaa: f64,
    pub pv_expenses: f64,
    pub pv_heir_value: f64,
    pub pv_cumulative_tax: f64,
    pub pv_total_withdrawal: f64,
    pub pv_federal_tax: f64,
    pub pv_ltcg_tax: f64,
    pub pv_niit: f64,
    pub pv_state_tax: f64,
    pub pv_cumulative_irmaa: f64,
    pub pv_cumulative_expenses: f64,

    pub convergence: Convergence,
}
