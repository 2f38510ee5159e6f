//! Field-level data-flow metadata over a projected sequence.
//!
//! Each derived field has one resolver listing the `(field, year)` pairs it
//! reads. Consumers are found by running every resolver over the whole
//! sequence and inverting the matches, so the two directions cannot drift.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use super::error::GraphError;
use super::types::{AccountKind, YearRecord};

macro_rules! field_catalogue {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub enum Field {
            $($variant),+
        }

        impl Field {
            pub const ALL: &'static [Field] = &[$(Field::$variant),+];

            /// Name as it appears in serialized records.
            pub fn name(self) -> &'static str {
                match self {
                    $(Field::$variant => $name),+
                }
            }
        }
    };
}

field_catalogue! {
    Year => "year",
    Age => "age",
    YearIndex => "yearIndex",
    AtBoy => "atBOY",
    IraBoy => "iraBOY",
    RothBoy => "rothBOY",
    TotalBoy => "totalBOY",
    BasisBoy => "basisBOY",
    Expenses => "expenses",
    SocialSecurity => "socialSecurity",
    RothConversion => "rothConversion",
    RmdFactor => "rmdFactor",
    RmdRequired => "rmdRequired",
    WithdrawalNeed => "withdrawalNeed",
    AtWithdrawal => "atWithdrawal",
    IraWithdrawal => "iraWithdrawal",
    RothWithdrawal => "rothWithdrawal",
    TotalWithdrawal => "totalWithdrawal",
    UnmetNeed => "unmetNeed",
    CapitalGains => "capitalGains",
    OrdinaryIncome => "ordinaryIncome",
    TaxableSocialSecurity => "taxableSocialSecurity",
    TaxableOrdinary => "taxableOrdinary",
    Magi => "magi",
    FederalTax => "federalTax",
    LtcgTax => "ltcgTax",
    Niit => "niit",
    StateTax => "stateTax",
    TotalTax => "totalTax",
    AfterTaxAccountTax => "afterTaxAccountTax",
    IrmaaMagi => "irmaaMagi",
    IrmaaPartB => "irmaaPartB",
    IrmaaPartD => "irmaaPartD",
    IrmaaTotal => "irmaaTotal",
    AtReturnRate => "atReturnRate",
    IraReturnRate => "iraReturnRate",
    RothReturnRate => "rothReturnRate",
    ReinvestedSurplus => "reinvestedSurplus",
    AtEoy => "atEOY",
    IraEoy => "iraEOY",
    RothEoy => "rothEOY",
    TotalEoy => "totalEOY",
    BasisEoy => "basisEOY",
    CumulativeTax => "cumulativeTax",
    CumulativeIrmaa => "cumulativeIrmaa",
    CumulativeExpenses => "cumulativeExpenses",
    CumulativeAfterTaxTax => "cumulativeAfterTaxTax",
    HeirValue => "heirValue",
    PvTotalEoy => "pvTotalEOY",
    PvTotalTax => "pvTotalTax",
    PvIrmaa => "pvIrmaa",
    PvExpenses => "pvExpenses",
    PvHeirValue => "pvHeirValue",
    PvCumulativeTax => "pvCumulativeTax",
    PvTotalWithdrawal => "pvTotalWithdrawal",
    PvFederalTax => "pvFederalTax",
    PvLtcgTax => "pvLtcgTax",
    PvNiit => "pvNiit",
    PvStateTax => "pvStateTax",
    PvCumulativeIrmaa => "pvCumulativeIrmaa",
    PvCumulativeExpenses => "pvCumulativeExpenses",
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.name() == value)
            .ok_or_else(|| GraphError::UnknownField(value.to_string()))
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl YearRecord {
    /// Numeric value of a catalogued field. Absent optionals read as 0.
    pub fn value(&self, field: Field) -> f64 {
        match field {
            Field::Year => self.year as f64,
            Field::Age => self.age as f64,
            Field::YearIndex => self.year_index as f64,
            Field::AtBoy => self.at_boy,
            Field::IraBoy => self.ira_boy,
            Field::RothBoy => self.roth_boy,
            Field::TotalBoy => self.total_boy,
            Field::BasisBoy => self.basis_boy,
            Field::Expenses => self.expenses,
            Field::SocialSecurity => self.social_security,
            Field::RothConversion => self.roth_conversion,
            Field::RmdFactor => self.rmd_factor.unwrap_or(0.0),
            Field::RmdRequired => self.rmd_required,
            Field::WithdrawalNeed => self.withdrawal_need,
            Field::AtWithdrawal => self.at_withdrawal,
            Field::IraWithdrawal => self.ira_withdrawal,
            Field::RothWithdrawal => self.roth_withdrawal,
            Field::TotalWithdrawal => self.total_withdrawal,
            Field::UnmetNeed => self.unmet_need,
            Field::CapitalGains => self.capital_gains,
            Field::OrdinaryIncome => self.ordinary_income,
            Field::TaxableSocialSecurity => self.taxable_social_security,
            Field::TaxableOrdinary => self.taxable_ordinary,
            Field::Magi => self.magi,
            Field::FederalTax => self.federal_tax,
            Field::LtcgTax => self.ltcg_tax,
            Field::Niit => self.niit,
            Field::StateTax => self.state_tax,
            Field::TotalTax => self.total_tax,
            Field::AfterTaxAccountTax => self.after_tax_account_tax,
            Field::IrmaaMagi => self.irmaa_magi.unwrap_or(0.0),
            Field::IrmaaPartB => self.irmaa_part_b,
            Field::IrmaaPartD => self.irmaa_part_d,
            Field::IrmaaTotal => self.irmaa_total,
            Field::AtReturnRate => self.at_return_rate,
            Field::IraReturnRate => self.ira_return_rate,
            Field::RothReturnRate => self.roth_return_rate,
            Field::ReinvestedSurplus => self.reinvested_surplus,
            Field::AtEoy => self.at_eoy,
            Field::IraEoy => self.ira_eoy,
            Field::RothEoy => self.roth_eoy,
            Field::TotalEoy => self.total_eoy,
            Field::BasisEoy => self.basis_eoy,
            Field::CumulativeTax => self.cumulative_tax,
            Field::CumulativeIrmaa => self.cumulative_irmaa,
            Field::CumulativeExpenses => self.cumulative_expenses,
            Field::CumulativeAfterTaxTax => self.cumulative_after_tax_tax,
            Field::HeirValue => self.heir_value,
            Field::PvTotalEoy => self.pv_total_eoy,
            Field::PvTotalTax => self.pv_total_tax,
            Field::PvIrmaa => self.pv_irmaa,
            Field::PvExpenses => self.pv_expenses,
            Field::PvHeirValue => self.pv_heir_value,
            Field::PvCumulativeTax => self.pv_cumulative_tax,
            Field::PvTotalWithdrawal => self.pv_total_withdrawal,
            Field::PvFederalTax => self.pv_federal_tax,
            Field::PvLtcgTax => self.pv_ltcg_tax,
            Field::PvNiit => self.pv_niit,
            Field::PvStateTax => self.pv_state_tax,
            Field::PvCumulativeIrmaa => self.pv_cumulative_irmaa,
            Field::PvCumulativeExpenses => self.pv_cumulative_expenses,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    Positive,
    Negative,
}

use Sign::{Negative, Positive};

/// One input of a field: `year_offset` is relative to the inspected record,
/// `year` is the resolved calendar year.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub field: Field,
    pub year_offset: i32,
    pub year: i32,
    pub sign: Sign,
}

/// A `(field, year)` that reads the inspected value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub field: Field,
    pub year: i32,
    pub sign: Sign,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub field: Field,
    pub year: i32,
    pub value: f64,
    pub inputs: Vec<Dependency>,
    pub consumers: Vec<Consumer>,
}

pub struct DependencyGraph<'a> {
    records: &'a [YearRecord],
}

impl<'a> DependencyGraph<'a> {
    pub fn new(records: &'a [YearRecord]) -> Self {
        Self { records }
    }

    fn index_of(&self, year: i32) -> Result<usize, GraphError> {
        self.records
            .iter()
            .position(|r| r.year == year)
            .ok_or(GraphError::YearOutOfRange(year))
    }

    /// Direct inputs of `field` in `year`. Leaves return an empty list.
    pub fn inputs(&self, field: Field, year: i32) -> Result<Vec<Dependency>, GraphError> {
        let index = self.index_of(year)?;
        Ok(self.resolve(index, field))
    }

    /// Every `(field, year)` in the sequence whose inputs include this one.
    pub fn consumers(&self, field: Field, year: i32) -> Result<Vec<Consumer>, GraphError> {
        self.index_of(year)?;

        let mut found = Vec::new();
        for (index, record) in self.records.iter().enumerate() {
            for &candidate in Field::ALL {
                for dep in self.resolve(index, candidate) {
                    if dep.field == field && dep.year == year {
                        found.push(Consumer {
                            field: candidate,
                            year: record.year,
                            sign: dep.sign,
                        });
                    }
                }
            }
        }
        Ok(found)
    }

    pub fn forward(&self, field: &str, year: i32) -> Result<Vec<Dependency>, GraphError> {
        self.inputs(field.parse()?, year)
    }

    pub fn reverse(&self, field: &str, year: i32) -> Result<Vec<Consumer>, GraphError> {
        self.consumers(field.parse()?, year)
    }

    pub fn inspect(&self, field: &str, year: i32) -> Result<Inspection, GraphError> {
        let field: Field = field.parse()?;
        let index = self.index_of(year)?;
        Ok(Inspection {
            field,
            year,
            value: self.records[index].value(field),
            inputs: self.resolve(index, field),
            consumers: self.consumers(field, year)?,
        })
    }

    fn resolve(&self, index: usize, field: Field) -> Vec<Dependency> {
        let record = &self.records[index];
        let mut deps = Inputs {
            index,
            len: self.records.len(),
            year: record.year,
            list: Vec::new(),
        };
        let rmd_due = record.rmd_required > 0.0;
        let converting = record.roth_conversion > 0.0;
        let banded = record.context.banded_returns;

        match field {
            Field::Year
            | Field::Age
            | Field::YearIndex
            | Field::Expenses
            | Field::SocialSecurity
            | Field::RmdFactor => {}

            Field::AtBoy => deps.prior(Field::AtEoy, 1, Positive),
            Field::IraBoy => deps.prior(Field::IraEoy, 1, Positive),
            Field::RothBoy => deps.prior(Field::RothEoy, 1, Positive),
            Field::BasisBoy => deps.prior(Field::BasisEoy, 1, Positive),
            Field::TotalBoy => {
                deps.same(Field::AtBoy, Positive);
                deps.same(Field::IraBoy, Positive);
                deps.same(Field::RothBoy, Positive);
            }

            Field::RmdRequired => {
                if record.rmd_factor.is_some() && record.ira_boy > 0.0 {
                    deps.same(Field::IraBoy, Positive);
                    deps.same(Field::RmdFactor, Negative);
                }
            }
            Field::RothConversion => {
                if converting {
                    deps.same(Field::IraBoy, Positive);
                    if rmd_due {
                        deps.same(Field::RmdRequired, Negative);
                    }
                }
            }

            Field::WithdrawalNeed => {
                deps.same(Field::Expenses, Positive);
                deps.same(Field::SocialSecurity, Negative);
                if record.context.iterative_tax {
                    deps.same(Field::TotalTax, Positive);
                }
            }
            Field::AtWithdrawal => deps.withdrawal_leg(record, AccountKind::AfterTax),
            Field::IraWithdrawal => deps.withdrawal_leg(record, AccountKind::Ira),
            Field::RothWithdrawal => deps.withdrawal_leg(record, AccountKind::Roth),
            Field::TotalWithdrawal => {
                deps.same(Field::AtWithdrawal, Positive);
                deps.same(Field::IraWithdrawal, Positive);
                deps.same(Field::RothWithdrawal, Positive);
            }
            Field::UnmetNeed => {
                deps.same(Field::WithdrawalNeed, Positive);
                deps.same(Field::TotalWithdrawal, Negative);
            }

            Field::CapitalGains => {
                deps.same(Field::AtWithdrawal, Positive);
                deps.same(Field::AtBoy, Positive);
                deps.same(Field::BasisBoy, Negative);
            }
            Field::OrdinaryIncome => {
                deps.same(Field::IraWithdrawal, Positive);
                deps.same(Field::RothConversion, Positive);
            }
            Field::TaxableSocialSecurity => {
                deps.same(Field::SocialSecurity, Positive);
                deps.same(Field::OrdinaryIncome, Positive);
                deps.same(Field::CapitalGains, Positive);
            }
            Field::TaxableOrdinary => {
                deps.same(Field::OrdinaryIncome, Positive);
                deps.same(Field::TaxableSocialSecurity, Positive);
            }
            Field::Magi => {
                deps.same(Field::OrdinaryIncome, Positive);
                deps.same(Field::TaxableSocialSecurity, Positive);
                deps.same(Field::CapitalGains, Positive);
            }

            Field::FederalTax => deps.same(Field::TaxableOrdinary, Positive),
            Field::LtcgTax => {
                deps.same(Field::CapitalGains, Positive);
                deps.same(Field::TaxableOrdinary, Positive);
            }
            Field::Niit => {
                deps.same(Field::Magi, Positive);
                deps.same(Field::CapitalGains, Positive);
            }
            Field::StateTax => deps.same(Field::CapitalGains, Positive),
            Field::TotalTax => {
                deps.same(Field::FederalTax, Positive);
                deps.same(Field::LtcgTax, Positive);
                deps.same(Field::Niit, Positive);
                deps.same(Field::StateTax, Positive);
            }
            Field::AfterTaxAccountTax => {
                deps.same(Field::LtcgTax, Positive);
                deps.same(Field::Niit, Positive);
                deps.same(Field::StateTax, Positive);
            }

            Field::IrmaaMagi => {
                if record.irmaa_magi.is_some() {
                    deps.prior(Field::Magi, 2, Positive);
                }
            }
            Field::IrmaaPartB | Field::IrmaaPartD => {
                if record.irmaa_magi.is_some() {
                    deps.same(Field::IrmaaMagi, Positive);
                }
            }
            Field::IrmaaTotal => {
                deps.same(Field::IrmaaPartB, Positive);
                deps.same(Field::IrmaaPartD, Positive);
            }

            Field::AtReturnRate | Field::IraReturnRate | Field::RothReturnRate => {
                if banded {
                    deps.same(Field::TotalBoy, Positive);
                }
            }
            Field::ReinvestedSurplus => {
                deps.same(Field::TotalWithdrawal, Positive);
                deps.same(Field::WithdrawalNeed, Negative);
            }

            Field::AtEoy => {
                deps.same(Field::AtBoy, Positive);
                deps.same(Field::AtWithdrawal, Negative);
                deps.same(Field::ReinvestedSurplus, Positive);
                deps.same(Field::AtReturnRate, Positive);
            }
            Field::IraEoy => {
                deps.same(Field::IraBoy, Positive);
                deps.same(Field::IraWithdrawal, Negative);
                deps.same(Field::RothConversion, Negative);
                deps.same(Field::IraReturnRate, Positive);
            }
            Field::RothEoy => {
                deps.same(Field::RothBoy, Positive);
                deps.same(Field::RothWithdrawal, Negative);
                deps.same(Field::RothConversion, Positive);
                deps.same(Field::RothReturnRate, Positive);
            }
            Field::TotalEoy => {
                deps.same(Field::AtEoy, Positive);
                deps.same(Field::IraEoy, Positive);
                deps.same(Field::RothEoy, Positive);
            }
            Field::BasisEoy => {
                deps.same(Field::BasisBoy, Positive);
                deps.same(Field::AtWithdrawal, Negative);
                deps.same(Field::AtBoy, Positive);
                deps.same(Field::ReinvestedSurplus, Positive);
            }

            Field::CumulativeTax => deps.running(Field::CumulativeTax, Field::TotalTax),
            Field::CumulativeIrmaa => deps.running(Field::CumulativeIrmaa, Field::IrmaaTotal),
            Field::CumulativeExpenses => {
                deps.running(Field::CumulativeExpenses, Field::Expenses)
            }
            Field::CumulativeAfterTaxTax => {
                deps.running(Field::CumulativeAfterTaxTax, Field::AfterTaxAccountTax)
            }

            Field::HeirValue => {
                deps.same(Field::AtEoy, Positive);
                deps.same(Field::IraEoy, Positive);
                deps.same(Field::RothEoy, Positive);
            }

            Field::PvTotalEoy => deps.same(Field::TotalEoy, Positive),
            Field::PvTotalTax => deps.same(Field::TotalTax, Positive),
            Field::PvIrmaa => deps.same(Field::IrmaaTotal, Positive),
            Field::PvExpenses => deps.same(Field::Expenses, Positive),
            Field::PvHeirValue => deps.same(Field::HeirValue, Positive),
            Field::PvCumulativeTax => deps.running(Field::PvCumulativeTax, Field::PvTotalTax),
            Field::PvTotalWithdrawal => deps.same(Field::TotalWithdrawal, Positive),
            Field::PvFederalTax => deps.same(Field::FederalTax, Positive),
            Field::PvLtcgTax => deps.same(Field::LtcgTax, Positive),
            Field::PvNiit => deps.same(Field::Niit, Positive),
            Field::PvStateTax => deps.same(Field::StateTax, Positive),
            Field::PvCumulativeIrmaa => deps.running(Field::PvCumulativeIrmaa, Field::PvIrmaa),
            Field::PvCumulativeExpenses => {
                deps.running(Field::PvCumulativeExpenses, Field::PvExpenses)
            }
        }

        deps.list
    }
}

struct Inputs {
    index: usize,
    len: usize,
    year: i32,
    list: Vec<Dependency>,
}

impl Inputs {
    fn push(&mut self, field: Field, year_offset: i32, sign: Sign) {
        let target = self.index as i64 + year_offset as i64;
        if target < 0 || target >= self.len as i64 {
            return;
        }
        self.list.push(Dependency {
            field,
            year_offset,
            year: self.year + year_offset,
            sign,
        });
    }

    fn same(&mut self, field: Field, sign: Sign) {
        self.push(field, 0, sign);
    }

    fn prior(&mut self, field: Field, years_back: i32, sign: Sign) {
        self.push(field, -years_back, sign);
    }

    fn running(&mut self, total: Field, amount: Field) {
        self.prior(total, 1, Positive);
        self.same(amount, Positive);
    }

    fn withdrawal_leg(&mut self, record: &YearRecord, kind: AccountKind) {
        let order = record.context.withdrawal_order;
        let ahead = order.ahead_of(kind);
        let rmd_due = record.rmd_required > 0.0;

        if kind == AccountKind::Ira && rmd_due {
            self.same(Field::RmdRequired, Positive);
        }
        self.same(Field::WithdrawalNeed, Positive);
        match kind {
            AccountKind::AfterTax => self.same(Field::AtBoy, Positive),
            AccountKind::Ira => {
                self.same(Field::IraBoy, Positive);
                if record.roth_conversion > 0.0 {
                    self.same(Field::RothConversion, Negative);
                }
            }
            AccountKind::Roth => self.same(Field::RothBoy, Positive),
        }
        for earlier in ahead {
            self.same(withdrawal_field(*earlier), Negative);
        }
        if kind != AccountKind::Ira && rmd_due && !ahead.contains(&AccountKind::Ira) {
            self.same(Field::RmdRequired, Negative);
        }
    }
}

fn withdrawal_field(kind: AccountKind) -> Field {
    match kind {
        AccountKind::AfterTax => Field::AtWithdrawal,
        AccountKind::Ira => Field::IraWithdrawal,
        AccountKind::Roth => Field::RothWithdrawal,
    }
}
