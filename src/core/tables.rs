//! Bracket tables keyed by tax year.
//!
//! A [`TaxTable`] holds one or more published generations. A lookup for a
//! tax year resolves to the latest generation whose base year is at or before
//! that year and compounds the table's inflation rate from the base year
//! forward. Years before the earliest generation are clamped to it with no
//! deflation applied: earlier years reuse the earliest published numbers
//! verbatim rather than extrapolating backwards.

use serde::Serialize;

use super::types::FilingStatus;

pub const RMD_START_AGE: u32 = 73;

/// IRS Uniform Lifetime Table (2022 onward), ages 73..=120.
const UNIFORM_LIFETIME: [(u32, f64); 48] = [
    (73, 26.5),
    (74, 25.5),
    (75, 24.6),
    (76, 23.7),
    (77, 22.9),
    (78, 22.0),
    (79, 21.1),
    (80, 20.2),
    (81, 19.4),
    (82, 18.5),
    (83, 17.7),
    (84, 16.8),
    (85, 16.0),
    (86, 15.2),
    (87, 14.4),
    (88, 13.7),
    (89, 12.9),
    (90, 12.2),
    (91, 11.5),
    (92, 10.8),
    (93, 10.1),
    (94, 9.5),
    (95, 8.9),
    (96, 8.4),
    (97, 7.8),
    (98, 7.3),
    (99, 6.8),
    (100, 6.4),
    (101, 6.0),
    (102, 5.6),
    (103, 5.2),
    (104, 4.9),
    (105, 4.6),
    (106, 4.3),
    (107, 4.1),
    (108, 3.9),
    (109, 3.7),
    (110, 3.5),
    (111, 3.4),
    (112, 3.3),
    (113, 3.1),
    (114, 3.0),
    (115, 2.9),
    (116, 2.8),
    (117, 2.7),
    (118, 2.5),
    (119, 2.3),
    (120, 2.0),
];

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    pub threshold: f64,
    pub rate: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BracketKind {
    FederalOrdinary,
    Ltcg,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IrmaaTier {
    pub threshold: f64,
    pub part_b_monthly: f64,
    pub part_d_monthly: f64,
}

/// Provisional-income thresholds for taxing Social Security. Statutory and
/// never inflation-indexed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SsThresholds {
    pub base: f64,
    pub adjusted: f64,
}

#[derive(Debug, Clone)]
pub struct FilingSchedule {
    pub federal: Vec<Bracket>,
    pub ltcg: Vec<Bracket>,
    pub standard_deduction: f64,
    pub irmaa: Vec<IrmaaTier>,
}

#[derive(Debug, Clone)]
pub struct TableGeneration {
    pub base_year: i32,
    pub joint: FilingSchedule,
    pub single: FilingSchedule,
}

impl TableGeneration {
    fn schedule(&self, status: FilingStatus) -> &FilingSchedule {
        match status {
            FilingStatus::MarriedJoint => &self.joint,
            FilingStatus::Single => &self.single,
        }
    }
}

/// Everything a single tax year needs, already inflated.
#[derive(Debug, Clone)]
pub struct YearSchedule {
    pub federal: Vec<Bracket>,
    pub ltcg: Vec<Bracket>,
    pub standard_deduction: f64,
    pub niit_threshold: f64,
    pub state_rate: f64,
    pub ss_thresholds: SsThresholds,
    pub irmaa: Vec<IrmaaTier>,
}

#[derive(Debug, Clone)]
pub struct TaxTable {
    // Sorted by base year; never empty.
    generations: Vec<TableGeneration>,
    inflation_rate: f64,
    state_rate: f64,
    rmd_divisors: Vec<(u32, f64)>,
}

impl TaxTable {
    pub fn new(earliest: TableGeneration, inflation_rate: f64, state_rate: f64) -> Self {
        Self {
            generations: vec![earliest],
            inflation_rate,
            state_rate,
            rmd_divisors: UNIFORM_LIFETIME.to_vec(),
        }
    }

    pub fn with_generation(mut self, generation: TableGeneration) -> Self {
        self.generations
            .retain(|existing| existing.base_year != generation.base_year);
        self.generations.push(generation);
        self.generations.sort_by_key(|g| g.base_year);
        self
    }

    pub fn with_inflation_rate(mut self, inflation_rate: f64) -> Self {
        self.inflation_rate = inflation_rate;
        self
    }

    pub fn with_state_rate(mut self, state_rate: f64) -> Self {
        self.state_rate = state_rate;
        self
    }

    /// 2024 and 2025 federal tables with a flat state tax on investment
    /// income only.
    pub fn federal_default() -> Self {
        TaxTable::new(generation_2024(), 0.025, 0.0307).with_generation(generation_2025())
    }

    pub fn inflation_rate(&self) -> f64 {
        self.inflation_rate
    }

    pub fn earliest_base_year(&self) -> i32 {
        self.generations[0].base_year
    }

    fn resolve(&self, tax_year: i32) -> (&TableGeneration, f64) {
        let generation = self
            .generations
            .iter()
            .rev()
            .find(|g| g.base_year <= tax_year)
            .unwrap_or(&self.generations[0]);
        let years = (tax_year - generation.base_year).max(0);
        (generation, (1.0 + self.inflation_rate).powi(years))
    }

    pub fn brackets_for(
        &self,
        tax_year: i32,
        kind: BracketKind,
        status: FilingStatus,
    ) -> Vec<Bracket> {
        let (generation, factor) = self.resolve(tax_year);
        let schedule = generation.schedule(status);
        let source = match kind {
            BracketKind::FederalOrdinary => &schedule.federal,
            BracketKind::Ltcg => &schedule.ltcg,
        };
        source
            .iter()
            .map(|b| Bracket {
                threshold: b.threshold * factor,
                rate: b.rate,
            })
            .collect()
    }

    pub fn standard_deduction(&self, tax_year: i32, status: FilingStatus) -> f64 {
        let (generation, factor) = self.resolve(tax_year);
        generation.schedule(status).standard_deduction * factor
    }

    pub fn irmaa_tiers(&self, tax_year: i32, status: FilingStatus) -> Vec<IrmaaTier> {
        let (generation, factor) = self.resolve(tax_year);
        generation
            .schedule(status)
            .irmaa
            .iter()
            .map(|tier| IrmaaTier {
                threshold: tier.threshold * factor,
                ..*tier
            })
            .collect()
    }

    /// Statutory NIIT threshold; not indexed.
    pub fn niit_threshold(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::MarriedJoint => 250_000.0,
            FilingStatus::Single => 200_000.0,
        }
    }

    pub fn state_rate(&self) -> f64 {
        self.state_rate
    }

    pub fn ss_thresholds(&self, status: FilingStatus) -> SsThresholds {
        match status {
            FilingStatus::MarriedJoint => SsThresholds {
                base: 32_000.0,
                adjusted: 44_000.0,
            },
            FilingStatus::Single => SsThresholds {
                base: 25_000.0,
                adjusted: 34_000.0,
            },
        }
    }

    /// `None` below the RMD start age. Ages past the end of the table use its
    /// last divisor.
    pub fn rmd_divisor(&self, age: u32) -> Option<f64> {
        if age < RMD_START_AGE {
            return None;
        }
        self.rmd_divisors
            .iter()
            .rev()
            .find(|(table_age, _)| *table_age <= age)
            .map(|(_, divisor)| *divisor)
    }

    pub fn year_schedule(&self, tax_year: i32, status: FilingStatus) -> YearSchedule {
        YearSchedule {
            federal: self.brackets_for(tax_year, BracketKind::FederalOrdinary, status),
            ltcg: self.brackets_for(tax_year, BracketKind::Ltcg, status),
            standard_deduction: self.standard_deduction(tax_year, status),
            niit_threshold: self.niit_threshold(status),
            state_rate: self.state_rate(),
            ss_thresholds: self.ss_thresholds(status),
            irmaa: self.irmaa_tiers(tax_year, status),
        }
    }
}

fn brackets(rows: &[(f64, f64)]) -> Vec<Bracket> {
    rows.iter()
        .map(|&(threshold, rate)| Bracket { threshold, rate })
        .collect()
}

fn irmaa_tiers(thresholds: [f64; 5], part_b: [f64; 5], part_d: [f64; 5]) -> Vec<IrmaaTier> {
    (0..5)
        .map(|idx| IrmaaTier {
            threshold: thresholds[idx],
            part_b_monthly: part_b[idx],
            part_d_monthly: part_d[idx],
        })
        .collect()
}

fn generation_2024() -> TableGeneration {
    let part_b = [69.90, 174.70, 279.50, 384.30, 419.30];
    let part_d = [12.90, 33.30, 53.80, 74.20, 81.00];
    TableGeneration {
        base_year: 2024,
        joint: FilingSchedule {
            federal: brackets(&[
                (0.0, 0.10),
                (23_200.0, 0.12),
                (94_300.0, 0.22),
                (201_050.0, 0.24),
                (383_900.0, 0.32),
                (487_450.0, 0.35),
                (731_200.0, 0.37),
            ]),
            ltcg: brackets(&[(0.0, 0.0), (94_050.0, 0.15), (583_750.0, 0.20)]),
            standard_deduction: 29_200.0,
            irmaa: irmaa_tiers(
                [206_000.0, 258_000.0, 322_000.0, 386_000.0, 750_000.0],
                part_b,
                part_d,
            ),
        },
        single: FilingSchedule {
            federal: brackets(&[
                (0.0, 0.10),
                (11_600.0, 0.12),
                (47_150.0, 0.22),
                (100_525.0, 0.24),
                (191_950.0, 0.32),
                (243_725.0, 0.35),
                (609_350.0, 0.37),
            ]),
            ltcg: brackets(&[(0.0, 0.0), (47_025.0, 0.15), (518_900.0, 0.20)]),
            standard_deduction: 14_600.0,
            irmaa: irmaa_tiers(
                [103_000.0, 129_000.0, 161_000.0, 193_000.0, 500_000.0],
                part_b,
                part_d,
            ),
        },
    }
}

fn generation_2025() -> TableGeneration {
    let part_b = [74.00, 185.00, 295.90, 406.90, 443.90];
    let part_d = [13.70, 35.30, 57.00, 78.60, 85.80];
    TableGeneration {
        base_year: 2025,
        joint: FilingSchedule {
            federal: brackets(&[
                (0.0, 0.10),
                (23_850.0, 0.12),
                (96_950.0, 0.22),
                (206_700.0, 0.24),
                (394_600.0, 0.32),
                (501_050.0, 0.35),
                (751_600.0, 0.37),
            ]),
            ltcg: brackets(&[(0.0, 0.0), (96_700.0, 0.15), (600_050.0, 0.20)]),
            standard_deduction: 30_000.0,
            irmaa: irmaa_tiers(
                [212_000.0, 266_000.0, 334_000.0, 400_000.0, 750_000.0],
                part_b,
                part_d,
            ),
        },
        single: FilingSchedule {
            federal: brackets(&[
                (0.0, 0.10),
                (11_925.0, 0.12),
                (48_475.0, 0.22),
                (103_350.0, 0.24),
                (197_300.0, 0.32),
                (250_525.0, 0.35),
                (626_350.0, 0.37),
            ]),
            ltcg: brackets(&[(0.0, 0.0), (48_350.0, 0.15), (533_400.0, 0.20)]),
            standard_deduction: 15_000.0,
            irmaa: irmaa_tiers(
                [106_000.0, 133_000.0, 167_000.0, 200_000.0, 500_000.0],
                part_b,
                part_d,
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn brackets_resolve_to_latest_generation_at_or_before_year() {
        let table = TaxTable::federal_default();
        let b2024 = table.brackets_for(2024, BracketKind::FederalOrdinary, FilingStatus::Single);
        let b2025 = table.brackets_for(2025, BracketKind::FederalOrdinary, FilingStatus::Single);
        assert_approx(b2024[1].threshold, 11_600.0);
        assert_approx(b2025[1].threshold, 11_925.0);
    }

    #[test]
    fn brackets_inflate_by_compounding_from_generation_base_year() {
        let table = TaxTable::federal_default().with_inflation_rate(0.03);
        let brackets = table.brackets_for(2027, BracketKind::Ltcg, FilingStatus::MarriedJoint);
        assert_approx(brackets[1].threshold, 96_700.0 * 1.03 * 1.03);
        assert_approx(brackets[1].rate, 0.15);
        assert_approx(brackets[0].threshold, 0.0);
    }

    #[test]
    fn years_before_earliest_generation_clamp_without_deflation() {
        let table = TaxTable::federal_default();
        let early = table.brackets_for(2010, BracketKind::FederalOrdinary, FilingStatus::Single);
        let base = table.brackets_for(2024, BracketKind::FederalOrdinary, FilingStatus::Single);
        assert_eq!(early, base);
        assert_approx(
            table.standard_deduction(1999, FilingStatus::MarriedJoint),
            29_200.0,
        );
        assert_eq!(table.earliest_base_year(), 2024);
    }

    #[test]
    fn irmaa_tiers_inflate_thresholds_but_not_premiums() {
        let table = TaxTable::federal_default().with_inflation_rate(0.10);
        let tiers = table.irmaa_tiers(2026, FilingStatus::Single);
        assert_eq!(tiers.len(), 5);
        assert_approx(tiers[0].threshold, 106_000.0 * 1.1);
        assert_approx(tiers[0].part_b_monthly, 74.0);
        assert_approx(tiers[4].part_d_monthly, 85.8);
    }

    #[test]
    fn rmd_divisor_starts_at_73_and_clamps_past_table_end() {
        let table = TaxTable::federal_default();
        assert_eq!(table.rmd_divisor(72), None);
        assert_eq!(table.rmd_divisor(0), None);
        assert_eq!(table.rmd_divisor(73), Some(26.5));
        assert_eq!(table.rmd_divisor(90), Some(12.2));
        assert_eq!(table.rmd_divisor(125), Some(2.0));
    }

    #[test]
    fn niit_and_ss_thresholds_are_not_indexed() {
        let table = TaxTable::federal_default().with_inflation_rate(0.5);
        assert_approx(table.niit_threshold(FilingStatus::MarriedJoint), 250_000.0);
        let schedule = table.year_schedule(2040, FilingStatus::Single);
        assert_approx(schedule.niit_threshold, 200_000.0);
        assert_approx(schedule.ss_thresholds.base, 25_000.0);
        assert_approx(schedule.ss_thresholds.adjusted, 34_000.0);
    }

    #[test]
    fn with_generation_replaces_same_base_year() {
        let mut replacement = generation_2025();
        replacement.single.standard_deduction = 1.0;
        let table = TaxTable::federal_default().with_generation(replacement);
        assert_approx(table.standard_deduction(2025, FilingStatus::Single), 1.0);
        assert_approx(table.standard_deduction(2024, FilingStatus::Single), 14_600.0);
    }

    #[test]
    fn lookups_are_pure_functions_of_their_inputs() {
        let table = TaxTable::federal_default();
        let a = table.year_schedule(2031, FilingStatus::MarriedJoint);
        let b = table.year_schedule(2031, FilingStatus::MarriedJoint);
        assert_eq!(a.federal, b.federal);
        assert_eq!(a.irmaa, b.irmaa);
        assert_approx(a.standard_deduction, b.standard_deduction);
    }
}
