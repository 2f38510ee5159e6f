use super::tables::{Bracket, IrmaaTier, SsThresholds};

pub const NIIT_RATE: f64 = 0.038;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IrmaaCharge {
    pub part_b_monthly: f64,
    pub part_d_monthly: f64,
}

/// Marginal rate integrated over `[from, to)`. Income below the first
/// threshold is untaxed.
fn integrate_brackets(from: f64, to: f64, brackets: &[Bracket]) -> f64 {
    let from = from.max(0.0);
    if !(to > from) {
        return 0.0;
    }

    brackets
        .iter()
        .enumerate()
        .map(|(idx, bracket)| {
            let upper = brackets
                .get(idx + 1)
                .map_or(f64::INFINITY, |next| next.threshold);
            let lo = from.max(bracket.threshold);
            let hi = to.min(upper);
            (hi - lo).max(0.0) * bracket.rate.max(0.0)
        })
        .sum()
}

pub fn federal_ordinary_tax(taxable_ordinary: f64, brackets: &[Bracket]) -> f64 {
    integrate_brackets(0.0, taxable_ordinary, brackets)
}

/// Gains stack on top of taxable ordinary income: the slice of the LTCG
/// schedule they occupy starts where ordinary income ends.
pub fn ltcg_tax(taxable_ordinary: f64, capital_gains: f64, brackets: &[Bracket]) -> f64 {
    if capital_gains <= 0.0 {
        return 0.0;
    }
    let start = taxable_ordinary.max(0.0);
    integrate_brackets(start, start + capital_gains, brackets)
}

pub fn niit(magi: f64, net_investment_income: f64, threshold: f64) -> f64 {
    let excess = (magi - threshold).max(0.0);
    NIIT_RATE * net_investment_income.max(0.0).min(excess)
}

/// Flat rate on investment income; distributions are not taxed by the state.
pub fn state_tax(investment_income: f64, rate: f64) -> f64 {
    investment_income.max(0.0) * rate.max(0.0)
}

/// Provisional-income method: half the benefit plus other income, phased in
/// at 50% between the base and adjusted thresholds and at 85% above.
pub fn taxable_social_security(
    benefit: f64,
    other_income: f64,
    thresholds: SsThresholds,
) -> f64 {
    let benefit = benefit.max(0.0);
    if benefit <= 0.0 {
        return 0.0;
    }

    let provisional = other_income.max(0.0) + 0.5 * benefit;
    if provisional <= thresholds.base {
        return 0.0;
    }
    if provisional <= thresholds.adjusted {
        return (0.5 * (provisional - thresholds.base)).min(0.5 * benefit);
    }

    let first_tier = (0.5 * (thresholds.adjusted - thresholds.base)).min(0.5 * benefit);
    (0.85 * (provisional - thresholds.adjusted) + first_tier).min(0.85 * benefit)
}

/// `magi_two_years_prior` is `None` when the lookback year predates the
/// projection, which carries no surcharge.
pub fn irmaa(magi_two_years_prior: Option<f64>, tiers: &[IrmaaTier]) -> IrmaaCharge {
    let Some(magi) = magi_two_years_prior else {
        return IrmaaCharge::default();
    };

    tiers
        .iter()
        .rev()
        .find(|tier| magi > tier.threshold)
        .map(|tier| IrmaaCharge {
            part_b_monthly: tier.part_b_monthly,
            part_d_monthly: tier.part_d_monthly,
        })
        .unwrap_or_default()
}
