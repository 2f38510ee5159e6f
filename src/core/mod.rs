mod engine;
mod error;
mod graph;
pub mod solver;
mod tables;
mod tax;
mod types;
mod year;

pub use engine::{
    heir_value_of, project, terminal_heir_value, total_unmet_need, unconverged_years,
    validate_parameters,
};
pub use error::{GraphError, ProjectionError};
pub use graph::{Consumer, Dependency, DependencyGraph, Field, Inspection, Sign};
pub use solver::{CandidateOutcome, ConversionSchedule, Objective, evaluate_schedule, rank_schedules};
pub use tables::{
    Bracket, BracketKind, FilingSchedule, IrmaaTier, SsThresholds, TableGeneration, TaxTable,
    YearSchedule,
};
pub use tax::{
    IrmaaCharge, NIIT_RATE, federal_ordinary_tax, irmaa, ltcg_tax, niit, state_tax,
    taxable_social_security,
};
pub use types::{
    AccountKind, Convergence, FilingStatus, Parameters, ReturnModel, RiskBand, SurvivorEvent,
    WithdrawalOrder, YearContext, YearRecord,
};
pub use year::{CONVERGENCE_THRESHOLD, MAX_TAX_PASSES, solve_year};
