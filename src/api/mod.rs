use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    AccountKind, ConversionSchedule, DependencyGraph, Field, FilingStatus, Objective, Parameters,
    ReturnModel, RiskBand, SurvivorEvent, TaxTable, WithdrawalOrder, YearRecord, project,
    rank_schedules, terminal_heir_value, total_unmet_need, unconverged_years,
    validate_parameters,
};
use crate::core::solver::{CandidateOutcome, FEASIBILITY_TOLERANCE};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliFilingStatus {
    MarriedJoint,
    Single,
}

impl From<CliFilingStatus> for FilingStatus {
    fn from(value: CliFilingStatus) -> Self {
        match value {
            CliFilingStatus::MarriedJoint => FilingStatus::MarriedJoint,
            CliFilingStatus::Single => FilingStatus::Single,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliReturnMode {
    Fixed,
    RiskBanded,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiFilingStatus {
    #[serde(alias = "marriedJoint", alias = "married_joint", alias = "joint", alias = "mfj")]
    MarriedJoint,
    Single,
}

impl From<ApiFilingStatus> for CliFilingStatus {
    fn from(value: ApiFilingStatus) -> Self {
        match value {
            ApiFilingStatus::MarriedJoint => CliFilingStatus::MarriedJoint,
            ApiFilingStatus::Single => CliFilingStatus::Single,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiReturnMode {
    Fixed,
    #[serde(alias = "riskBanded", alias = "risk_banded", alias = "banded")]
    RiskBanded,
}

impl From<ApiReturnMode> for CliReturnMode {
    fn from(value: ApiReturnMode) -> Self {
        match value {
            ApiReturnMode::Fixed => CliReturnMode::Fixed,
            ApiReturnMode::RiskBanded => CliReturnMode::RiskBanded,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    start_year: Option<i32>,
    end_year: Option<i32>,
    birth_year: Option<i32>,
    filing_status: Option<ApiFilingStatus>,

    after_tax_start: Option<f64>,
    after_tax_cost_basis: Option<f64>,
    ira_start: Option<f64>,
    roth_start: Option<f64>,

    annual_expenses: Option<f64>,
    expense_inflation: Option<f64>,
    ss_monthly_benefit: Option<f64>,
    ss_cola: Option<f64>,
    ss_start_age: Option<u32>,

    return_mode: Option<ApiReturnMode>,
    after_tax_return: Option<f64>,
    ira_return: Option<f64>,
    roth_return: Option<f64>,
    low_band_target: Option<f64>,
    low_band_rate: Option<f64>,
    moderate_band_target: Option<f64>,
    moderate_band_rate: Option<f64>,
    high_band_target: Option<f64>,
    high_band_rate: Option<f64>,

    discount_rate: Option<f64>,
    heir_federal_rate: Option<f64>,
    heir_state_rate: Option<f64>,

    roth_conversions: Option<BTreeMap<i32, f64>>,
    survivor_year: Option<i32>,
    survivor_ss_retention: Option<f64>,
    survivor_expense_retention: Option<f64>,
    withdrawal_order: Option<String>,
    iterative_tax: Option<bool>,

    bracket_inflation: Option<f64>,
    state_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectPayload {
    #[serde(default)]
    parameters: ProjectPayload,
    field: String,
    year: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComparePayload {
    #[serde(default)]
    parameters: ProjectPayload,
    candidates: Vec<ConversionSchedule>,
    #[serde(default)]
    objective: Objective,
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Year-by-year retirement projection (after-tax + IRA + Roth, RMDs, IRMAA, heir value)"
)]
struct Cli {
    #[arg(long, default_value_t = 2026)]
    start_year: i32,
    #[arg(long, default_value_t = 2055)]
    end_year: i32,
    #[arg(long)]
    birth_year: i32,
    #[arg(long, value_enum, default_value_t = CliFilingStatus::MarriedJoint)]
    filing_status: CliFilingStatus,

    #[arg(long, default_value_t = 0.0)]
    after_tax_start: f64,
    #[arg(
        long,
        help = "After-tax account cost basis at start; defaults to after-tax-start"
    )]
    after_tax_cost_basis: Option<f64>,
    #[arg(long, default_value_t = 0.0)]
    ira_start: f64,
    #[arg(long, default_value_t = 0.0)]
    roth_start: f64,

    #[arg(long, default_value_t = 0.0, help = "First-year spending")]
    annual_expenses: f64,
    #[arg(
        long,
        default_value_t = 2.5,
        help = "Annual expense inflation in percent"
    )]
    expense_inflation: f64,
    #[arg(long, default_value_t = 0.0, help = "Household Social Security per month")]
    ss_monthly_benefit: f64,
    #[arg(long, default_value_t = 2.5, help = "Social Security COLA in percent")]
    ss_cola: f64,
    #[arg(long, default_value_t = 67)]
    ss_start_age: u32,

    #[arg(long, value_enum, default_value_t = CliReturnMode::Fixed)]
    return_mode: CliReturnMode,
    #[arg(long, default_value_t = 6.0, help = "After-tax account return in percent")]
    after_tax_return: f64,
    #[arg(long, default_value_t = 6.0, help = "IRA return in percent")]
    ira_return: f64,
    #[arg(long, default_value_t = 6.0, help = "Roth return in percent")]
    roth_return: f64,
    #[arg(long, default_value_t = 250_000.0)]
    low_band_target: f64,
    #[arg(long, default_value_t = 3.0, help = "Low-risk band return in percent")]
    low_band_rate: f64,
    #[arg(long, default_value_t = 750_000.0)]
    moderate_band_target: f64,
    #[arg(long, default_value_t = 5.5, help = "Moderate band return in percent")]
    moderate_band_rate: f64,
    #[arg(long, default_value_t = 1_000_000.0)]
    high_band_target: f64,
    #[arg(long, default_value_t = 8.0, help = "High-risk band return in percent")]
    high_band_rate: f64,

    #[arg(long, default_value_t = 3.0, help = "Present-value discount rate in percent")]
    discount_rate: f64,
    #[arg(long, default_value_t = 24.0, help = "Heir federal rate on inherited IRA in percent")]
    heir_federal_rate: f64,
    #[arg(long, default_value_t = 3.07, help = "Heir state rate on inherited IRA in percent")]
    heir_state_rate: f64,

    #[arg(
        long = "roth-conversion",
        value_parser = parse_conversion,
        help = "Roth conversion as YEAR=AMOUNT; repeat for several years"
    )]
    roth_conversions: Vec<(i32, f64)>,
    #[arg(long, help = "First year of the survivor branch")]
    survivor_year: Option<i32>,
    #[arg(
        long,
        default_value_t = 60.0,
        help = "Social Security kept by the survivor in percent"
    )]
    survivor_ss_retention: f64,
    #[arg(
        long,
        default_value_t = 70.0,
        help = "Expenses kept by the survivor in percent"
    )]
    survivor_expense_retention: f64,
    #[arg(
        long,
        value_parser = parse_withdrawal_order,
        default_value = "after-tax,ira,roth",
        help = "Comma-separated account draw order"
    )]
    withdrawal_order: WithdrawalOrder,
    #[arg(long, help = "Skip the tax/withdrawal fixed point and report one pass")]
    single_pass: bool,

    #[arg(long, default_value_t = 2.5, help = "Bracket inflation in percent")]
    bracket_inflation: f64,
    #[arg(long, default_value_t = 3.07, help = "State rate on investment income in percent")]
    state_rate: f64,
}

#[derive(Debug)]
struct ApiRequest {
    parameters: Parameters,
    table: TaxTable,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    heir_value: f64,
    total_unmet_need: f64,
    feasible: bool,
    unconverged_years: Vec<i32>,
    records: Vec<YearRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    objective: Objective,
    outcomes: Vec<CandidateOutcome>,
}

#[derive(Debug, Serialize)]
struct FieldsResponse {
    fields: &'static [Field],
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn parse_conversion(raw: &str) -> Result<(i32, f64), String> {
    let (year, amount) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected YEAR=AMOUNT, got `{raw}`"))?;
    let year = year
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid conversion year `{year}`: {e}"))?;
    let amount = amount
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid conversion amount `{amount}`: {e}"))?;
    Ok((year, amount))
}

/// Account names only; duplicates are left for the parameter validator.
fn parse_withdrawal_order(raw: &str) -> Result<WithdrawalOrder, String> {
    let kinds = raw
        .split(',')
        .map(|name| match name.trim().to_ascii_lowercase().as_str() {
            "after-tax" | "aftertax" | "after_tax" | "taxable" => Ok(AccountKind::AfterTax),
            "ira" | "traditional" => Ok(AccountKind::Ira),
            "roth" => Ok(AccountKind::Roth),
            other => Err(format!("unknown account `{other}` in withdrawal order")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let kinds: [AccountKind; 3] = kinds
        .try_into()
        .map_err(|_| "withdrawal order must name exactly three accounts".to_string())?;
    Ok(WithdrawalOrder(kinds))
}

fn build_parameters(cli: Cli) -> Result<(Parameters, TaxTable), String> {
    if let Some(basis) = cli.after_tax_cost_basis {
        if basis > cli.after_tax_start {
            return Err("--after-tax-cost-basis must be <= --after-tax-start".to_string());
        }
    }
    if !cli.bracket_inflation.is_finite() || cli.bracket_inflation <= -100.0 {
        return Err("--bracket-inflation must be > -100".to_string());
    }
    if !(0.0..=100.0).contains(&cli.state_rate) {
        return Err("--state-rate must be between 0 and 100".to_string());
    }

    let returns = match cli.return_mode {
        CliReturnMode::Fixed => ReturnModel::Fixed {
            after_tax: cli.after_tax_return / 100.0,
            ira: cli.ira_return / 100.0,
            roth: cli.roth_return / 100.0,
        },
        CliReturnMode::RiskBanded => ReturnModel::RiskBanded {
            low: RiskBand {
                target: cli.low_band_target,
                rate: cli.low_band_rate / 100.0,
            },
            moderate: RiskBand {
                target: cli.moderate_band_target,
                rate: cli.moderate_band_rate / 100.0,
            },
            high: RiskBand {
                target: cli.high_band_target,
                rate: cli.high_band_rate / 100.0,
            },
        },
    };

    let survivor = cli.survivor_year.map(|year| SurvivorEvent {
        year,
        ss_retention: cli.survivor_ss_retention / 100.0,
        expense_retention: cli.survivor_expense_retention / 100.0,
    });

    let parameters = Parameters {
        start_year: cli.start_year,
        end_year: cli.end_year,
        birth_year: cli.birth_year,
        filing_status: cli.filing_status.into(),
        after_tax_start: cli.after_tax_start,
        after_tax_cost_basis: cli.after_tax_cost_basis.unwrap_or(cli.after_tax_start),
        ira_start: cli.ira_start,
        roth_start: cli.roth_start,
        annual_expenses: cli.annual_expenses,
        expense_inflation: cli.expense_inflation / 100.0,
        ss_monthly_benefit: cli.ss_monthly_benefit,
        ss_cola: cli.ss_cola / 100.0,
        ss_start_age: cli.ss_start_age,
        returns,
        discount_rate: cli.discount_rate / 100.0,
        heir_federal_rate: cli.heir_federal_rate / 100.0,
        heir_state_rate: cli.heir_state_rate / 100.0,
        roth_conversions: cli.roth_conversions.into_iter().collect(),
        survivor,
        withdrawal_order: cli.withdrawal_order,
        iterative_tax: !cli.single_pass,
    };
    validate_parameters(&parameters).map_err(|e| e.to_string())?;

    let table = TaxTable::federal_default()
        .with_inflation_rate(cli.bracket_inflation / 100.0)
        .with_state_rate(cli.state_rate / 100.0);
    Ok((parameters, table))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route("/api/inspect", post(inspect_handler))
        .route("/api/compare", post(compare_handler))
        .route("/api/fields", get(fields_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "projection API listening");
    info!("local access: http://127.0.0.1:{port}/api/fields");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn fields_handler() -> Response {
    json_response(StatusCode::OK, FieldsResponse { fields: Field::ALL })
}

async fn project_get_handler(Query(payload): Query<ProjectPayload>) -> Response {
    project_response(payload)
}

async fn project_post_handler(Json(payload): Json<ProjectPayload>) -> Response {
    project_response(payload)
}

async fn inspect_handler(Json(payload): Json<InspectPayload>) -> Response {
    inspect_response(payload)
}

async fn compare_handler(Json(payload): Json<ComparePayload>) -> Response {
    compare_response(payload)
}

fn project_response(payload: ProjectPayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match build_project_response(&request) {
        Ok(response) => {
            info!(
                years = response.records.len(),
                feasible = response.feasible,
                "served projection"
            );
            json_response(StatusCode::OK, response)
        }
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn inspect_response(payload: InspectPayload) -> Response {
    let request = match api_request_from_payload(payload.parameters) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let records = match project(&request.parameters, &request.table) {
        Ok(records) => records,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    match DependencyGraph::new(&records).inspect(&payload.field, payload.year) {
        Ok(inspection) => json_response(StatusCode::OK, inspection),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn compare_response(payload: ComparePayload) -> Response {
    if payload.candidates.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "candidates must not be empty");
    }
    let request = match api_request_from_payload(payload.parameters) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match rank_schedules(
        &request.parameters,
        &request.table,
        &payload.candidates,
        payload.objective,
    ) {
        Ok(outcomes) => {
            info!(candidates = outcomes.len(), "ranked conversion schedules");
            json_response(
                StatusCode::OK,
                CompareResponse {
                    objective: payload.objective,
                    outcomes,
                },
            )
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: ProjectPayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.start_year {
        cli.start_year = v;
    }
    if let Some(v) = payload.end_year {
        cli.end_year = v;
    }
    if let Some(v) = payload.birth_year {
        cli.birth_year = v;
    }
    if let Some(v) = payload.filing_status {
        cli.filing_status = v.into();
    }

    if let Some(v) = payload.after_tax_start {
        cli.after_tax_start = v;
        // A new balance without a basis starts fully at basis.
        if payload.after_tax_cost_basis.is_none() {
            cli.after_tax_cost_basis = None;
        }
    }
    if let Some(v) = payload.after_tax_cost_basis {
        cli.after_tax_cost_basis = Some(v);
    }
    if let Some(v) = payload.ira_start {
        cli.ira_start = v;
    }
    if let Some(v) = payload.roth_start {
        cli.roth_start = v;
    }

    if let Some(v) = payload.annual_expenses {
        cli.annual_expenses = v;
    }
    if let Some(v) = payload.expense_inflation {
        cli.expense_inflation = v;
    }
    if let Some(v) = payload.ss_monthly_benefit {
        cli.ss_monthly_benefit = v;
    }
    if let Some(v) = payload.ss_cola {
        cli.ss_cola = v;
    }
    if let Some(v) = payload.ss_start_age {
        cli.ss_start_age = v;
    }

    if let Some(v) = payload.return_mode {
        cli.return_mode = v.into();
    }
    if let Some(v) = payload.after_tax_return {
        cli.after_tax_return = v;
    }
    if let Some(v) = payload.ira_return {
        cli.ira_return = v;
    }
    if let Some(v) = payload.roth_return {
        cli.roth_return = v;
    }
    if let Some(v) = payload.low_band_target {
        cli.low_band_target = v;
    }
    if let Some(v) = payload.low_band_rate {
        cli.low_band_rate = v;
    }
    if let Some(v) = payload.moderate_band_target {
        cli.moderate_band_target = v;
    }
    if let Some(v) = payload.moderate_band_rate {
        cli.moderate_band_rate = v;
    }
    if let Some(v) = payload.high_band_target {
        cli.high_band_target = v;
    }
    if let Some(v) = payload.high_band_rate {
        cli.high_band_rate = v;
    }

    if let Some(v) = payload.discount_rate {
        cli.discount_rate = v;
    }
    if let Some(v) = payload.heir_federal_rate {
        cli.heir_federal_rate = v;
    }
    if let Some(v) = payload.heir_state_rate {
        cli.heir_state_rate = v;
    }

    if let Some(v) = payload.roth_conversions {
        cli.roth_conversions = v.into_iter().collect();
    }
    if let Some(v) = payload.survivor_year {
        cli.survivor_year = Some(v);
    }
    if let Some(v) = payload.survivor_ss_retention {
        cli.survivor_ss_retention = v;
    }
    if let Some(v) = payload.survivor_expense_retention {
        cli.survivor_expense_retention = v;
    }
    if let Some(v) = payload.withdrawal_order {
        cli.withdrawal_order = parse_withdrawal_order(&v)?;
    }
    if let Some(v) = payload.iterative_tax {
        cli.single_pass = !v;
    }

    if let Some(v) = payload.bracket_inflation {
        cli.bracket_inflation = v;
    }
    if let Some(v) = payload.state_rate {
        cli.state_rate = v;
    }

    let (parameters, table) = build_parameters(cli)?;
    Ok(ApiRequest { parameters, table })
}

fn default_cli_for_api() -> Cli {
    Cli {
        start_year: 2026,
        end_year: 2055,
        birth_year: 1961,
        filing_status: CliFilingStatus::MarriedJoint,
        after_tax_start: 400_000.0,
        after_tax_cost_basis: Some(250_000.0),
        ira_start: 1_200_000.0,
        roth_start: 150_000.0,
        annual_expenses: 95_000.0,
        expense_inflation: 2.5,
        ss_monthly_benefit: 3_800.0,
        ss_cola: 2.5,
        ss_start_age: 67,
        return_mode: CliReturnMode::Fixed,
        after_tax_return: 6.0,
        ira_return: 6.0,
        roth_return: 7.0,
        low_band_target: 250_000.0,
        low_band_rate: 3.0,
        moderate_band_target: 750_000.0,
        moderate_band_rate: 5.5,
        high_band_target: 1_000_000.0,
        high_band_rate: 8.0,
        discount_rate: 3.0,
        heir_federal_rate: 24.0,
        heir_state_rate: 3.07,
        roth_conversions: Vec::new(),
        survivor_year: None,
        survivor_ss_retention: 60.0,
        survivor_expense_retention: 70.0,
        withdrawal_order: WithdrawalOrder::default(),
        single_pass: false,
        bracket_inflation: 2.5,
        state_rate: 3.07,
    }
}

fn build_project_response(request: &ApiRequest) -> Result<ProjectResponse, String> {
    let records = project(&request.parameters, &request.table).map_err(|e| e.to_string())?;
    let unmet = total_unmet_need(&records);
    Ok(ProjectResponse {
        heir_value: terminal_heir_value(&records),
        total_unmet_need: unmet,
        feasible: unmet <= FEASIBILITY_TOLERANCE,
        unconverged_years: unconverged_years(&records),
        records,
    })
}

/// One-shot projection from command-line flags, rendered as JSON.
pub fn run_cli<I, T>(args: I) -> Result<String, String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|e| e.to_string())?;
    let (parameters, table) = build_parameters(cli)?;
    let response = build_project_response(&ApiRequest { parameters, table })?;
    info!(
        years = response.records.len(),
        heir_value = response.heir_value,
        "projection complete"
    );
    serde_json::to_string_pretty(&response).map_err(|e| format!("failed to render JSON: {e}"))
}
