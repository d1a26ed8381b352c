use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    InputError, Scenario, SweepAxis, SweepCell, SweepPoint, WorkerPool, run_one, run_sweep_1d,
    run_sweep_2d, validate_scenario,
};

fn default_simulations() -> usize {
    1_000
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunPayload {
    scenario: Scenario,
    #[serde(default)]
    seed: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload {
    scenario: Scenario,
    #[serde(default = "default_simulations")]
    simulations: usize,
    #[serde(default)]
    seed: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sweep1dPayload {
    scenario: Scenario,
    axis: SweepAxis,
    #[serde(default = "default_simulations")]
    simulations: usize,
    #[serde(default)]
    seed: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sweep2dPayload {
    scenario: Scenario,
    axis_x: SweepAxis,
    axis_y: SweepAxis,
    #[serde(default = "default_simulations")]
    simulations: usize,
    #[serde(default)]
    seed: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    result: crate::core::RunOutput,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sweep1dResponse {
    points: Vec<SweepPoint>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sweep2dResponse {
    cells: Vec<SweepCell>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(Arc::new(WorkerPool::with_default_size()));

    let listener = TcpListener::bind(addr).await?;
    info!("simulation API listening on http://{addr}");
    axum::serve(listener, app).await
}

fn router(pool: Arc<WorkerPool>) -> Router {
    Router::new()
        .route("/api/run", post(run_handler))
        .route("/api/batch", post(batch_handler))
        .route("/api/sweep1d", post(sweep_1d_handler))
        .route("/api/sweep2d", post(sweep_2d_handler))
        .fallback(not_found_handler)
        .with_state(pool)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn run_handler(Json(payload): Json<RunPayload>) -> Response {
    if let Err(e) = validate_scenario(&payload.scenario) {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }
    let RunPayload { scenario, seed } = payload;
    match tokio::task::spawn_blocking(move || run_one(&scenario, seed)).await {
        Ok(Ok(result)) => json_response(StatusCode::OK, RunResponse { result }),
        Ok(Err(e)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn batch_handler(
    State(pool): State<Arc<WorkerPool>>,
    Json(payload): Json<BatchPayload>,
) -> Response {
    match pool
        .run_simulations(&payload.scenario, payload.simulations, payload.seed)
        .await
    {
        Ok(batch) => json_response(StatusCode::OK, batch),
        Err(e) => input_error_response(e),
    }
}

async fn sweep_1d_handler(
    State(pool): State<Arc<WorkerPool>>,
    Json(payload): Json<Sweep1dPayload>,
) -> Response {
    match run_sweep_1d(
        &pool,
        &payload.scenario,
        &payload.axis,
        payload.simulations,
        payload.seed,
    )
    .await
    {
        Ok(points) => json_response(StatusCode::OK, Sweep1dResponse { points }),
        Err(e) => input_error_response(e),
    }
}

async fn sweep_2d_handler(
    State(pool): State<Arc<WorkerPool>>,
    Json(payload): Json<Sweep2dPayload>,
) -> Response {
    match run_sweep_2d(
        &pool,
        &payload.scenario,
        &payload.axis_x,
        &payload.axis_y,
        payload.simulations,
        payload.seed,
    )
    .await
    {
        Ok(cells) => json_response(StatusCode::OK, Sweep2dResponse { cells }),
        Err(e) => input_error_response(e),
    }
}

fn input_error_response(err: InputError) -> Response {
    error_response(StatusCode::BAD_REQUEST, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
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
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario_json() -> serde_json::Value {
        json!({
            "name": "api test",
            "startYear": 2025,
            "birthYear": 1975,
            "lifeExpectancy": { "kind": "fixed", "value": 60.0 },
            "residenceState": "CA",
            "inflation": { "kind": "fixed", "value": 103.0, "valueType": "percentage" },
            "investmentTypes": [
                {
                    "name": "cash",
                    "expectedAnnualReturn": { "kind": "fixed", "value": 100.0, "valueType": "percentage" },
                    "expenseRatio": 0.0,
                    "expectedAnnualIncome": { "kind": "fixed", "value": 0.0, "valueType": "amount" },
                    "taxable": false
                },
                {
                    "name": "index fund",
                    "expectedAnnualReturn": { "kind": "normal", "mean": 106.0, "stdDev": 4.0, "valueType": "percentage" },
                    "expenseRatio": 0.001,
                    "expectedAnnualIncome": { "kind": "fixed", "value": 0.0, "valueType": "amount" },
                    "taxable": true
                }
            ],
            "investments": [
                {
                    "id": "cash",
                    "investmentType": "cash",
                    "value": 50000.0,
                    "purchasePrice": 50000.0,
                    "taxStatus": "nonRetirement"
                },
                {
                    "id": "stocks",
                    "investmentType": "index fund",
                    "value": 400000.0,
                    "purchasePrice": 250000.0,
                    "taxStatus": "nonRetirement"
                }
            ],
            "eventSeries": [
                {
                    "id": "salary",
                    "name": "salary",
                    "start": { "kind": "year", "distribution": { "kind": "fixed", "value": 2025.0 } },
                    "duration": { "kind": "fixed", "value": 10.0 },
                    "eventType": "income",
                    "initialAmount": 90000.0,
                    "expectedAnnualChange": { "kind": "fixed", "value": 102.0, "valueType": "percentage" },
                    "inflationAdjusted": true,
                    "socialSecurity": false,
                    "wage": true
                },
                {
                    "id": "invest",
                    "name": "invest",
                    "start": { "kind": "year", "distribution": { "kind": "fixed", "value": 2025.0 } },
                    "duration": { "kind": "fixed", "value": 60.0 },
                    "eventType": "invest",
                    "allocation": {
                        "kind": "fixed",
                        "targets": [ { "investment": "stocks", "percentage": 100.0 } ]
                    },
                    "maxCash": 30000.0
                }
            ],
            "spendingStrategy": [],
            "expenseWithdrawalStrategy": ["stocks"],
            "rmdStrategy": [],
            "rothConversion": { "enabled": false, "startYear": 0, "endYear": 0, "strategy": [] },
            "financialGoal": 0.0
        })
    }

    #[test]
    fn camel_case_payload_deserializes() {
        let payload: RunPayload =
            serde_json::from_value(json!({ "scenario": scenario_json(), "seed": 7 }))
                .expect("payload parses");
        assert_eq!(payload.seed, 7);
        assert_eq!(payload.scenario.name, "api test");
        assert_eq!(payload.scenario.investments.len(), 2);
    }

    #[test]
    fn batch_payload_defaults_apply() {
        let payload: BatchPayload =
            serde_json::from_value(json!({ "scenario": scenario_json() }))
                .expect("payload parses");
        assert_eq!(payload.simulations, 1_000);
        assert_eq!(payload.seed, 0);
    }

    #[tokio::test]
    async fn run_endpoint_returns_ok_for_a_valid_scenario() {
        let payload: RunPayload =
            serde_json::from_value(json!({ "scenario": scenario_json(), "seed": 1 }))
                .expect("payload parses");
        let response = run_handler(Json(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_scenario_is_a_bad_request() {
        let mut scenario = scenario_json();
        scenario["investments"][1]["investmentType"] = json!("nonexistent");
        let payload: RunPayload =
            serde_json::from_value(json!({ "scenario": scenario, "seed": 1 }))
                .expect("payload parses");
        let response = run_handler(Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_endpoint_settles_every_draw() {
        let pool = Arc::new(WorkerPool::new(4));
        let payload: BatchPayload = serde_json::from_value(
            json!({ "scenario": scenario_json(), "simulations": 5, "seed": 3 }),
        )
        .expect("payload parses");
        let response = batch_handler(State(pool), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sweep_endpoint_rejects_an_empty_axis() {
        let pool = Arc::new(WorkerPool::new(2));
        let payload: Sweep1dPayload = serde_json::from_value(json!({
            "scenario": scenario_json(),
            "axis": { "parameter": { "kind": "rothEnabled" }, "values": [] },
            "simulations": 2
        }))
        .expect("payload parses");
        let response = sweep_1d_handler(State(pool), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
