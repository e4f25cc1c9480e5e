use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, SolverErrorCode};
use crate::models::block::ProposedBlock;
use crate::services::request_assembler::SolverRequest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, alias = "scheduled_blocks")]
    pub proposed_events: Vec<ProposedBlock>,
    #[serde(default, alias = "unscheduled", deserialize_with = "id_list")]
    pub unscheduled_tasks: Vec<String>,
    #[serde(default)]
    pub stats: Option<JsonValue>,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl SolverResponse {
    /// A missing flag counts as success once the HTTP call itself succeeded.
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverHealth {
    pub healthy: bool,
    #[serde(default)]
    pub body: Option<JsonValue>,
}

/// The external optimizer. Any `Err` from `solve` means "use the fallback".
#[async_trait]
pub trait SolverClient: Send + Sync {
    async fn solve(&self, request: &SolverRequest) -> AppResult<SolverResponse>;

    async fn health(&self) -> AppResult<SolverHealth>;
}

pub struct HttpSolverClient {
    client: reqwest::Client,
    base_url: String,
    timeout: StdDuration,
}

impl HttpSolverClient {
    pub fn try_new(base_url: &str, timeout: StdDuration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Some(StdDuration::from_secs(90)))
            .build()
            .map_err(|err| AppError::other(format!("初始化求解器 HTTP 客户端失败: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_http_error(status: StatusCode, correlation_id: &str) -> AppError {
        AppError::solver_with_details(
            SolverErrorCode::UpstreamStatus,
            format!("求解器返回错误状态码 {}", status.as_u16()),
            Some(json!({"status": status.as_u16(), "correlation_id": correlation_id})),
        )
    }

    fn error_from_reqwest(err: reqwest::Error, correlation_id: &str, timeout: StdDuration) -> AppError {
        if err.is_timeout() {
            AppError::solver_with_details(
                SolverErrorCode::HttpTimeout,
                "求解器请求超时",
                Some(json!({
                    "timeout_ms": timeout.as_millis() as u64,
                    "correlation_id": correlation_id,
                })),
            )
        } else if err.is_connect() {
            AppError::solver_with_details(
                SolverErrorCode::Unreachable,
                "无法连接求解器",
                Some(json!({"correlation_id": correlation_id})),
            )
        } else if let Some(status) = err.status() {
            Self::map_http_error(status, correlation_id)
        } else if err.is_decode() || err.is_body() {
            AppError::solver_with_details(
                SolverErrorCode::InvalidResponse,
                format!("读取求解器响应失败: {err}"),
                Some(json!({"correlation_id": correlation_id})),
            )
        } else {
            AppError::solver_with_details(
                SolverErrorCode::Unknown,
                format!("求解器请求失败: {err}"),
                Some(json!({"correlation_id": correlation_id})),
            )
        }
    }

    fn decode_response(body: &str, correlation_id: &str) -> AppResult<SolverResponse> {
        let response: SolverResponse = serde_json::from_str(body).map_err(|err| {
            AppError::solver_with_details(
                SolverErrorCode::InvalidResponse,
                format!("解析求解器响应失败: {err}"),
                Some(json!({"correlation_id": correlation_id})),
            )
        })?;

        if !response.is_success() {
            return Err(AppError::solver_with_details(
                SolverErrorCode::Rejected,
                "求解器未能给出可行方案",
                Some(json!({
                    "correlation_id": correlation_id,
                    "messages": response.messages,
                    "unscheduled_tasks": response.unscheduled_tasks,
                })),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl SolverClient for HttpSolverClient {
    async fn solve(&self, request: &SolverRequest) -> AppResult<SolverResponse> {
        let correlation_id = Uuid::new_v4().to_string();
        let endpoint = format!("{}/solve", self.base_url);

        debug!(
            target: "app::solver",
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            tasks = request.tasks.len(),
            fixed_events = request.fixed_events.len(),
            "invoking solver"
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(&endpoint)
            .json(request)
            .send()
            .await
            .map_err(|err| Self::error_from_reqwest(err, &correlation_id, self.timeout))?;

        let status = resp.status();
        let latency_ms = start.elapsed().as_millis();
        if !status.is_success() {
            warn!(
                target: "app::solver",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                latency_ms,
                "solver returned non-success status"
            );
            return Err(Self::map_http_error(status, &correlation_id));
        }

        let body = resp
            .text()
            .await
            .map_err(|err| Self::error_from_reqwest(err, &correlation_id, self.timeout))?;
        let response = Self::decode_response(&body, &correlation_id)?;

        info!(
            target: "app::solver",
            correlation_id = %correlation_id,
            latency_ms,
            blocks = response.proposed_events.len(),
            unscheduled = response.unscheduled_tasks.len(),
            "solver completed"
        );
        Ok(response)
    }

    async fn health(&self) -> AppResult<SolverHealth> {
        let correlation_id = Uuid::new_v4().to_string();
        let endpoint = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|err| Self::error_from_reqwest(err, &correlation_id, self.timeout))?;

        let healthy = resp.status().is_success();
        let body = resp.json::<JsonValue>().await.ok();
        debug!(target: "app::solver", healthy, "solver health probed");
        Ok(SolverHealth { healthy, body })
    }
}

fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<JsonValue>>::deserialize(deserializer)?.unwrap_or_default();
    raw.into_iter()
        .map(|value| match value {
            JsonValue::String(id) => Ok(id),
            JsonValue::Number(id) => Ok(id.to_string()),
            other => Err(de::Error::custom(format!("invalid task id: {other}"))),
        })
        .collect()
}

pub mod testing {
    use super::*;

    /// Exposes body decoding so integration tests can check payload variants
    /// without a live server.
    pub fn decode_response(body: &str) -> AppResult<SolverResponse> {
        HttpSolverClient::decode_response(body, "test-correlation-id")
    }

    pub fn map_http_error(status: StatusCode) -> AppError {
        HttpSolverClient::map_http_error(status, "test-correlation-id")
    }
}
