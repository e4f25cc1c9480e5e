use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::block::CommittedBlock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncReceipt {
    pub block_id: String,
    pub external_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncFailure {
    pub block_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncReport {
    pub attempted: bool,
    pub receipts: Vec<SyncReceipt>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Pushes committed blocks to an external calendar.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn push_block(&self, user_id: &str, block: &CommittedBlock) -> AppResult<SyncReceipt>;
}

/// Pushes every block through `sync`, collecting receipts and failures.
/// A failing block never stops the rest.
pub async fn push_all(
    sync: &dyn CalendarSync,
    user_id: &str,
    blocks: &[CommittedBlock],
) -> SyncReport {
    let mut report = SyncReport {
        attempted: true,
        ..SyncReport::default()
    };
    for block in blocks {
        match sync.push_block(user_id, block).await {
            Ok(receipt) => report.receipts.push(receipt),
            Err(err) => {
                warn!(
                    target: "app::calendar",
                    user_id = %user_id,
                    block_id = %block.id,
                    error = %err,
                    "calendar push failed"
                );
                report.failures.push(SyncFailure {
                    block_id: block.id.clone(),
                    message: err.to_string(),
                });
            }
        }
    }
    report
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    user_id: &'a str,
    block: &'a CommittedBlock,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    id: Option<JsonValue>,
}

/// Posts each block as JSON to a configured URL.
pub struct WebhookCalendarSync {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookCalendarSync {
    pub fn try_new(endpoint: &str, timeout: StdDuration) -> AppResult<Self> {
        if endpoint.trim().is_empty() {
            return Err(AppError::validation("日历同步地址不能为空"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::other(format!("初始化日历同步客户端失败: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim().to_string(),
        })
    }
}

#[async_trait]
impl CalendarSync for WebhookCalendarSync {
    async fn push_block(&self, user_id: &str, block: &CommittedBlock) -> AppResult<SyncReceipt> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&WebhookPayload { user_id, block })
            .send()
            .await
            .map_err(|err| AppError::calendar_sync(format!("推送日历时间块时网络异常: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AppError::calendar_sync(format!("读取日历推送响应失败: {err}")))?;

        if !status.is_success() {
            return Err(AppError::calendar_sync(format!(
                "日历 Webhook 返回错误状态码 {}",
                status.as_u16()
            )));
        }

        let external_id = serde_json::from_str::<WebhookResponse>(&body)
            .ok()
            .and_then(|parsed| parsed.id)
            .map(|id| match id {
                JsonValue::String(value) => value,
                other => other.to_string(),
            })
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("webhook:{}", block.id));

        debug!(target: "app::calendar", block_id = %block.id, external_id = %external_id, "block pushed");
        Ok(SyncReceipt {
            block_id: block.id.clone(),
            external_id,
        })
    }
}
