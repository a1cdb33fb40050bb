use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, SolverErrorCode};
use crate::models::planner::PlannerRequest;
use crate::models::settings::PlannerSettings;
use crate::services::retry::{with_backoff, DEFAULT_BACKOFF};

const SOLVE_PATH: &str = "/timeTable/admin/solve-day";
const CORRELATION_HEADER: &str = "x-correlation-id";

/// Acknowledgement for an accepted submission. The plan itself arrives later
/// through the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub singleton_id: String,
    pub correlation_id: String,
    pub status: u16,
    pub attempts: usize,
}

#[async_trait]
pub trait PlannerSolver: Send + Sync {
    async fn submit(&self, request: &PlannerRequest) -> AppResult<SubmissionReceipt>;
}

#[derive(Debug, Clone)]
struct SolverClientConfig {
    base_url: String,
    username: String,
    password: String,
    http_timeout: StdDuration,
    submit_deadline: StdDuration,
    backoff: Vec<StdDuration>,
}

impl SolverClientConfig {
    fn from_settings(settings: &PlannerSettings) -> Self {
        Self {
            base_url: settings.solver_base_url.trim_end_matches('/').to_string(),
            username: settings.solver_username.clone(),
            password: settings.solver_password.clone(),
            http_timeout: settings.http_timeout,
            submit_deadline: settings.submit_deadline,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolverErrorBody {
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpSolverClient {
    client: reqwest::Client,
    endpoint: String,
    config: SolverClientConfig,
}

impl HttpSolverClient {
    pub fn try_new(settings: &PlannerSettings) -> AppResult<Self> {
        Self::with_config(SolverClientConfig::from_settings(settings))
    }

    fn with_config(config: SolverClientConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Some(StdDuration::from_secs(90)))
            .build()
            .map_err(|err| AppError::other(format!("初始化求解器 HTTP 客户端失败: {err}")))?;
        let endpoint = format!("{}{}", config.base_url, SOLVE_PATH);

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_once(
        &self,
        request: &PlannerRequest,
        correlation_id: &str,
        attempt: usize,
    ) -> AppResult<u16> {
        debug!(
            target: "app::solver",
            singleton_id = %request.singleton_id,
            correlation_id = %correlation_id,
            attempt = attempt + 1,
            parts = request.event_parts.len(),
            timeslots = request.timeslots.len(),
            "submitting plan to solver"
        );

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(CORRELATION_HEADER, correlation_id)
            .json(request)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    debug!(
                        target: "app::solver",
                        correlation_id = %correlation_id,
                        latency_ms = start.elapsed().as_millis() as u64,
                        status = status.as_u16(),
                        "solver accepted plan"
                    );
                    return Ok(status.as_u16());
                }

                let detail = resp
                    .json::<SolverErrorBody>()
                    .await
                    .ok()
                    .and_then(|body| body.message);
                let (error, retryable) = map_http_error(status, correlation_id, detail.as_deref());
                warn!(
                    target: "app::solver",
                    correlation_id = %correlation_id,
                    status = status.as_u16(),
                    retryable,
                    "solver returned non-success status"
                );
                Err(error)
            }
            Err(err) => {
                let (error, retryable) = error_from_reqwest(err, correlation_id);
                warn!(
                    target: "app::solver",
                    correlation_id = %correlation_id,
                    retryable,
                    "solver request failed"
                );
                Err(error)
            }
        }
    }
}

#[async_trait]
impl PlannerSolver for HttpSolverClient {
    async fn submit(&self, request: &PlannerRequest) -> AppResult<SubmissionReceipt> {
        let correlation_id = Uuid::new_v4().to_string();
        let mut attempts = 0;

        let submission = with_backoff("solver.submit", &self.config.backoff, |attempt| {
            attempts = attempt + 1;
            self.post_once(request, &correlation_id, attempt)
        });

        let status = match timeout(self.config.submit_deadline, submission).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::solver(
                    SolverErrorCode::DeadlineExceeded,
                    format!(
                        "求解器提交超过截止时间 ({} 秒)",
                        self.config.submit_deadline.as_secs()
                    ),
                    false,
                    Some(correlation_id.as_str()),
                    None,
                ));
            }
        };

        info!(
            target: "app::solver",
            singleton_id = %request.singleton_id,
            correlation_id = %correlation_id,
            attempts,
            "plan submitted"
        );

        Ok(SubmissionReceipt {
            singleton_id: request.singleton_id.clone(),
            correlation_id,
            status,
            attempts,
        })
    }
}

fn map_http_error(
    status: StatusCode,
    correlation_id: &str,
    detail: Option<&str>,
) -> (AppError, bool) {
    let code = status.as_u16();
    let with_detail = |message: String| match detail {
        Some(detail) => format!("{message}: {detail}"),
        None => message,
    };
    let (solver_code, message, retryable) = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => (
            SolverErrorCode::Unauthorized,
            with_detail("求解器认证失败".to_string()),
            false,
        ),
        StatusCode::TOO_MANY_REQUESTS => (
            SolverErrorCode::RateLimited,
            with_detail("求解器请求过于频繁，请稍后重试".to_string()),
            true,
        ),
        status if status.is_server_error() => (
            SolverErrorCode::Unavailable,
            with_detail(format!("求解器暂时不可用 (状态码 {code})")),
            true,
        ),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => (
            SolverErrorCode::InvalidRequest,
            with_detail("求解器拒绝了排程请求".to_string()),
            false,
        ),
        StatusCode::NOT_FOUND => (
            SolverErrorCode::InvalidRequest,
            with_detail("求解器接口地址无效".to_string()),
            false,
        ),
        _ => (
            SolverErrorCode::Unknown,
            with_detail(format!("求解器返回错误状态码 {code}")),
            false,
        ),
    };

    (
        AppError::solver(solver_code, message, retryable, Some(correlation_id), Some(code)),
        retryable,
    )
}

fn error_from_reqwest(err: reqwest::Error, correlation_id: &str) -> (AppError, bool) {
    if err.is_timeout() {
        (
            AppError::solver(
                SolverErrorCode::HttpTimeout,
                "求解器请求超时",
                true,
                Some(correlation_id),
                None,
            ),
            true,
        )
    } else if err.is_connect() {
        (
            AppError::solver(
                SolverErrorCode::Unavailable,
                "求解器网络连接失败",
                true,
                Some(correlation_id),
                None,
            ),
            true,
        )
    } else if let Some(status) = err.status() {
        map_http_error(status, correlation_id, None)
    } else {
        (
            AppError::solver(
                SolverErrorCode::Unknown,
                format!("求解器请求失败: {err}"),
                false,
                Some(correlation_id),
                None,
            ),
            false,
        )
    }
}

pub mod testing {
    use super::*;

    /// Status classification used by the client, exposed for integration tests.
    pub fn map_http_error(status: StatusCode) -> (AppError, bool) {
        super::map_http_error(status, "test-correlation-id", None)
    }

    /// Client against `base_url` with the given backoff delays and deadlines.
    pub fn client_with_backoff(
        base_url: &str,
        username: &str,
        password: &str,
        backoff: Vec<StdDuration>,
        http_timeout: StdDuration,
        submit_deadline: StdDuration,
    ) -> AppResult<HttpSolverClient> {
        HttpSolverClient::with_config(SolverClientConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            http_timeout,
            submit_deadline,
            backoff,
        })
    }
}
