//! HTTP call execution.
//!
//! `exec_command` is the URL. GET when `exec_params` is empty, otherwise
//! POST with the params form-encoded. Client timeouts derive from the
//! remaining deadline; success is any 2xx status.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use super::ExecutionStrategy;
use crate::runner::ExecutionContext;
use crate::task::{TaskResult, TaskStatus};

/// Client timeout applied when the task has no deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpCallStrategy;

#[async_trait]
impl ExecutionStrategy for HttpCallStrategy {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult {
        let cfg = ctx.cfg;
        let start = Instant::now();

        if cfg.exec_command.is_empty() {
            return ctx.fail("empty http url");
        }
        if ctx.is_canceled() {
            return ctx.canceled("canceled before http call");
        }
        if ctx.is_timeout() {
            return ctx.timeout("timeout before http call");
        }
        if !cfg.exec_command.starts_with("http://") && !cfg.exec_command.starts_with("https://") {
            return ctx.fail(format!("unsupported or invalid url: {}", cfg.exec_command));
        }

        let timeout = ctx.remaining().unwrap_or(DEFAULT_TIMEOUT);
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => return ctx.fail(format!("http client build failed: {e}")),
        };

        let response = if cfg.exec_params.is_empty() {
            client.get(&cfg.exec_command).send().await
        } else {
            client.post(&cfg.exec_command).form(&cfg.exec_params).send().await
        };

        let mut r = TaskResult::default();
        match response {
            Ok(resp) => {
                let status = resp.status();
                if cfg.capture_output {
                    r.stdout = resp.text().await.unwrap_or_default();
                }
                if status.is_success() {
                    r.status = TaskStatus::Success;
                } else {
                    r.status = TaskStatus::Failed;
                    r.message = format!("http status {}", status.as_u16());
                    if status.is_server_error() {
                        // 5xx stays retry-eligible for the remote path.
                        r.metadata.insert("retryable".into(), "true".into());
                    }
                }
            }
            Err(e) if e.is_timeout() && ctx.deadline().is_some() => {
                r.status = TaskStatus::Timeout;
                r.message = "http call timed out".into();
            }
            Err(e) if ctx.is_canceled() => {
                r.status = TaskStatus::Canceled;
                r.message = format!("canceled during http call: {e}");
            }
            Err(e) => {
                r.status = TaskStatus::Failed;
                r.message = format!("http error: {e}");
                r.metadata.insert("retryable".into(), "true".into());
            }
        }

        r.duration_ms = start.elapsed().as_millis() as i64;
        info!(task = %cfg.id, status = r.status.as_str(), "http call finished");
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CancelToken;
    use crate::task::TaskConfig;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_cfg(url: String) -> TaskConfig {
        let mut cfg = TaskConfig::new("http-test");
        cfg.exec_command = url;
        cfg
    }

    #[tokio::test]
    async fn get_on_2xx_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let cfg = http_cfg(format!("{}/ping", server.uri()));
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = HttpCallStrategy.execute(&ctx).await;
        assert!(r.ok());
        assert_eq!(r.stdout, "pong");
    }

    #[tokio::test]
    async fn params_switch_to_form_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(body_string_contains("key=value"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let mut cfg = http_cfg(format!("{}/submit", server.uri()));
        cfg.exec_params.insert("key".into(), "value".into());
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = HttpCallStrategy.execute(&ctx).await;
        assert!(r.ok());
    }

    #[tokio::test]
    async fn server_error_is_retryable_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let cfg = http_cfg(server.uri());
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = HttpCallStrategy.execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.metadata.get("retryable").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn deadline_produces_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let cfg = http_cfg(server.uri());
        let deadline = Instant::now() + Duration::from_millis(100);
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), Some(deadline));
        let r = HttpCallStrategy.execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn bad_scheme_rejected() {
        let cfg = http_cfg("ftp://example.com".into());
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = HttpCallStrategy.execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Failed);
    }
}
