//! Request dispatcher — the single entry into the route surface.
//!
//! Takes the four raw call strings, gates on lifecycle, resolves a route,
//! and invokes the matched handler. Every outcome, success or failure,
//! leaves as a [`ResponseEnvelope`]; nothing propagates past this layer.

use serde_json::json;

use crate::envelope::ResponseEnvelope;
use crate::error::ServerError;
use crate::pipeline::CompletionPipeline;
use crate::request::Request;
use crate::routes::HandlerKind;
use crate::state::Context;

#[derive(Clone)]
pub struct Dispatcher {
    ctx: Context,
    pipeline: CompletionPipeline,
}

impl Dispatcher {
    pub fn new(ctx: Context) -> Self {
        let pipeline = CompletionPipeline::new(ctx.clone());
        Self { ctx, pipeline }
    }

    pub fn pipeline(&self) -> &CompletionPipeline {
        &self.pipeline
    }

    /// Dispatch one call. Synchronous from the caller's perspective: returns
    /// once the handler has a result or has registered an async job.
    pub async fn dispatch(
        &self,
        method: &str,
        path: &str,
        headers: &str,
        body: &str,
    ) -> ResponseEnvelope {
        match self.try_dispatch(method, path, headers, body).await {
            Ok(payload) => ResponseEnvelope::success(payload),
            Err(err) => {
                tracing::debug!("[Dispatcher] {} {} -> {}", method, path, err.kind());
                ResponseEnvelope::error(&err)
            }
        }
    }

    async fn try_dispatch(
        &self,
        method: &str,
        path: &str,
        headers: &str,
        body: &str,
    ) -> Result<serde_json::Value, ServerError> {
        self.ctx.lifecycle().await.check_ready()?;

        let req = Request::from_raw(method, path, headers, body)?;
        let route = self.ctx.routes.resolve(&req.method, &req.path)?;

        match route.handler {
            HandlerKind::Health => Ok(json!({
                "ok": true,
                "model": self.ctx.config.model,
            })),
            HandlerKind::Status => Ok(json!({
                "lifecycle": self.ctx.lifecycle().await,
                "jobs_in_flight": self.ctx.jobs.non_terminal_count().await,
            })),
            HandlerKind::Completion => {
                let result = self.pipeline.complete_sync(req.body_text()?).await?;
                serde_json::to_value(result)
                    .map_err(|e| ServerError::Internal(format!("payload encoding failed: {}", e)))
            }
            HandlerKind::SubmitJob => {
                let accepted = self.pipeline.submit_job(req.body_text()?).await?;
                serde_json::to_value(accepted)
                    .map_err(|e| ServerError::Internal(format!("payload encoding failed: {}", e)))
            }
            HandlerKind::JobResult => {
                let id = job_id_from_path(&req.path, None)?;
                self.pipeline.job_result(id).await
            }
            HandlerKind::CancelJob => {
                let id = job_id_from_path(&req.path, Some("/cancel"))?;
                let status = self.pipeline.cancel_job(id).await?;
                serde_json::to_value(status)
                    .map_err(|e| ServerError::Internal(format!("payload encoding failed: {}", e)))
            }
        }
    }
}

/// Extract the `{id}` segment from `/jobs/{id}` or `/jobs/{id}/cancel`.
/// Anything with extra segments falls out as `not_found`.
fn job_id_from_path<'a>(path: &'a str, suffix: Option<&str>) -> Result<&'a str, ServerError> {
    let rest = path
        .strip_prefix("/jobs/")
        .ok_or_else(|| ServerError::NotFound(format!("no route for {}", path)))?;
    let id = match suffix {
        Some(s) => rest
            .strip_suffix(s)
            .ok_or_else(|| ServerError::NotFound(format!("no route for {}", path)))?,
        None => rest,
    };
    if id.is_empty() || id.contains('/') {
        return Err(ServerError::NotFound(format!("no route for {}", path)));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::ServerConfig;
    use crate::engine::EchoEngine;
    use crate::lifecycle::Lifecycle;
    use crate::state::ServerContext;

    use super::*;

    fn dispatcher() -> Dispatcher {
        let config = ServerConfig::parse("model=test").unwrap();
        let ctx = Arc::new(ServerContext::new(
            config,
            Arc::new(EchoEngine::new(Duration::ZERO)),
        ));
        Dispatcher::new(ctx)
    }

    async fn dispatch_value(
        dispatcher: &Dispatcher,
        method: &str,
        path: &str,
        body: &str,
    ) -> serde_json::Value {
        let env = dispatcher.dispatch(method, path, "", body).await;
        serde_json::from_str(&env.to_json()).unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let d = dispatcher();
        let value = dispatch_value(&d, "GET", "/health", "").await;
        assert_eq!(value["status"], "success");
        assert_eq!(value["payload"]["ok"], true);
        assert_eq!(value["payload"]["model"], "test");
    }

    #[tokio::test]
    async fn test_status_route() {
        let d = dispatcher();
        let value = dispatch_value(&d, "GET", "/status", "").await;
        assert_eq!(value["payload"]["lifecycle"], "ready");
        assert_eq!(value["payload"]["jobs_in_flight"], 0);
    }

    #[tokio::test]
    async fn test_completion_route() {
        let d = dispatcher();
        let value = dispatch_value(&d, "POST", "/completion", r#"{"prompt":"ping pong"}"#).await;
        assert_eq!(value["status"], "success");
        assert_eq!(value["payload"]["text"], "ping pong");
    }

    #[tokio::test]
    async fn test_not_found_vs_method_not_allowed() {
        let d = dispatcher();
        let value = dispatch_value(&d, "GET", "/nope", "").await;
        assert_eq!(value["error_kind"], "not_found");

        let value = dispatch_value(&d, "POST", "/health", "").await;
        assert_eq!(value["error_kind"], "method_not_allowed");
    }

    #[tokio::test]
    async fn test_job_routes_roundtrip() {
        let d = dispatcher();
        let value = dispatch_value(&d, "POST", "/jobs", r#"{"prompt":"one two"}"#).await;
        assert_eq!(value["payload"]["accepted"], true);
        let job_id = value["payload"]["job_id"].as_str().unwrap().to_string();

        let payload = loop {
            let value = dispatch_value(&d, "GET", &format!("/jobs/{}", job_id), "").await;
            assert_eq!(value["status"], "success");
            if value["payload"]["state"] == "completed" {
                break value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(payload["payload"]["text"], "one two");

        let value = dispatch_value(&d, "GET", &format!("/jobs/{}", job_id), "").await;
        assert_eq!(value["error_kind"], "not_found");
    }

    #[tokio::test]
    async fn test_malformed_job_paths() {
        let d = dispatcher();
        let value = dispatch_value(&d, "GET", "/jobs/", "").await;
        assert_eq!(value["error_kind"], "not_found");

        let value = dispatch_value(&d, "POST", "/jobs/abc/def", "").await;
        assert_eq!(value["error_kind"], "not_found");
    }

    #[tokio::test]
    async fn test_draining_rejects_with_stopping() {
        let d = dispatcher();
        *d.ctx.lifecycle.write().await = Lifecycle::Draining;
        let value = dispatch_value(&d, "GET", "/health", "").await;
        assert_eq!(value["error_kind"], "stopping");
    }

    #[tokio::test]
    async fn test_invalid_body_wrapped_not_propagated() {
        let d = dispatcher();
        let value = dispatch_value(&d, "POST", "/completion", "not json").await;
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_kind"], "invalid_request");
    }
}
