use async_trait::async_trait;
use gencore::sampling::{run_samples, FanOut};
use gencore::{NodeContext, NodeError, PortDefinition, RunOutcome, Runner, RunnerMetadata, Value};
use serde::Serialize;
use std::collections::HashMap;

/// Generic remote runner: POSTs each sample request as JSON to the node's
/// `endpoint` and keeps the JSON response as the sample.
///
/// Vendor specifics stay on the other side of the endpoint. Requests already
/// sent are allowed to finish when the node is canceled.
pub struct HttpRunner {
    client: reqwest::Client,
    fan_out: FanOut,
}

#[derive(Serialize)]
struct SampleRequest<'a> {
    node_id: &'a str,
    kind: &'a str,
    prompt: &'a str,
    sample_index: u32,
    inputs: &'a HashMap<String, Value>,
}

impl HttpRunner {
    pub fn new(fan_out: FanOut) -> Self {
        Self {
            client: reqwest::Client::new(),
            fan_out,
        }
    }

    async fn request(&self, ctx: &NodeContext, endpoint: &str, sample_index: u32) -> Result<Value, NodeError> {
        let body = SampleRequest {
            node_id: ctx.node_id(),
            kind: ctx.node.kind.as_str(),
            prompt: ctx.node.prompt(),
            sample_index,
            inputs: &ctx.inputs,
        };

        let mut request = self.client.post(endpoint).json(&body);
        if let Some(Value::Object(headers)) = ctx.node.config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NodeError::ExecutionFailed(format!(
                "endpoint returned {}: {}",
                status.as_u16(),
                detail.trim()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        Ok(Value::from(json))
    }
}

impl Default for HttpRunner {
    fn default() -> Self {
        Self::new(FanOut::Sequential)
    }
}

#[async_trait]
impl Runner for HttpRunner {
    fn name(&self) -> &str {
        "http.generate"
    }

    async fn execute(&self, ctx: NodeContext) -> RunOutcome {
        let endpoint = match ctx.require_config("endpoint").map(|v| v.as_str().map(str::to_string)) {
            Ok(Some(endpoint)) if !endpoint.is_empty() => endpoint,
            Ok(_) => {
                return fail_before_start(&ctx, NodeError::Configuration("endpoint must be a URL string".to_string()))
            }
            Err(e) => return fail_before_start(&ctx, e),
        };

        run_samples(&ctx, self.fan_out, |index| self.request(&ctx, &endpoint, index)).await
    }

    fn metadata(&self) -> RunnerMetadata {
        RunnerMetadata {
            description: "POST generation requests to a remote JSON endpoint".to_string(),
            category: "remote".to_string(),
            inputs: vec![],
            outputs: vec![
                PortDefinition::new("output", "First response body", true),
                PortDefinition::new("samples", "All response bodies", true),
            ],
        }
    }
}

/// Configuration problems surface as a node error, going through `running`
/// like any other failure. Empty prompts still take the skip path.
fn fail_before_start(ctx: &NodeContext, error: NodeError) -> RunOutcome {
    if ctx.node.prompt().is_empty() {
        let reason = "skipped: prompt is empty".to_string();
        ctx.reporter.log(&reason);
        return RunOutcome::Skipped { reason };
    }
    if !ctx.reporter.start() {
        return RunOutcome::Canceled;
    }
    tracing::warn!("Node {} misconfigured: {}", ctx.node_id(), error);
    ctx.reporter.fail(error)
}
