use gencore::{NodeContext, NodeError, NodeKind, Value};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

/// Knobs read from node config by the mock generators.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MockSettings {
    /// Simulated latency of one sample
    pub delay_ms: u64,
    /// 0-based sample index that fails, for exercising partial batches
    pub fail_sample: Option<u32>,
}

impl MockSettings {
    pub fn from_context(ctx: &NodeContext, default_delay_ms: u64) -> Self {
        Self {
            delay_ms: ctx
                .get_config_or("delay_ms", Value::Null)
                .as_u64()
                .unwrap_or(default_delay_ms),
            fail_sample: ctx
                .get_config_or("fail_sample", Value::Null)
                .as_u64()
                .map(|i| i as u32),
        }
    }
}

/// Prompt with any upstream `context` input prepended.
pub(crate) fn compose_prompt(ctx: &NodeContext) -> String {
    match ctx.inputs.get("context") {
        Some(context) if !context.is_null() => format!("{}\n\n{}", context, ctx.node.prompt()),
        _ => ctx.node.prompt().to_string(),
    }
}

/// Produce one fake artifact after the configured delay.
pub(crate) async fn generate(
    kind: NodeKind,
    prompt: &str,
    index: u32,
    settings: MockSettings,
) -> Result<Value, NodeError> {
    sleep(Duration::from_millis(settings.delay_ms)).await;

    if settings.fail_sample == Some(index) {
        return Err(NodeError::ExecutionFailed(format!(
            "mock {} backend rejected sample {}",
            kind,
            index + 1
        )));
    }

    let value = match kind {
        NodeKind::Text => Value::String(format!("{} (variant {})", prompt, index + 1)),
        media => {
            let mut artifact = HashMap::new();
            artifact.insert("kind".to_string(), Value::from(media.as_str()));
            artifact.insert("prompt".to_string(), Value::from(prompt));
            artifact.insert("index".to_string(), Value::from(index));
            artifact.insert(
                "uri".to_string(),
                Value::String(format!("mock://{}/{}", media, uuid::Uuid::new_v4())),
            );
            Value::Object(artifact)
        }
    };
    Ok(value)
}
