use crate::mock::{compose_prompt, generate, MockSettings};
use async_trait::async_trait;
use gencore::sampling::{run_samples, FanOut};
use gencore::{NodeContext, NodeKind, PortDefinition, RunOutcome, Runner, RunnerMetadata};

/// Mock image/video/speech generator.
///
/// Media backends are rate limited, so samples run one at a time and a
/// cancellation takes effect between samples.
pub struct MediaRunner {
    kind: NodeKind,
    name: String,
    default_delay_ms: u64,
}

impl MediaRunner {
    pub fn image() -> Self {
        Self::new(NodeKind::Image, 200)
    }

    pub fn video() -> Self {
        Self::new(NodeKind::Video, 500)
    }

    pub fn speech() -> Self {
        Self::new(NodeKind::Speech, 150)
    }

    fn new(kind: NodeKind, default_delay_ms: u64) -> Self {
        Self {
            kind,
            name: format!("{}.generate", kind),
            default_delay_ms,
        }
    }
}

#[async_trait]
impl Runner for MediaRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: NodeContext) -> RunOutcome {
        let settings = MockSettings::from_context(&ctx, self.default_delay_ms);
        let prompt = compose_prompt(&ctx);
        let kind = self.kind;

        run_samples(&ctx, FanOut::Sequential, |index| generate(kind, &prompt, index, settings)).await
    }

    fn metadata(&self) -> RunnerMetadata {
        RunnerMetadata {
            description: format!("Generate {} artifacts from a prompt", self.kind),
            category: self.kind.to_string(),
            inputs: vec![PortDefinition::new("context", "Text prepended to the prompt", false)],
            outputs: vec![
                PortDefinition::new("output", "First generated artifact", true),
                PortDefinition::new("samples", "All generated artifacts", true),
            ],
        }
    }
}
