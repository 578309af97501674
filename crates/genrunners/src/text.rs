use crate::mock::{compose_prompt, generate, MockSettings};
use async_trait::async_trait;
use gencore::sampling::{run_samples, FanOut};
use gencore::{NodeContext, NodeKind, PortDefinition, RunOutcome, Runner, RunnerMetadata};

/// Mock text generator. Variants are independent, so samples go out in
/// parallel.
pub struct TextRunner;

#[async_trait]
impl Runner for TextRunner {
    fn name(&self) -> &str {
        "text.generate"
    }

    async fn execute(&self, ctx: NodeContext) -> RunOutcome {
        let settings = MockSettings::from_context(&ctx, 50);
        let prompt = compose_prompt(&ctx);

        run_samples(&ctx, FanOut::Parallel, |index| {
            generate(NodeKind::Text, &prompt, index, settings)
        })
        .await
    }

    fn metadata(&self) -> RunnerMetadata {
        RunnerMetadata {
            description: "Generate text variants from a prompt".to_string(),
            category: "text".to_string(),
            inputs: vec![PortDefinition::new("context", "Text prepended to the prompt", false)],
            outputs: vec![
                PortDefinition::new("output", "First generated variant", true),
                PortDefinition::new("samples", "All generated variants", true),
            ],
        }
    }
}
