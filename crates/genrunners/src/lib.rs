//! Built-in runners
//!
//! Mock generators for every node kind plus a generic HTTP runner for
//! remote backends.

mod http;
mod media;
mod mock;
mod text;

pub use http::HttpRunner;
pub use media::MediaRunner;
pub use text::TextRunner;

use gencore::NodeKind;
use genruntime::RunnerRegistry;
use std::sync::Arc;

/// Register the mock runner for every node kind.
pub fn register_all(registry: &mut RunnerRegistry) {
    registry.register(NodeKind::Text, Arc::new(TextRunner));
    registry.register(NodeKind::Image, Arc::new(MediaRunner::image()));
    registry.register(NodeKind::Video, Arc::new(MediaRunner::video()));
    registry.register(NodeKind::Speech, Arc::new(MediaRunner::speech()));
}

/// Route `kinds` to a shared [`HttpRunner`], replacing their mock runners.
pub fn register_remote(registry: &mut RunnerRegistry, kinds: &[NodeKind]) {
    let runner = Arc::new(HttpRunner::default());
    for kind in kinds {
        registry.register(*kind, runner.clone());
    }
}
