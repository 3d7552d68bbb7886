//! Read-only traversal of the pipeline tree for diagnostics.

use std::fmt::Write as _;

use conduit_core::MessageType;

/// One node visited during inspection.
#[derive(Debug, Clone, Copy)]
pub enum PipelineNode<'a> {
    /// The inbound pipeline itself.
    Root { routers: usize },
    /// A router holding every sink for one message shape.
    Router { message_type: MessageType, sinks: usize },
    /// A leaf sink.
    Sink {
        message_type: MessageType,
        description: &'a str,
    },
}

/// Visitor over the pipeline tree.
///
/// Returning `false` from [`inspect`](Self::inspect) stops the walk.
pub trait PipelineInspector {
    fn inspect(&mut self, node: &PipelineNode<'_>) -> bool;

    /// Called before the children of the last inspected node are visited.
    fn descend(&mut self) {}

    /// Called after the children of a node have been visited.
    fn ascend(&mut self) {}
}

/// Renders the pipeline as an indented text tree.
#[derive(Debug, Default)]
pub struct PipelineViewer {
    depth: usize,
    text: String,
}

impl PipelineViewer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rendered tree.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

impl PipelineInspector for PipelineViewer {
    fn inspect(&mut self, node: &PipelineNode<'_>) -> bool {
        let indent = "  ".repeat(self.depth);
        let _ = match node {
            PipelineNode::Root { routers } => {
                writeln!(self.text, "{indent}Pipeline ({routers} routers)")
            }
            PipelineNode::Router { message_type, sinks } => writeln!(
                self.text,
                "{indent}Routed ({}) [{sinks} sinks]",
                message_type.short_name()
            ),
            PipelineNode::Sink {
                message_type,
                description,
            } => writeln!(
                self.text,
                "{indent}{description} ({})",
                message_type.short_name()
            ),
        };
        true
    }

    fn descend(&mut self) {
        self.depth += 1;
    }

    fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}
