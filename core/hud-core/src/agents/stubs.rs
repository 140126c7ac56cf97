//! Stub adapters for CLIs without an integration yet; always report not installed.

use super::types::{AdapterError, AgentSession};
use super::AgentAdapter;

macro_rules! stub_adapter {
    ($name:ident, $id:expr, $display_name:expr) => {
        pub struct $name;

        impl $name {
            pub fn new() -> Self {
                Self
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AgentAdapter for $name {
            fn id(&self) -> &'static str {
                $id
            }

            fn display_name(&self) -> &'static str {
                $display_name
            }

            fn is_installed(&self) -> bool {
                false
            }

            fn detect_session(
                &self,
                _project_path: &str,
            ) -> Result<Option<AgentSession>, AdapterError> {
                Ok(None)
            }
        }
    };
}

stub_adapter!(CodexAdapter, "codex", "OpenAI Codex");
stub_adapter!(AiderAdapter, "aider", "Aider");
stub_adapter!(AmpAdapter, "amp", "Amp");
stub_adapter!(OpenCodeAdapter, "opencode", "OpenCode");
stub_adapter!(DroidAdapter, "droid", "Droid");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;

    fn assert_stub(adapter: &dyn AgentAdapter, agent: AgentType) {
        assert_eq!(adapter.id(), agent.id());
        assert_eq!(adapter.display_name(), agent.display_name());
        assert!(!adapter.is_installed());
        assert!(adapter.detect_session("/project").unwrap().is_none());
        assert!(adapter.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_stubs_match_agent_types() {
        assert_stub(&CodexAdapter::new(), AgentType::Codex);
        assert_stub(&AiderAdapter::new(), AgentType::Aider);
        assert_stub(&AmpAdapter::new(), AgentType::Amp);
        assert_stub(&OpenCodeAdapter::new(), AgentType::OpenCode);
        assert_stub(&DroidAdapter::new(), AgentType::Droid);
    }
}
