use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

/// Display lookups supplied alongside a definition by the API layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    #[serde(default)]
    pub agents: Vec<AgentSummary>,
    #[serde(default, alias = "connectedConnectorIds")]
    pub connected_connector_ids: Vec<String>,
    #[serde(default, alias = "baseWebhookUrl")]
    pub base_webhook_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
}

impl GraphContext {
    pub fn with_agent(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.agents.push(AgentSummary {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    pub fn with_connector(mut self, id: impl Into<String>) -> Self {
        self.connected_connector_ids.push(id.into());
        self
    }

    pub fn with_webhook_base(mut self, url: impl Into<String>) -> Self {
        self.base_webhook_url = url.into();
        self
    }
}

/// Hashed view over a [`GraphContext`] for repeated lookups during a projection.
pub struct ContextIndex<'a> {
    agents: AHashMap<&'a str, &'a str>,
    connectors: AHashSet<&'a str>,
    base_webhook_url: &'a str,
}

impl<'a> ContextIndex<'a> {
    pub fn new(context: &'a GraphContext) -> Self {
        Self {
            agents: context
                .agents
                .iter()
                .map(|a| (a.id.as_str(), a.name.as_str()))
                .collect(),
            connectors: context
                .connected_connector_ids
                .iter()
                .map(String::as_str)
                .collect(),
            base_webhook_url: context.base_webhook_url.trim_end_matches('/'),
        }
    }

    pub fn agent_name(&self, agent_id: &str) -> Option<&'a str> {
        self.agents.get(agent_id).copied()
    }

    /// The agent's display name, or the raw id when the context does not know it.
    pub fn display_agent(&self, agent_id: &str) -> String {
        match self.agent_name(agent_id) {
            Some(name) => name.to_string(),
            None => {
                tracing::debug!(agent_id, "agent not found in context, showing raw id");
                agent_id.to_string()
            }
        }
    }

    pub fn is_connected(&self, connector_id: &str) -> bool {
        self.connectors.contains(connector_id)
    }

    pub fn webhook_url(&self, workflow_id: &str) -> Option<String> {
        if self.base_webhook_url.is_empty() {
            None
        } else {
            Some(format!("{}/{}", self.base_webhook_url, workflow_id))
        }
    }
}
