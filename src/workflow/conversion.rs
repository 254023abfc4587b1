use super::definition::WorkflowDefinition;
use crate::context::GraphContext;
use crate::error::ConversionError;
use std::fs;

impl WorkflowDefinition {
    /// Parses a definition from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, ConversionError> {
        let definition: WorkflowDefinition = serde_json::from_str(json)
            .map_err(|e| ConversionError::JsonParseError(e.to_string()))?;
        if definition.id.trim().is_empty() {
            return Err(ConversionError::ValidationError(
                "workflow id must not be empty".to_string(),
            ));
        }
        if let Some(step) = definition.steps.iter().find(|s| s.id.trim().is_empty()) {
            return Err(ConversionError::ValidationError(format!(
                "step '{}' has an empty id",
                step.name
            )));
        }
        Ok(definition)
    }

    /// Loads a definition from a JSON file.
    pub fn from_file(path: &str) -> Result<Self, ConversionError> {
        Self::from_json(&read_file(path)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConversionError> {
        serde_json::to_string_pretty(self).map_err(|e| ConversionError::JsonParseError(e.to_string()))
    }
}

impl GraphContext {
    pub fn from_json(json: &str) -> Result<Self, ConversionError> {
        serde_json::from_str(json).map_err(|e| ConversionError::JsonParseError(e.to_string()))
    }

    pub fn from_file(path: &str) -> Result<Self, ConversionError> {
        Self::from_json(&read_file(path)?)
    }
}

pub(crate) fn read_file(path: &str) -> Result<String, ConversionError> {
    fs::read_to_string(path).map_err(|e| ConversionError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })
}
