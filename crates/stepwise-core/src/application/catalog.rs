use crate::domain::instance::WorkflowName;
use crate::domain::workflow::WorkflowDefinition;
use crate::CoreError;
use dashmap::DashMap;
use std::sync::Arc;

/// Registered workflow definitions, keyed by name
#[derive(Clone, Default)]
pub struct WorkflowCatalog {
    definitions: Arc<DashMap<WorkflowName, Arc<WorkflowDefinition>>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one with the same name
    pub fn register(&self, definition: WorkflowDefinition) -> Arc<WorkflowDefinition> {
        let definition = Arc::new(definition);
        if self
            .definitions
            .insert(definition.name().clone(), definition.clone())
            .is_some()
        {
            tracing::info!(workflow = %definition.name(), "Replaced workflow definition");
        } else {
            tracing::debug!(
                workflow = %definition.name(),
                steps = definition.len(),
                "Registered workflow definition"
            );
        }
        definition
    }

    /// Look up a definition
    pub fn get(&self, name: &WorkflowName) -> Result<Arc<WorkflowDefinition>, CoreError> {
        self.definitions
            .get(name)
            .map(|d| d.value().clone())
            .ok_or_else(|| CoreError::WorkflowNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &WorkflowName) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<WorkflowName> {
        let mut names: Vec<WorkflowName> =
            self.definitions.iter().map(|e| e.key().clone()).collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }
}
