use std::collections::HashMap;
use std::sync::Arc;

use super::service::{ServiceDescriptor, ServiceRole};
use crate::error::{AgentError, Result};

/// Immutable composition of service descriptors with designated input and
/// responder stages.
///
/// The graph is always input → parallel branches → selector → responder,
/// with the branch and selector layers optional. Validation runs once in
/// [`PipelineBuilder::build`], not at dispatch time.
#[derive(Debug, Clone)]
pub struct Pipeline {
    services: HashMap<String, Arc<ServiceDescriptor>>,
    input: Arc<ServiceDescriptor>,
    responder: Arc<ServiceDescriptor>,
    selector: Option<Arc<ServiceDescriptor>>,
    branches: Vec<Arc<ServiceDescriptor>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn input(&self) -> &Arc<ServiceDescriptor> {
        &self.input
    }

    pub fn responder(&self) -> &Arc<ServiceDescriptor> {
        &self.responder
    }

    pub fn selector(&self) -> Option<&Arc<ServiceDescriptor>> {
        self.selector.as_ref()
    }

    /// Parallel annotator/skill stages between input and selector
    pub fn branches(&self) -> &[Arc<ServiceDescriptor>] {
        &self.branches
    }

    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|s| s.name())
    }

    /// All stages, for queue construction
    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.values()
    }

    /// Stages that become dispatchable once `completed` finishes.
    ///
    /// Fan-out: input completion yields every parallel branch at once.
    /// Fan-in readiness (all branches done before the selector) is the
    /// agent's call, since it owns the accumulated results; this method only
    /// encodes the graph shape. Absent layers are skipped, so a pipeline
    /// with no branches and no selector degenerates to input → responder.
    pub fn next_stages(&self, completed: &str) -> Vec<Arc<ServiceDescriptor>> {
        let Some(service) = self.services.get(completed) else {
            return Vec::new();
        };

        if service.has_role(ServiceRole::Responder) {
            return Vec::new();
        }
        if service.has_role(ServiceRole::Selector) {
            return vec![self.responder.clone()];
        }
        if service.is_branch() {
            return vec![self.after_branches()];
        }
        // Input stage: fan out to the branches, or fall through to the
        // selector/responder when there are none
        if self.branches.is_empty() {
            vec![self.after_branches()]
        } else {
            self.branches.to_vec()
        }
    }

    /// The stage fan-in feeds: the selector when present, else the responder
    pub fn after_branches(&self) -> Arc<ServiceDescriptor> {
        self.selector
            .clone()
            .unwrap_or_else(|| self.responder.clone())
    }
}

/// Builder that validates the pipeline graph once at construction
#[derive(Default)]
pub struct PipelineBuilder {
    input: Option<ServiceDescriptor>,
    responder: Option<ServiceDescriptor>,
    services: Vec<ServiceDescriptor>,
}

impl PipelineBuilder {
    /// Set the single input stage
    pub fn input_service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.input = Some(descriptor);
        self
    }

    /// Set the single responder stage
    pub fn responder_service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.responder = Some(descriptor);
        self
    }

    /// Add an annotator, skill, or selector stage
    pub fn service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let input = self.input.ok_or_else(|| AgentError::PipelineValidation {
            message: "exactly one input stage is required".to_string(),
        })?;
        let responder = self
            .responder
            .ok_or_else(|| AgentError::PipelineValidation {
                message: "exactly one responder stage is required".to_string(),
            })?;

        if !input.has_role(ServiceRole::Input) {
            return Err(AgentError::PipelineValidation {
                message: format!("input stage '{}' must carry the input role", input.name()),
            });
        }
        if !responder.has_role(ServiceRole::Responder) {
            return Err(AgentError::PipelineValidation {
                message: format!(
                    "responder stage '{}' must carry the responder role",
                    responder.name()
                ),
            });
        }

        let input = Arc::new(input);
        let responder = Arc::new(responder);

        let mut services: HashMap<String, Arc<ServiceDescriptor>> = HashMap::new();
        let mut selector: Option<Arc<ServiceDescriptor>> = None;
        let mut branches: Vec<Arc<ServiceDescriptor>> = Vec::new();

        for descriptor in [input.clone(), responder.clone()]
            .into_iter()
            .chain(self.services.into_iter().map(Arc::new))
        {
            if descriptor.concurrency_limit() == 0 {
                return Err(AgentError::PipelineValidation {
                    message: format!(
                        "stage '{}' concurrency limit must be greater than 0",
                        descriptor.name()
                    ),
                });
            }
            if services
                .insert(descriptor.name().to_string(), descriptor.clone())
                .is_some()
            {
                return Err(AgentError::PipelineValidation {
                    message: format!("duplicate stage name '{}'", descriptor.name()),
                });
            }

            if descriptor.has_role(ServiceRole::Selector) {
                if selector.is_some() {
                    return Err(AgentError::PipelineValidation {
                        message: "at most one selector stage is supported".to_string(),
                    });
                }
                selector = Some(descriptor.clone());
            } else if descriptor.is_branch() {
                branches.push(descriptor.clone());
            } else if !descriptor.has_role(ServiceRole::Input)
                && !descriptor.has_role(ServiceRole::Responder)
            {
                return Err(AgentError::PipelineValidation {
                    message: format!("stage '{}' carries no recognized role", descriptor.name()),
                });
            }
        }

        // Stable fan-out order for logging; arrival order stays undefined
        branches.sort_by(|a, b| a.name().cmp(b.name()));

        Ok(Pipeline {
            services,
            input,
            responder,
            selector,
            branches,
        })
    }
}
