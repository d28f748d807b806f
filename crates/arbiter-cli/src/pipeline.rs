//! Demo pipeline: HVAC distributor cleanup in two batches.
//!
//! 1. whether to merge distributors, and which IFC class they become
//! 2. only when merging: flow temperature and an optional project label

use arbiter_core::domain::decision::OutputTarget;
use arbiter_core::{Answer, DecisionError, DecisionId, DecisionRegistry, DecisionSpec, Step, Unit};
use arbiter_core::handler::Pipeline;
use serde::Serialize;

pub const DISTRIBUTOR_CLASSES: [&str; 3] = ["IfcPipeSegment", "HVAC-Distributor", "IfcDuctSegment"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub merge: bool,
    pub class: Option<String>,
    pub flow_temperature_k: Option<f64>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Start,
    Classify { merge: DecisionId, class: DecisionId },
    Details { merge: DecisionId, class: DecisionId },
}

pub struct HvacPipeline {
    stage: Stage,
    details: OutputTarget,
}

impl Default for HvacPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl HvacPipeline {
    pub fn new() -> Self {
        Self {
            stage: Stage::Start,
            details: OutputTarget::new(),
        }
    }

    fn summary(
        &self,
        registry: &DecisionRegistry,
        merge: DecisionId,
        class: DecisionId,
    ) -> Result<Summary, DecisionError> {
        let merge = registry.value(merge)?.and_then(Answer::as_bool).unwrap_or(false);
        let class = registry.value(class)?.and_then(Answer::as_str).map(str::to_string);
        let flow_temperature_k = self
            .details
            .get("flow_temperature")
            .flatten()
            .and_then(|a| a.as_quantity().map(|q| q.magnitude));
        let project = self
            .details
            .get("project")
            .flatten()
            .and_then(|a| a.as_str().map(str::to_string));
        Ok(Summary {
            merge,
            class,
            flow_temperature_k,
            project,
        })
    }
}

impl Pipeline for HvacPipeline {
    type Output = Summary;

    fn resume(&mut self, registry: &mut DecisionRegistry) -> Result<Step<Summary>, DecisionError> {
        match self.stage {
            Stage::Start => {
                let merge = registry.create(
                    DecisionSpec::boolean("Merge the distributors into one system?")
                        .global_key("hvac.merge")
                        .allow_save(true),
                )?;
                let class = registry.create(
                    DecisionSpec::choice("Which class should distributors get?", DISTRIBUTOR_CLASSES)
                        .global_key("hvac.distributor_class")
                        .representative_key("distributor_class")
                        .allow_save(true),
                )?;
                self.stage = Stage::Classify { merge, class };
                Ok(Step::Pending(vec![merge, class]))
            }
            Stage::Classify { merge, class } => {
                if registry.value(merge)?.and_then(Answer::as_bool) != Some(true) {
                    return self.summary(registry, merge, class).map(Step::Done);
                }
                let flow = registry.create(
                    DecisionSpec::numeric("Flow temperature", Unit::kelvin())
                        .global_key("hvac.flow_temperature")
                        .allow_save(true)
                        .validator(|a| a.as_quantity().is_some_and(|q| q.magnitude > 0.0))
                        .output(&self.details, "flow_temperature")
                        .collect(true),
                )?;
                let project = registry.create(
                    DecisionSpec::text("Project label")
                        .allow_skip(true)
                        .output(&self.details, "project")
                        .collect(true),
                )?;
                self.stage = Stage::Details { merge, class };
                Ok(Step::Pending(vec![flow, project]))
            }
            Stage::Details { merge, class } => self.summary(registry, merge, class).map(Step::Done),
        }
    }
}
