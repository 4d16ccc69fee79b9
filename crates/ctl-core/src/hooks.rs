//! Lifecycle hooks for compile and sync stages
//!
//! Callers register callbacks against a [`Stage`]. Each callback receives the
//! tree as it stands at that point (and the generated entities once they
//! exist) and may modify both. Stages without callbacks are skipped.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::GeneratedEntity;
use crate::error::{Error, Result};

/// Points in the compile/sync lifecycle where hooks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before anything is read
    Initialization,
    /// Raw documents merged, nothing validated
    Load,
    /// Defaults filled by the first pre-substitution validation
    LoadValidation,
    /// Augmentation steps have run
    Augmentation,
    /// Augmented tree passed pre-substitution validation
    AugmentationValidation,
    /// Templates resolved and transient keys stripped
    Templating,
    /// Resolved tree passed post-substitution validation
    TemplatingValidation,
    /// Entities generated and classified
    OutputGeneration,
    /// About to apply the change plan
    Synchronization,
    /// Plan applied
    Finalization,
}

impl Stage {
    /// Every stage, in execution order.
    pub fn all() -> &'static [Stage] {
        &[
            Self::Initialization,
            Self::Load,
            Self::LoadValidation,
            Self::Augmentation,
            Self::AugmentationValidation,
            Self::Templating,
            Self::TemplatingValidation,
            Self::OutputGeneration,
            Self::Synchronization,
            Self::Finalization,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Load => "load",
            Self::LoadValidation => "load_validation",
            Self::Augmentation => "augmentation",
            Self::AugmentationValidation => "augmentation_validation",
            Self::Templating => "templating",
            Self::TemplatingValidation => "templating_validation",
            Self::OutputGeneration => "output_generation",
            Self::Synchronization => "synchronization",
            Self::Finalization => "finalization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// What a hook callback may read and modify
pub struct HookPayload<'a> {
    pub stage: Stage,
    pub tree: &'a mut Value,
    /// Empty until `output_generation`
    pub entities: &'a mut Vec<GeneratedEntity>,
}

/// A registered callback
pub type HookFn = Box<dyn Fn(&mut HookPayload<'_>) -> std::result::Result<(), String>>;

/// Stage to ordered callbacks
#[derive(Default)]
pub struct HookTable {
    hooks: HashMap<Stage, Vec<HookFn>>,
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(Stage, usize)> =
            self.hooks.iter().map(|(s, h)| (*s, h.len())).collect();
        counts.sort();
        f.debug_struct("HookTable").field("hooks", &counts).finish()
    }
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to `stage`.
    pub fn register<F>(&mut self, stage: Stage, hook: F)
    where
        F: Fn(&mut HookPayload<'_>) -> std::result::Result<(), String> + 'static,
    {
        self.hooks.entry(stage).or_default().push(Box::new(hook));
    }

    pub fn with<F>(mut self, stage: Stage, hook: F) -> Self
    where
        F: Fn(&mut HookPayload<'_>) -> std::result::Result<(), String> + 'static,
    {
        self.register(stage, hook);
        self
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.hooks.get(&stage).map_or(0, Vec::len)
    }

    /// Run every callback for `stage` in registration order.
    ///
    /// The first failure stops the stage and is returned as [`Error::Hook`].
    pub fn run(
        &self,
        stage: Stage,
        tree: &mut Value,
        entities: &mut Vec<GeneratedEntity>,
    ) -> Result<()> {
        let Some(hooks) = self.hooks.get(&stage) else {
            return Ok(());
        };

        tracing::debug!(%stage, count = hooks.len(), "Running hooks");
        let mut payload = HookPayload {
            stage,
            tree,
            entities,
        };
        for hook in hooks {
            hook(&mut payload).map_err(|message| Error::Hook { stage, message })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::all() {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), *stage);
        }
        assert!("post_sync".parse::<Stage>().is_err());
    }

    #[test]
    fn unregistered_stage_is_a_noop() {
        let table = HookTable::new();
        let mut tree = json!({"a": 1});
        table.run(Stage::Load, &mut tree, &mut Vec::new()).unwrap();
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn hooks_run_in_order_and_mutate_tree() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&seen);
        let second = Rc::clone(&seen);

        let table = HookTable::new()
            .with(Stage::Templating, move |payload| {
                first.borrow_mut().push("first");
                payload.tree["flag"] = json!(true);
                Ok(())
            })
            .with(Stage::Templating, move |payload| {
                second.borrow_mut().push("second");
                assert_eq!(payload.tree["flag"], json!(true));
                Ok(())
            });

        let mut tree = json!({});
        table.run(Stage::Templating, &mut tree, &mut Vec::new()).unwrap();
        assert_eq!(*seen.borrow(), ["first", "second"]);
        assert_eq!(table.count(Stage::Templating), 2);
        assert_eq!(table.count(Stage::Load), 0);
    }

    #[test]
    fn failure_names_the_stage() {
        let table = HookTable::new()
            .with(Stage::LoadValidation, |_| Err("missing license".into()))
            .with(Stage::LoadValidation, |_| panic!("must not run after a failure"));

        let err = table
            .run(Stage::LoadValidation, &mut json!({}), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "Hook failed during load_validation: missing license");
    }
}
