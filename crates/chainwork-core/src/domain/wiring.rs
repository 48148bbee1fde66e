//! Wiring: how a predecessor's output becomes a successor's input.
//!
//! Wiring is data, not a closure, so it can be persisted with the task record
//! and re-applied after a restart.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::contract::Contract;
use super::payload::{Payload, ValueType};

/// Which side wins when the seed and an upstream output carry the same field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Upstream output replaces seed fields.
    #[default]
    Overwrite,

    /// Seed fields are kept; upstream only fills the gaps.
    KeepSeed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wiring {
    #[serde(default)]
    pub merge: MergePolicy,

    /// upstream field name -> field name in this task's input.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renames: BTreeMap<String, String>,
}

impl Wiring {
    pub fn keep_seed() -> Self {
        Self {
            merge: MergePolicy::KeepSeed,
            renames: BTreeMap::new(),
        }
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    fn target_name<'a>(&'a self, upstream_field: &'a str) -> &'a str {
        self.renames
            .get(upstream_field)
            .map(String::as_str)
            .unwrap_or(upstream_field)
    }

    /// Build the concrete input from the seed and the upstream outputs, in
    /// `depends_on` order.
    pub fn apply(&self, seed: &Payload, upstream: &[Payload]) -> Payload {
        let mut input = seed.clone();
        let overwrite = self.merge == MergePolicy::Overwrite;
        for output in upstream {
            let renamed: Payload = output
                .iter()
                .map(|(k, v)| (self.target_name(k).to_string(), v.clone()))
                .collect();
            input.merge_from(&renamed, overwrite);
        }
        input
    }

    /// The fields (and their types) this wiring will make available, given
    /// the seed and the declared upstream output contracts.
    pub fn available_fields(
        &self,
        seed: &Payload,
        upstream: &[&Contract],
    ) -> HashMap<String, ValueType> {
        let mut fields: HashMap<String, ValueType> = seed
            .iter()
            .map(|(k, v)| (k.to_string(), v.value_type()))
            .collect();
        let overwrite = self.merge == MergePolicy::Overwrite;
        for contract in upstream {
            for spec in contract.fields() {
                let name = self.target_name(&spec.name).to_string();
                if overwrite || !fields.contains_key(&name) {
                    fields.insert(name, spec.ty);
                }
            }
        }
        fields
    }
}

/// Seed input plus wiring for one step of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBuilder {
    pub seed: Payload,
    pub wiring: Wiring,
}

impl InputBuilder {
    /// Input entirely produced by the predecessor.
    pub fn upstream() -> Self {
        Self::default()
    }

    pub fn seeded(seed: Payload) -> Self {
        Self {
            seed,
            wiring: Wiring::default(),
        }
    }

    pub fn with_wiring(mut self, wiring: Wiring) -> Self {
        self.wiring = wiring;
        self
    }
}
