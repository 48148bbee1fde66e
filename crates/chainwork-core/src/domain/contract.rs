//! Declared input/output contracts of task kinds.

use serde::{Deserialize, Serialize};

use super::payload::{Payload, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: ValueType,
    pub required: bool,
}

/// The set of fields a task consumes or produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    fields: Vec<FieldSpec>,
}

/// A payload that does not satisfy a contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("missing field '{0}'")]
    Missing(String),

    #[error("field '{field}' is {found}, expected {expected}")]
    WrongType {
        field: String,
        expected: ValueType,
        found: ValueType,
    },
}

impl Contract {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn type_of(&self, name: &str) -> Option<ValueType> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.ty)
    }

    /// Check a concrete payload. Extra fields are allowed.
    pub fn check(&self, payload: &Payload) -> Result<(), ContractViolation> {
        for spec in &self.fields {
            match payload.get(&spec.name) {
                None if spec.required => {
                    return Err(ContractViolation::Missing(spec.name.clone()));
                }
                None => {}
                Some(value) if value.value_type() != spec.ty => {
                    return Err(ContractViolation::WrongType {
                        field: spec.name.clone(),
                        expected: spec.ty,
                        found: value.value_type(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
