//! Execution references.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::ExecutionId;

/// The two flavours of execution a runner can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Pipeline,
    Orchestration,
}

impl ExecutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionType::Pipeline => "pipeline",
            ExecutionType::Orchestration => "orchestration",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to pipeline run state owned elsewhere.
///
/// The queue only copies this into messages; it never reads or changes the
/// execution it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub execution_type: ExecutionType,
    pub application: String,
}

impl Execution {
    pub fn new(id: ExecutionId, execution_type: ExecutionType, application: impl Into<String>) -> Self {
        Self {
            id,
            execution_type,
            application: application.into(),
        }
    }

    pub fn pipeline(application: impl Into<String>) -> Self {
        Self::new(ExecutionId::generate(), ExecutionType::Pipeline, application)
    }

    pub fn orchestration(application: impl Into<String>) -> Self {
        Self::new(ExecutionId::generate(), ExecutionType::Orchestration, application)
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.execution_type, self.id)
    }
}

/// Identifier of a stage inside an execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
