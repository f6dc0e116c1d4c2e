// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use super::OperationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Probe,
    Commit,
}

/// One sub-step of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub operation_id: OperationId,
    pub operation: OperationKind,
    pub phase: String,
    /// 1-based index of the sub-step being reported
    pub step: u32,
    pub total_steps: u32,
    pub percent: Option<u8>,
}

impl OperationProgress {
    pub fn new(
        operation_id: OperationId,
        operation: OperationKind,
        phase: impl Into<String>,
        step: u32,
        total_steps: u32,
    ) -> Self {
        let percent = if total_steps == 0 {
            None
        } else {
            Some(((u64::from(step.min(total_steps)) * 100) / u64::from(total_steps)) as u8)
        };

        Self {
            operation_id,
            operation,
            phase: phase.into(),
            step,
            total_steps,
            percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum OperationEvent {
    Progress(OperationProgress),
    Completed {
        operation_id: OperationId,
        operation: OperationKind,
    },
    Failed {
        operation_id: OperationId,
        operation: OperationKind,
        error: String,
    },
    /// The in-memory table changed shape; `revision` increases on every change.
    TableChanged { device: String, revision: u64 },
}
