// SPDX-License-Identifier: GPL-3.0-only

use std::sync::mpsc;

use super::OperationEvent;

/// Optional channel that receives operation events.
///
/// Sending never blocks and never fails the operation: if the receiver has gone
/// away the event is dropped.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<OperationEvent>>,
}

impl ProgressSink {
    pub fn none() -> Self {
        Self { sender: None }
    }

    pub fn channel(sender: mpsc::Sender<OperationEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn emit(&self, event: OperationEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
