use std::sync::mpsc;

use crate::PipelineEvent;

/// Receives pipeline progress and output records as they happen.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

pub struct ChannelEventSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: PipelineEvent) {}
}
