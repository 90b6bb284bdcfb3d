
pub use classes::*;

use std::sync::{Arc, Mutex};

use crate::{
    assembly::{Instruction, LabelAllocator},
    logger::Logger,
    patch::TransformContext,
};

/// Logger that records every message, for asserting on diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RecordingLogger {
    pub messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingLogger {
    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.contains(needle))
    }
}

impl Logger for RecordingLogger {
    fn log(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Label allocator positioned after `used` labels, for hand-written event lists.
pub fn labels_after(used: u32) -> LabelAllocator {
    let mut labels = LabelAllocator::new();
    for _ in 0..used {
        labels.allocate();
    }
    labels
}

/// Builds a [`TransformContext`] for a method of `CachedIntrospectionResults`-like shape.
pub fn context<'a>(
    method_name: &'a str,
    labels: &'a mut LabelAllocator,
    logger: &'a dyn Logger,
) -> TransformContext<'a> {
    TransformContext {
        class_name: "org/springframework/beans/CachedIntrospectionResults",
        method_name,
        descriptor: "(Ljava/lang/Class;)V",
        labels,
        logger,
    }
}

/// Counts events equal to `needle`.
pub fn count(events: &[Instruction], needle: &Instruction) -> usize {
    events.iter().filter(|event| *event == needle).count()
}
