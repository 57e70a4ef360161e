//! Reassembly of streamed tool-call fragments.

use clarion_types::{ToolCallDelta, ToolCallRequest};

#[derive(Debug)]
struct PartialCall {
    id: String,
    index: Option<usize>,
    name: String,
    arguments: String,
}

/// Merges tool-call fragments into complete [`ToolCallRequest`]s.
///
/// A fragment is matched to an in-progress call:
/// 1. by `id`, when it carries one (an unseen id starts a new call)
/// 2. by `index`, when that index was seen before
/// 3. otherwise it starts the first call (with a generated id) if none
///    exists yet, or continues the most recent one
///
/// A name, once set, is never replaced by an empty fragment. Argument
/// fragments are always appended.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<PartialCall>,
}

impl ToolCallAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no fragment has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Merge one streamed fragment.
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let id = delta.id.as_deref().filter(|id| !id.is_empty());
        let slot = match id {
            Some(id) => match self.calls.iter().position(|c| c.id == id) {
                Some(i) => i,
                None => self.start(id.to_string(), delta.index),
            },
            None => match delta
                .index
                .and_then(|index| self.calls.iter().position(|c| c.index == Some(index)))
            {
                Some(i) => i,
                None if self.calls.is_empty() => {
                    self.start(format!("call_{}", uuid::Uuid::new_v4().simple()), delta.index)
                }
                None => self.calls.len() - 1,
            },
        };

        let call = &mut self.calls[slot];
        if call.index.is_none() {
            call.index = delta.index;
        }
        if let Some(name) = delta.name.as_deref()
            && !name.is_empty()
        {
            call.name = name.to_string();
        }
        if let Some(arguments) = &delta.arguments {
            call.arguments.push_str(arguments);
        }
    }

    /// Add a call that arrived whole, as in a unary response.
    pub fn push_complete(&mut self, call: ToolCallRequest) {
        self.calls.push(PartialCall {
            id: call.id,
            index: None,
            name: call.function_name,
            arguments: call.arguments_raw,
        });
    }

    /// Finalize, dropping every call that cannot be dispatched: a blank
    /// name, or arguments that are empty or not valid JSON.
    #[must_use]
    pub fn finish(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_iter()
            .map(|c| ToolCallRequest::new(c.id, c.name, c.arguments))
            .filter(|call| {
                let keep = call.is_dispatchable();
                if !keep {
                    tracing::debug!(
                        id = %call.id,
                        name = %call.function_name,
                        arguments = %call.arguments_raw,
                        "dropping incomplete tool call"
                    );
                }
                keep
            })
            .collect()
    }

    fn start(&mut self, id: String, index: Option<usize>) -> usize {
        self.calls.push(PartialCall {
            id,
            index,
            name: String::new(),
            arguments: String::new(),
        });
        self.calls.len() - 1
    }
}
