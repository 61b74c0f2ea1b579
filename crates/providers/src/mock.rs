//! Scripted provider for deterministic tests.
//!
//! Lives outside `#[cfg(test)]` so downstream crates can drive their own
//! loop tests with it.

use async_trait::async_trait;
use maitred_core::error::ProviderError;
use maitred_core::provider::{CompletionProvider, CompletionRequest, CompletionResponse};
use std::collections::VecDeque;
use std::sync::Mutex;

enum Scripted {
    Response(CompletionResponse),
    Error(ProviderError),
}

/// Returns pre-scripted responses in order and records every request.
/// When the script runs dry it returns `InvalidResponse`, which makes an
/// over-calling test fail loudly instead of looping.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(self, response: CompletionResponse) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Response(response));
        self
    }

    pub fn push_error(self, error: ProviderError) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Error(error));
        self
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Snapshot of every request received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Response(r)) => Ok(r),
            Some(Scripted::Error(e)) => Err(e),
            None => Err(ProviderError::InvalidResponse(
                "scripted provider exhausted".into(),
            )),
        }
    }
}
