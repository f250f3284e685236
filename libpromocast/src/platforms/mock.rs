//! Scriptable provider for tests
//!
//! Records every publish call and answers from a queue of scripted results,
//! so executor and orchestrator tests can exercise retries, timeouts and
//! permanent failures without network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Provider, ProviderResult};
use crate::error::PlatformError;
use crate::types::Product;

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,
    pub is_configured: bool,
    /// Delay before every answer
    pub delay: Duration,
    /// Answers consumed in order; once empty every call succeeds
    pub script: Vec<ProviderResult<String>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            is_configured: true,
            delay: Duration::ZERO,
            script: Vec::new(),
        }
    }
}

pub struct MockProvider {
    name: String,
    is_configured: bool,
    delay: Duration,
    script: Mutex<VecDeque<ProviderResult<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    pub fn new(config: MockConfig) -> Self {
        Self {
            name: config.name,
            is_configured: config.is_configured,
            delay: config.delay,
            script: Mutex::new(config.script.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Fails every call with `error`
    pub fn failing(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            script: (0..64).map(|_| Err(error.clone())).collect(),
            ..Default::default()
        })
    }

    /// Fails the first `times` calls with `error`, then succeeds
    pub fn flaky(name: &str, times: usize, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            script: (0..times).map(|_| Err(error.clone())).collect(),
            ..Default::default()
        })
    }

    /// Succeeds after sleeping for `delay`
    pub fn slow(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Texts passed to `publish`, in call order
    pub fn published(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.is_configured
    }

    async fn publish(&self, text: &str, _product: &Product) -> ProviderResult<String> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
            calls.push(text.to_string());
            calls.len()
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();

        scripted.unwrap_or_else(|| Ok(format!("{}-remote-{}", self.name, call_number)))
    }
}
