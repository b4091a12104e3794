//! Built-in capabilities that need no external service.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{Capability, CapabilityRequest};

/// Returns the step's resolved config. Handy for dry runs: the output shows
/// exactly what a real backend would have received.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Value> {
        Ok(Value::Object(request.config.clone()))
    }
}

/// Always returns the same value.
#[derive(Debug, Clone)]
pub struct ConstantCapability {
    value: Value,
}

impl ConstantCapability {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait]
impl Capability for ConstantCapability {
    async fn invoke(&self, _request: &CapabilityRequest) -> Result<Value> {
        Ok(self.value.clone())
    }
}
