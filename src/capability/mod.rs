//! Capability backends and the registry that dispatches steps to them.
//!
//! A step is routed by `(kind, provider)`. When no backend is registered for
//! the exact provider, the default backend for the kind is used.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::dsl::Step;
use crate::errors::ExecutionError;

pub mod builtin;

pub use builtin::{ConstantCapability, EchoCapability};

/// Everything a capability gets to see for one dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityRequest {
    pub step_id: String,
    pub kind: String,
    pub provider: Option<String>,
    /// Step config with every template already resolved.
    pub config: Map<String, Value>,
    /// Read-only snapshot of the bindings at dispatch time.
    pub bindings: Map<String, Value>,
}

impl CapabilityRequest {
    /// Convenience accessor for a config field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.config.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(Value::as_str)
    }
}

/// A backend that performs the work of a step: an LLM call, an HTTP
/// request, a vector search. Capabilities are registered in a
/// [`CapabilityRegistry`] under a `(kind, provider)` key and looked up for
/// every dispatch.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Value>;
}

/// Registry key. A `None` provider is the default for its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CapabilityKey {
    pub kind: String,
    pub provider: Option<String>,
}

impl CapabilityKey {
    pub fn new(kind: &str, provider: Option<&str>) -> Self {
        Self {
            kind: kind.trim().to_ascii_lowercase(),
            provider: provider
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty()),
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(ref p) => write!(f, "{}/{}", self.kind, p),
            None => write!(f, "{}/*", self.kind),
        }
    }
}

/// Adapter turning an async closure into a [`Capability`].
pub struct FnCapability<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(CapabilityRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Value> {
        (self.f)(request.clone()).await
    }
}

/// `(kind, provider)`-keyed registry of capabilities.
///
/// Registration normally happens once at startup; lookups happen on every
/// step dispatch and only take the read lock.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<CapabilityKey, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any existing one under the same key.
    /// A `None` provider registers the default for `kind`.
    pub fn register<C: Capability + 'static>(&self, kind: &str, provider: Option<&str>, capability: C) {
        self.register_arc(kind, provider, Arc::new(capability));
    }

    pub fn register_arc(&self, kind: &str, provider: Option<&str>, capability: Arc<dyn Capability>) {
        let key = CapabilityKey::new(kind, provider);
        tracing::debug!(capability = %key, "registering capability");
        self.entries.write().insert(key, capability);
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(&self, kind: &str, provider: Option<&str>, f: F)
    where
        F: Fn(CapabilityRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(kind, provider, FnCapability { f });
    }

    /// Remove a registration. Returns whether one existed.
    pub fn unregister(&self, kind: &str, provider: Option<&str>) -> bool {
        self.entries
            .write()
            .remove(&CapabilityKey::new(kind, provider))
            .is_some()
    }

    /// Look up `(kind, provider)`, falling back to the kind's default.
    pub fn get(&self, kind: &str, provider: Option<&str>) -> Option<Arc<dyn Capability>> {
        let entries = self.entries.read();
        entries
            .get(&CapabilityKey::new(kind, provider))
            .or_else(|| entries.get(&CapabilityKey::new(kind, None)))
            .cloned()
    }

    /// Resolve the capability for a step.
    pub fn resolve(&self, step: &Step) -> std::result::Result<Arc<dyn Capability>, ExecutionError> {
        self.get(&step.kind, step.provider.as_deref())
            .ok_or_else(|| ExecutionError::NoCapability {
                step_id: step.id.clone(),
                kind: step.kind.clone(),
                provider: step.provider.clone().unwrap_or_else(|| "default".to_string()),
            })
    }

    /// All registered keys, sorted.
    pub fn registered(&self) -> Vec<CapabilityKey> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}
