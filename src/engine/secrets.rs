//! Secret resolution.
//!
//! A secret source is a `scheme:reference` string. `env:NAME` reads an
//! environment variable; other schemes are left to custom resolvers.

use std::collections::HashMap;

use crate::dsl::SecretDecl;

/// Produces the plain value of a declared secret.
pub trait SecretResolver: Send + Sync {
    /// `None` when the secret cannot be found.
    fn resolve(&self, decl: &SecretDecl) -> Option<String>;
}

/// Reads `env:` sources from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, decl: &SecretDecl) -> Option<String> {
        let var = decl.source.strip_prefix("env:")?;
        std::env::var(var.trim()).ok()
    }
}

/// Fixed secrets, looked up by secret name and then by source. Used by
/// tests and by hosts that manage secrets themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SecretResolver for StaticSecrets {
    fn resolve(&self, decl: &SecretDecl) -> Option<String> {
        self.values
            .get(&decl.name)
            .or_else(|| self.values.get(&decl.source))
            .cloned()
    }
}

/// Tries each resolver in order.
#[derive(Default)]
pub struct ChainedSecrets {
    resolvers: Vec<Box<dyn SecretResolver>>,
}

impl ChainedSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<R: SecretResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }
}

impl SecretResolver for ChainedSecrets {
    fn resolve(&self, decl: &SecretDecl) -> Option<String> {
        self.resolvers.iter().find_map(|r| r.resolve(decl))
    }
}
