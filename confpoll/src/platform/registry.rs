//! Registry for looking up platform definitions by device type.

use indexmap::IndexMap;

use super::definition::PlatformDefinition;
use super::vendors;
use crate::error::PlatformError;

/// Device type → platform table.
///
/// Names are matched case-insensitively after trimming. The table is
/// owned by whoever builds it; there is no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: IndexMap<String, PlatformDefinition>,
}

impl PlatformRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            platforms: IndexMap::new(),
        }
    }

    /// Create a registry holding the built-in vendor platforms.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for platform in vendors::builtin() {
            registry.insert(platform);
        }
        registry
    }

    /// Register a platform, replacing any existing one with the same name.
    pub fn insert(&mut self, platform: PlatformDefinition) -> Option<PlatformDefinition> {
        self.platforms.insert(normalize(&platform.name), platform)
    }

    /// Set the config command for `name`, keeping its failure patterns if
    /// the platform already exists.
    pub fn set_command(&mut self, name: &str, command: impl Into<String>) {
        let command = command.into();
        match self.platforms.get_mut(&normalize(name)) {
            Some(platform) => platform.config_command = command,
            None => {
                self.insert(PlatformDefinition::new(name.trim(), command));
            }
        }
    }

    /// Get a platform by name.
    pub fn get(&self, name: &str) -> Option<&PlatformDefinition> {
        self.platforms.get(&normalize(name))
    }

    /// Resolve the platform for a device type or explain which ones exist.
    pub fn resolve(&self, device_type: &str) -> Result<&PlatformDefinition, PlatformError> {
        self.get(device_type)
            .ok_or_else(|| PlatformError::UnknownPlatform {
                name: device_type.to_string(),
                supported: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Check if a platform is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.platforms.contains_key(&normalize(name))
    }

    /// List all registered platform names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.platforms.values().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
