//! Platform definition for vendor-specific commands.

/// Everything confpoll needs to know about one device type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDefinition {
    /// Platform name as written in the credentials file (e.g., "cisco").
    pub name: String,

    /// Read-only command that prints the running configuration.
    pub config_command: String,

    /// Patterns that indicate command failure.
    pub failed_when_contains: Vec<String>,
}

impl PlatformDefinition {
    /// Create a new platform definition.
    pub fn new(name: impl Into<String>, config_command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_command: config_command.into(),
            failed_when_contains: vec![],
        }
    }

    /// Add a failure pattern.
    pub fn with_failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failed_when_contains.push(pattern.into());
        self
    }

    /// Return the first failure pattern found in `output`, if any.
    pub fn detect_failure(&self, output: &str) -> Option<&str> {
        self.failed_when_contains
            .iter()
            .find(|pattern| output.contains(pattern.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_failure() {
        let platform = PlatformDefinition::new("test", "show run")
            .with_failure_pattern("% Invalid input")
            .with_failure_pattern("% Error");

        assert_eq!(platform.detect_failure("hostname r1\n!"), None);
        assert_eq!(
            platform.detect_failure("show run\n% Invalid input detected at '^' marker."),
            Some("% Invalid input")
        );
    }
}
