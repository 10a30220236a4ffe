//! Built-in vendor platforms.
//!
//! Failure patterns are the messages each CLI prints when it rejects a
//! command; seeing one in the captured output means the capture is not a
//! configuration.

use super::PlatformDefinition;

/// All built-in platforms, in the order they are listed to users.
pub fn builtin() -> Vec<PlatformDefinition> {
    vec![
        cisco("cisco"),
        cisco("cisco_router"),
        cisco("cisco_switch"),
        arista(),
        juniper(),
        huawei(),
        mikrotik(),
    ]
}

/// Cisco IOS / IOS-XE. Also registered under the router/switch aliases.
pub fn cisco(name: &str) -> PlatformDefinition {
    PlatformDefinition::new(name, "show running-config")
        .with_failure_pattern("% Invalid input")
        .with_failure_pattern("% Ambiguous command")
        .with_failure_pattern("% Incomplete command")
        .with_failure_pattern("% Unknown command")
        .with_failure_pattern("% Authorization failed")
}

/// Arista EOS.
pub fn arista() -> PlatformDefinition {
    PlatformDefinition::new("arista", "show running-config")
        .with_failure_pattern("% Ambiguous command")
        .with_failure_pattern("% Error")
        .with_failure_pattern("% Incomplete command")
        .with_failure_pattern("% Invalid input")
        .with_failure_pattern("% Unavailable command")
}

/// Juniper Junos.
pub fn juniper() -> PlatformDefinition {
    PlatformDefinition::new("juniper", "show configuration")
        .with_failure_pattern("unknown command")
        .with_failure_pattern("syntax error")
}

/// Huawei VRP.
pub fn huawei() -> PlatformDefinition {
    PlatformDefinition::new("huawei", "display current-configuration")
        .with_failure_pattern("Error: Unrecognized command")
        .with_failure_pattern("Error: Incomplete command")
        .with_failure_pattern("Error: Wrong parameter")
}

/// MikroTik RouterOS.
pub fn mikrotik() -> PlatformDefinition {
    PlatformDefinition::new("mikrotik", "export")
        .with_failure_pattern("bad command name")
        .with_failure_pattern("expected end of command")
        .with_failure_pattern("syntax error")
}
