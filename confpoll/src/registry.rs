//! Device registry: turns the credentials file into device records.
//!
//! The credentials file is a YAML document with a `devices` list:
//!
//! ```yaml
//! devices:
//!   - type: cisco
//!     watch: yes
//!     credentials:
//!       host: 10.0.0.1
//!       username: admin
//!       password: secret
//!   - type: juniper
//!     jump_host: bastion.example.net
//!     jump_credentials:
//!       username: ops
//!       password: hunter2
//!     credentials:
//!       ip: 192.168.10.4
//!       port: 2222
//!       username: netconf
//!       password: secret
//! ```
//!
//! `watch` may also sit inside `credentials`; that placement wins when
//! both are given.
//!
//! Every entry is validated and all problems across all entries are
//! reported together, so one load gives a complete diagnostic.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use log::debug;
use secrecy::SecretString;
use serde_yaml::{Mapping, Value};

use crate::error::{RegistryError, ValidationError, ValidationProblem};

/// Tokens accepted as "true" for the `watch` flag (compared case-insensitively).
const TRUTHY: [&str; 4] = ["true", "yes", "1", "on"];

/// Credentials and polling policy for one device.
///
/// Identity is `host`. Records are only produced by [`parse`] / [`load`].
#[derive(Clone)]
pub struct DeviceCredential {
    host: String,
    port: Option<u16>,
    username: String,
    secret: SecretString,
    device_type: String,
    watch: bool,
    jump: Option<JumpHost>,
}

impl DeviceCredential {
    /// Management address of the device; also its identity.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SSH port, if the record names one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// Device type used to select the read command.
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// `true` for continuously watched devices, `false` for one-shot ones.
    pub fn watch(&self) -> bool {
        self.watch
    }

    /// Intermediate hop, if the device is only reachable through one.
    pub fn jump(&self) -> Option<&JumpHost> {
        self.jump.as_ref()
    }
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("device_type", &self.device_type)
            .field("watch", &self.watch)
            .field("jump", &self.jump)
            .finish_non_exhaustive()
    }
}

/// An ordered batch of devices built for one reconciliation.
///
/// Runners take the queue by value, so a queue is consumed exactly once.
#[derive(Debug, Default)]
pub struct TaskQueue {
    devices: VecDeque<DeviceCredential>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, device: DeviceCredential) {
        self.devices.push_back(device);
    }

    pub fn pop(&mut self) -> Option<DeviceCredential> {
        self.devices.pop_front()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Hosts in queue order.
    pub fn hosts(&self) -> Vec<&str> {
        self.devices.iter().map(DeviceCredential::host).collect()
    }
}

impl FromIterator<DeviceCredential> for TaskQueue {
    fn from_iter<I: IntoIterator<Item = DeviceCredential>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TaskQueue {
    type Item = DeviceCredential;
    type IntoIter = std::collections::vec_deque::IntoIter<DeviceCredential>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

/// A single intermediate SSH hop.
#[derive(Clone)]
pub struct JumpHost {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub secret: SecretString,
}

impl fmt::Debug for JumpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JumpHost")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Read and parse the credentials file at `path`.
pub async fn load(path: &Path) -> Result<Vec<DeviceCredential>, RegistryError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let devices = parse(&content)?;
    debug!("loaded {} device(s) from {}", devices.len(), path.display());
    Ok(devices)
}

/// Parse a credentials document.
///
/// An empty document or one without a `devices` key yields no devices.
pub fn parse(content: &str) -> Result<Vec<DeviceCredential>, RegistryError> {
    let document: Value = serde_yaml::from_str(content)?;
    let records = match document {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(mut root) => match root.remove("devices") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Sequence(records)) => records,
            Some(_) => {
                return Err(RegistryError::Format {
                    message: "'devices' must be a list".to_string(),
                });
            }
        },
        _ => {
            return Err(RegistryError::Format {
                message: "top level must be a mapping with a 'devices' list".to_string(),
            });
        }
    };
    from_records(&records)
}

/// Validate raw device entries, collecting every problem before failing.
pub fn from_records(records: &[Value]) -> Result<Vec<DeviceCredential>, RegistryError> {
    let mut devices = Vec::with_capacity(records.len());
    let mut problems = Vec::new();

    for (index, record) in records.iter().enumerate() {
        match validate(index, record) {
            Ok(device) => devices.push(device),
            Err(problem) => problems.push(problem),
        }
    }

    if problems.is_empty() {
        Ok(devices)
    } else {
        Err(ValidationError { problems }.into())
    }
}

/// Interpret a `watch` value: booleans as-is, anything else by its
/// string form against [`TRUTHY`]. Absent or null is `false`.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => scalar(other)
            .map(|s| {
                let s = s.trim().to_ascii_lowercase();
                TRUTHY.contains(&s.as_str())
            })
            .unwrap_or(false),
    }
}

fn validate(index: usize, record: &Value) -> Result<DeviceCredential, ValidationProblem> {
    let empty_map = Mapping::new();
    let entry = record.as_mapping().unwrap_or(&empty_map);
    let credentials = entry
        .get("credentials")
        .and_then(Value::as_mapping)
        .unwrap_or(&empty_map);

    let mut checker = FieldChecker::new(index);
    let host = checker.required("host", field(credentials, &["host", "ip"]));
    let username = checker.required("username", field(credentials, &["username"]));
    let password = checker.required("password", field(credentials, &["password"]));
    let device_type = checker.required("type", field(entry, &["type", "device_type"]));
    let port = checker.port("port", credentials.get("port"));

    let jump = match entry.get("jump_host") {
        None => None,
        Some(jump_host_value) => {
            let jump_credentials = entry
                .get("jump_credentials")
                .and_then(Value::as_mapping)
                .unwrap_or(&empty_map);
            let (jump_host, jump_port) = match jump_host_value.as_mapping() {
                Some(map) => (
                    checker.required("jump_host.host", field(map, &["host", "ip"])),
                    checker.port("jump_host.port", map.get("port")),
                ),
                None => (
                    checker.required("jump_host", field(entry, &["jump_host"])),
                    None,
                ),
            };
            let jump_username = checker.required(
                "jump_credentials.username",
                field(jump_credentials, &["username"]),
            );
            let jump_password = checker.required(
                "jump_credentials.password",
                field(jump_credentials, &["password"]),
            );
            Some((jump_host, jump_port, jump_username, jump_password))
        }
    };

    checker.finish()?;

    // Passwords are kept verbatim; everything else is trimmed.
    let trimmed = |value: Option<String>| value.unwrap_or_default().trim().to_string();

    let jump = jump.map(|(host, port, username, password)| JumpHost {
        host: trimmed(host),
        port,
        username: trimmed(username),
        secret: SecretString::from(password.unwrap_or_default()),
    });

    Ok(DeviceCredential {
        host: trimmed(host),
        port,
        username: trimmed(username),
        secret: SecretString::from(password.unwrap_or_default()),
        device_type: trimmed(device_type),
        watch: is_truthy(credentials.get("watch").or_else(|| entry.get("watch"))),
        jump,
    })
}

enum Field {
    Missing,
    Empty,
    Present(String),
}

/// Look up the first of `keys` present in `map` and classify it.
fn field(map: &Mapping, keys: &[&str]) -> Field {
    let Some(value) = keys.iter().find_map(|key| map.get(*key)) else {
        return Field::Missing;
    };
    match value {
        Value::Null => Field::Empty,
        other => match scalar(other) {
            Some(s) if s.trim().is_empty() => Field::Empty,
            Some(s) => Field::Present(s),
            None => Field::Empty,
        },
    }
}

/// String form of a scalar YAML value.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

struct FieldChecker {
    problem: ValidationProblem,
}

impl FieldChecker {
    fn new(index: usize) -> Self {
        Self {
            problem: ValidationProblem {
                index,
                missing: Vec::new(),
                empty: Vec::new(),
            },
        }
    }

    fn required(&mut self, name: &'static str, value: Field) -> Option<String> {
        match value {
            Field::Missing => {
                self.problem.missing.push(name);
                None
            }
            Field::Empty => {
                self.problem.empty.push(name);
                None
            }
            Field::Present(s) => Some(s),
        }
    }

    /// Optional port; anything that is not a valid u16 counts as empty.
    fn port(&mut self, name: &'static str, value: Option<&Value>) -> Option<u16> {
        let value = value?;
        if value.is_null() {
            return None;
        }
        let parsed = match value {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse::<u16>().ok(),
            _ => None,
        };
        match parsed {
            Some(port) if port != 0 => Some(port),
            _ => {
                self.problem.empty.push(name);
                None
            }
        }
    }

    fn finish(self) -> Result<(), ValidationProblem> {
        if self.problem.missing.is_empty() && self.problem.empty.is_empty() {
            Ok(())
        } else {
            Err(self.problem)
        }
    }
}
