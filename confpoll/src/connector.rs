//! Connection paths to a device.
//!
//! [`Connector`] is the closed set of ways to reach a device. The choice
//! is a pure function of the record: a record with a jump host always
//! goes through it, anything else connects directly. A multi-hop path
//! would be one more variant here; callers only ever see [`Connect`].

use async_trait::async_trait;
use log::debug;

use crate::error::Result;
use crate::registry::{DeviceCredential, JumpHost};
use crate::transport::{Session, SshOptions, SshTransport};

/// How a device is reached.
#[derive(Debug, Clone, Copy)]
pub enum Connector<'a> {
    /// One authenticated session straight to the device.
    Direct,
    /// A session to the jump host, then a tunnelled session to the device.
    JumpHost(&'a JumpHost),
}

impl<'a> Connector<'a> {
    /// Select the path for a device record.
    pub fn for_device(device: &'a DeviceCredential) -> Self {
        match device.jump() {
            Some(jump) => Connector::JumpHost(jump),
            None => Connector::Direct,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Connector::Direct => "direct",
            Connector::JumpHost(_) => "jump-host",
        }
    }

    /// Open an authenticated SSH session to `device` along this path.
    ///
    /// For [`Connector::JumpHost`] the returned transport owns the hop and
    /// releases it when disconnected.
    pub async fn open(&self, device: &DeviceCredential, options: &SshOptions) -> Result<SshTransport> {
        let target = options.hop(
            device.host(),
            device.port(),
            device.username(),
            device.secret(),
        );

        match self {
            Connector::Direct => SshTransport::connect(target).await,
            Connector::JumpHost(jump) => {
                let hop = options.hop(&jump.host, jump.port, &jump.username, &jump.secret);
                let jump_transport = SshTransport::connect(hop).await?;
                SshTransport::connect_via(jump_transport, target).await
            }
        }
    }
}

/// Capability to open a session to a device.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, device: &DeviceCredential) -> Result<Box<dyn Session>>;
}

/// [`Connect`] over SSH, picking the path with [`Connector::for_device`].
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }
}

#[async_trait]
impl Connect for SshConnector {
    async fn connect(&self, device: &DeviceCredential) -> Result<Box<dyn Session>> {
        let connector = Connector::for_device(device);
        debug!("{}: opening {} session", device.host(), connector.kind());
        let transport = connector.open(device, &self.options).await?;
        Ok(Box::new(transport))
    }
}
