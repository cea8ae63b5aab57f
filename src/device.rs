//! Devices and the simulator lifecycle.
//!
//! A [`Device`] is the destination string handed to the test tool. Each
//! parallel slot is bound to one device for the whole run, so concurrent
//! attempts never share a simulator.

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

/// A destination the test tool runs on.
///
/// `destination: None` lets the tool pick its default device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub destination: Option<String>,
}

impl Device {
    /// A device addressed by an `xcodebuild -destination` specifier.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(destination) => f.write_str(destination),
            None => f.write_str("default destination"),
        }
    }
}

/// Errors from the device lifecycle service.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The lifecycle service itself cannot be reached. Fatal for a run.
    #[error("Device service unavailable: {0}")]
    Unavailable(String),

    /// The service ran but could not complete the request.
    #[error("Failed to quit simulators: {0}")]
    Failed(String),
}

/// Cleans up simulators before a run.
#[async_trait]
pub trait DeviceLifecycle: Send + Sync {
    async fn quit_simulators(&self) -> Result<(), DeviceError>;
}

#[async_trait]
impl<L: DeviceLifecycle + ?Sized> DeviceLifecycle for Arc<L> {
    async fn quit_simulators(&self) -> Result<(), DeviceError> {
        (**self).quit_simulators().await
    }
}

/// Quits running simulators with `killall`.
#[derive(Debug, Clone)]
pub struct SimulatorKiller {
    process_names: Vec<String>,
}

impl Default for SimulatorKiller {
    fn default() -> Self {
        Self {
            process_names: vec!["Simulator".to_string()],
        }
    }
}

#[async_trait]
impl DeviceLifecycle for SimulatorKiller {
    async fn quit_simulators(&self) -> Result<(), DeviceError> {
        let output = tokio::process::Command::new("killall")
            .args(&self.process_names)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    DeviceError::Unavailable(format!("killall: {}", e))
                }
                _ => DeviceError::Failed(e.to_string()),
            })?;

        // killall exits 1 when nothing matched
        if output.status.success() {
            info!("Quit running simulators");
        } else {
            debug!(
                "No simulators to quit: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Lifecycle that leaves devices alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

#[async_trait]
impl DeviceLifecycle for NoopLifecycle {
    async fn quit_simulators(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}
