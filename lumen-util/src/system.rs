//! Device restart facility.
//!
//! Restarts are unconditional: in-flight work is not shut down gracefully.

use std::future::Future;

use thiserror::Error;
use tracing::{instrument, warn};
use zbus::Connection;

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),
}

/// Something able to restart the whole device
pub trait Restart {
    fn restart(&self) -> impl Future<Output = Result<(), RestartError>> + Send;
}

// systemd-logind Manager D-Bus interface
#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login {
    /// Reboot method
    fn reboot(&self, interactive: bool) -> zbus::Result<()>;
}

/// Restart the device through systemd-logind
#[derive(Debug, Clone, Default)]
pub struct LogindRestart;

impl Restart for LogindRestart {
    #[instrument(name = "restart", skip_all, err)]
    async fn restart(&self) -> Result<(), RestartError> {
        warn!("rebooting device");
        let connection = Connection::system().await?;
        let proxy = LoginProxy::new(&connection).await?;
        proxy.reboot(false).await?;
        Ok(())
    }
}
