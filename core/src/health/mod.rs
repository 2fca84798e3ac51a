//! Readiness probing for launched servers
//!
//! Launching a server only means the OS created the process; it may take
//! seconds before it accepts connections. [`wait_until_ready`] polls a
//! [`Probe`] until it passes or an overall deadline expires.
//!
//! ## Types
//!
//! - [`Probe`]: The trait for readiness check implementations
//! - [`TcpProbe`]: accepts-a-connection check on a loopback port
//! - [`HealthError`]: Error types for probe failures

pub mod error;
pub mod tcp;

pub use error::HealthError;
pub use tcp::TcpProbe;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Trait for readiness check implementations
#[async_trait]
pub trait Probe {
    /// Execute the check once
    ///
    /// Returns `Ok(())` if the check passes, or an error describing what went wrong.
    /// The implementation should respect its own per-attempt timeout.
    async fn check(&self) -> Result<(), HealthError>;
}

/// Poll `probe` every `interval` until it passes
///
/// # Errors
///
/// Returns [`HealthError::Timeout`] carrying `deadline` if the probe has not
/// passed once `deadline` has elapsed.
pub async fn wait_until_ready<P>(
    probe: &P,
    deadline: Duration,
    interval: Duration,
) -> Result<(), HealthError>
where
    P: Probe + Sync + ?Sized,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match probe.check().await {
            Ok(()) => {
                debug!("Probe passed after {} attempts", attempts);
                return Ok(());
            }
            Err(e) => debug!("Probe attempt {} failed: {}", attempts, e),
        }
        let elapsed = started.elapsed();
        if elapsed >= deadline {
            return Err(HealthError::Timeout(deadline));
        }
        sleep(interval.min(deadline - elapsed)).await;
    }
}
