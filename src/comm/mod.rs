use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod tcp;

pub type Communicator = Arc<dyn Comm + Send + Sync>;

/// Request/response byte stream to the remote device
///
/// Calls share the deadline of the exchange they belong to: once it has
/// passed, they fail with [`std::io::ErrorKind::TimedOut`].
pub trait Comm {
    /// Serializes request/response exchanges
    fn lock(&self) -> MutexGuard<()>;
    /// Drops the current connection, the next call connects again
    fn reconnect(&self);
    /// Budget of one whole exchange
    fn timeout(&self) -> Duration;
    fn write(&self, buf: &[u8], deadline: Instant) -> Result<(), std::io::Error>;
    fn read_exact(&self, buf: &mut [u8], deadline: Instant) -> Result<(), std::io::Error>;
}

pub(crate) fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out")
}

/// Time left until `deadline`, an error if there is none
pub(crate) fn remaining(deadline: Instant) -> Result<Duration, std::io::Error> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(timed_out())
    } else {
        Ok(left)
    }
}
