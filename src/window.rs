use super::Error;

use std::cmp::min;
use std::convert::TryInto;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Tracks the remote send window of a channel.
///
/// Each byte of window is one permit of a fair (FIFO) semaphore, so that
/// waiters are served in the order they blocked and a large request at
/// the head of the queue cannot be starved by smaller ones behind it.
///
/// Closing the tracker poisons the semaphore: every suspended and future
/// [`WindowTracker::consume`] returns [`Error::Cancelled`].
#[derive(Debug)]
pub struct WindowTracker {
    permits: Semaphore,
    max: u32,

    /// Serializes [`WindowTracker::release`] so that the overflow check
    /// and the increment happen atomically with respect to each other.
    release_lock: Mutex<()>,
}

impl WindowTracker {
    /// Create a tracker with `initial` bytes of window, which is also
    /// the maximum the window can ever grow to.
    pub fn new(initial: u32) -> Self {
        Self::with_max(initial, initial)
    }

    /// Create a tracker with `initial` bytes of window that can grow
    /// up to `max` bytes.
    ///
    /// # Panic
    ///
    /// If `initial > max`.
    pub fn with_max(initial: u32, max: u32) -> Self {
        assert!(initial <= max, "initial window larger than its maximum");

        Self {
            permits: Semaphore::new(initial as usize),
            max,
            release_lock: Mutex::new(()),
        }
    }

    /// Window currently available.
    pub fn available(&self) -> u32 {
        // The semaphore never holds more than `self.max` permits.
        self.permits.available_permits().try_into().unwrap_or(u32::MAX)
    }

    /// Maximum window size.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Suspend until at least `n` bytes of window are available, then take
    /// exactly `n` of them.
    ///
    /// Requesting more than [`WindowTracker::max`] can never succeed and
    /// only returns once the tracker is closed.
    pub async fn consume(&self, n: u32) -> Result<(), Error> {
        self.permits
            .acquire_many(n)
            .await
            .map_err(|_| Error::Cancelled)?
            .forget();

        Ok(())
    }

    /// Suspend until at least one byte of window is available, then take
    /// as much as possible up to `n`.
    ///
    /// Return the number of bytes taken, which is `0` only if `n == 0`.
    pub async fn consume_up_to(&self, n: u32) -> Result<u32, Error> {
        if n == 0 {
            return Ok(0);
        }

        // Wait in the fair queue for the first byte.
        self.consume(1).await?;

        let extra = min(self.available(), n - 1);
        let extra = match self.permits.try_acquire_many(extra) {
            Ok(permit) => {
                permit.forget();
                extra
            }
            // Another consumer raced us for the remaining window.
            Err(_) => 0,
        };

        Ok(1 + extra)
    }

    /// Give `n` bytes of window back, waking suspended consumers.
    ///
    /// Fails with [`Error::WindowOverflow`] if that would push the window
    /// above [`WindowTracker::max`], in which case the window is left
    /// untouched.
    pub fn release(&self, n: u32) -> Result<(), Error> {
        let _guard = self.release_lock.lock();

        let available = self.available();
        match available.checked_add(n) {
            Some(total) if total <= self.max => {
                self.permits.add_permits(n as usize);
                Ok(())
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::error!(available, adjust = n, max = self.max, "window overflow");

                Err(Error::WindowOverflow {
                    available,
                    adjust: n,
                    max: self.max,
                })
            }
        }
    }

    /// Wake every suspended consumer with [`Error::Cancelled`] and make every
    /// later [`WindowTracker::consume`] fail the same way.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Return true if [`WindowTracker::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
