//! Byte transport: the lowest protocol layer.
//!
//! A `Transport` answers "is a byte ready?" and "may I send a byte?" without
//! blocking. `ByteLink` wraps one together with a `Clock` and turns those
//! non-blocking probes into bounded waits.

use std::time::Duration;

use tracing::trace;

use crate::clock::Clock;
use crate::error::{VdipError, VdipResult};

/// Non-blocking byte exchange with the device.
pub trait Transport: Send {
    /// Return the next received byte, or `None` if nothing is waiting.
    fn try_read(&mut self) -> VdipResult<Option<u8>>;

    /// Send `byte` if the device can accept it. Returns false if the device
    /// is not ready and nothing was written.
    fn try_write(&mut self, byte: u8) -> VdipResult<bool>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn try_read(&mut self) -> VdipResult<Option<u8>> {
        (**self).try_read()
    }

    fn try_write(&mut self, byte: u8) -> VdipResult<bool> {
        (**self).try_write(byte)
    }
}

/// A transport plus a clock, giving bounded-wait byte I/O.
pub struct ByteLink<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    /// Pause between polls. Zero spins.
    poll_interval: Duration,
}

impl<T: Transport, C: Clock> ByteLink<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            poll_interval: Duration::ZERO,
        }
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Give back the transport and clock.
    pub fn into_parts(self) -> (T, C) {
        (self.transport, self.clock)
    }

    /// Send one byte, waiting at most `budget` for the device to be ready.
    pub fn write_byte(&mut self, byte: u8, budget: Duration) -> VdipResult<()> {
        let start = self.clock.now();
        loop {
            if self.transport.try_write(byte)? {
                return Ok(());
            }
            if self.clock.elapsed_since(start) >= budget {
                trace!(byte, ?budget, "write timed out");
                return Err(VdipError::Timeout(budget));
            }
            self.pause();
        }
    }

    /// Receive one byte, waiting at most `budget`.
    pub fn read_byte(&mut self, budget: Duration) -> VdipResult<u8> {
        let start = self.clock.now();
        loop {
            if let Some(byte) = self.transport.try_read()? {
                return Ok(byte);
            }
            if self.clock.elapsed_since(start) >= budget {
                return Err(VdipError::Timeout(budget));
            }
            self.pause();
        }
    }

    /// Discard received bytes until the device stays quiet for `quiet`.
    /// Returns the number of bytes thrown away.
    pub fn purge(&mut self, quiet: Duration) -> VdipResult<usize> {
        let mut discarded = 0;
        loop {
            match self.read_byte(quiet) {
                Ok(_) => discarded += 1,
                Err(VdipError::Timeout(_)) => return Ok(discarded),
                Err(e) => return Err(e),
            }
        }
    }

    fn pause(&self) {
        if self.poll_interval.is_zero() {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(self.poll_interval);
        }
    }
}
