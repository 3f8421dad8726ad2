// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io;

use canonical_error::{CanonicalError,
                      deadline_exceeded_error, internal_error,
                      invalid_argument_error, unavailable_error};
use log::debug;
use rppal::i2c::{self, I2c};

/// Register-level access to a single device on a point-to-point bus. The
/// device address is fixed when the bus is constructed, so each transaction
/// only names the bytes to move.
pub trait RegisterBus {
    /// Writes `data` in one transaction (typically register address followed
    /// by value).
    fn write(&mut self, data: &[u8]) -> Result<(), CanonicalError>;

    /// Writes `write_data` then reads `read_buffer.len()` bytes, using a
    /// repeated start.
    fn write_read(&mut self, write_data: &[u8], read_buffer: &mut [u8])
                  -> Result<(), CanonicalError>;
}

/// Raspberry Pi I2C bus bound to one slave address.
pub struct RppalBus {
    i2c: I2c,
}

impl RppalBus {
    pub fn new(bus: u8, address: u16) -> Result<Self, CanonicalError> {
        let mut i2c = I2c::with_bus(bus)
            .map_err(|e| unavailable_error(
                &format!("Failed to initialize I2C bus {}: {:?}", bus, e)))?;
        i2c.set_slave_address(address)
            .map_err(|e| invalid_argument_error(
                &format!("Failed to set I2C slave address 0x{:02X}: {:?}",
                         address, e)))?;
        debug!("Opened I2C bus {} for address 0x{:02X}", bus, address);
        Ok(RppalBus{i2c})
    }
}

/// A bus opened on its first transaction instead of at construction. A
/// driver built on it sees a bus that cannot be opened as a failed
/// transaction, so it is reported during device initialization.
pub struct DeferredBus<B, F>
    where B: RegisterBus, F: FnMut() -> Result<B, CanonicalError>
{
    open: F,
    bus: Option<B>,
}

impl<B, F> DeferredBus<B, F>
    where B: RegisterBus, F: FnMut() -> Result<B, CanonicalError>
{
    pub fn new(open: F) -> Self {
        DeferredBus{open, bus: None}
    }

    pub fn is_open(&self) -> bool {
        self.bus.is_some()
    }

    // A failed open is retried on the next transaction.
    fn bus(&mut self) -> Result<&mut B, CanonicalError> {
        if self.bus.is_none() {
            self.bus = Some((self.open)()?);
        }
        self.bus.as_mut().ok_or_else(|| internal_error("I2C bus not open"))
    }
}

impl<B, F> RegisterBus for DeferredBus<B, F>
    where B: RegisterBus, F: FnMut() -> Result<B, CanonicalError>
{
    fn write(&mut self, data: &[u8]) -> Result<(), CanonicalError> {
        self.bus()?.write(data)
    }

    fn write_read(&mut self, write_data: &[u8], read_buffer: &mut [u8])
                  -> Result<(), CanonicalError> {
        self.bus()?.write_read(write_data, read_buffer)
    }
}

// Timeouts are distinguished so that callers can tell a stalled bus from
// other failures.
fn bus_error(what: &str, e: i2c::Error) -> CanonicalError {
    match e {
        i2c::Error::Io(ref io_err) if io_err.kind() == io::ErrorKind::TimedOut => {
            deadline_exceeded_error(&format!("{}: bus timeout", what))
        },
        _ => internal_error(&format!("{}: {:?}", what, e)),
    }
}

impl RegisterBus for RppalBus {
    fn write(&mut self, data: &[u8]) -> Result<(), CanonicalError> {
        self.i2c.write(data)
            .map_err(|e| bus_error("Failed to write register", e))?;
        Ok(())
    }

    fn write_read(&mut self, write_data: &[u8], read_buffer: &mut [u8])
                  -> Result<(), CanonicalError> {
        self.i2c.write_read(write_data, read_buffer)
            .map_err(|e| bus_error("Failed to read register", e))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use canonical_error::CanonicalErrorCode;
    use super::*;

    // Answers every read with `value`.
    struct ConstantBus {
        value: u8,
    }

    impl RegisterBus for ConstantBus {
        fn write(&mut self, _data: &[u8]) -> Result<(), CanonicalError> {
            Ok(())
        }

        fn write_read(&mut self, _write_data: &[u8], read_buffer: &mut [u8])
                      -> Result<(), CanonicalError> {
            read_buffer.fill(self.value);
            Ok(())
        }
    }

    #[test]
    fn test_deferred_bus_opens_once() {
        let opens = Cell::new(0);
        let mut bus = DeferredBus::new(|| -> Result<ConstantBus, CanonicalError> {
            opens.set(opens.get() + 1);
            Ok(ConstantBus{value: 0x42})
        });
        assert!(!bus.is_open());
        assert_eq!(opens.get(), 0);

        let mut buffer = [0u8; 2];
        bus.write_read(&[0x75], &mut buffer).unwrap();
        assert_eq!(buffer, [0x42, 0x42]);
        bus.write(&[0x6B, 0x01]).unwrap();
        assert!(bus.is_open());
        assert_eq!(opens.get(), 1);
    }

    #[test]
    fn test_deferred_bus_open_failure() {
        let opens = Cell::new(0);
        let mut bus = DeferredBus::new(|| -> Result<ConstantBus, CanonicalError> {
            opens.set(opens.get() + 1);
            Err(unavailable_error("no /dev/i2c-7"))
        });
        let err = bus.write(&[0x6B, 0x80]).unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::Unavailable));
        assert!(bus.write_read(&[0x75], &mut [0u8; 1]).is_err());
        assert!(!bus.is_open());
        assert_eq!(opens.get(), 2);
    }
}  // mod tests.
