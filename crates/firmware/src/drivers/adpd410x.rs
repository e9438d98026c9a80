//! ADPD410x optical front-end driver over I²C.
//!
//! Register addresses go out as two big-endian bytes with bit 15 set (long
//! address mode); register values are 16-bit big-endian. FIFO data is read
//! through the `FIFO_DATA` register in one burst.
//!
//! # I²C Address
//!
//! The ADPD4100/4101 answer at `0x24`.

use embedded_hal::i2c::I2c;
use platform::adpd410x::{ADPD410X_I2C_ADDR, LONG_ADDRESS_FLAG, REG_FIFO_DATA};
use platform::OpticalFrontEnd;

/// ADPD410x on an I²C bus.
pub struct Adpd410x<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Adpd410x<I> {
    /// Driver at the default address.
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, ADPD410X_I2C_ADDR)
    }

    /// Driver at a non-default 7-bit address.
    pub fn with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Give the bus back.
    pub fn release(self) -> I {
        self.i2c
    }

    fn address_bytes(addr: u16) -> [u8; 2] {
        (addr | LONG_ADDRESS_FLAG).to_be_bytes()
    }
}

impl<I: I2c> OpticalFrontEnd for Adpd410x<I> {
    type Error = I::Error;

    fn read_reg(&mut self, addr: u16) -> Result<u16, Self::Error> {
        let mut value = [0u8; 2];
        self.i2c.write_read(self.address, &Self::address_bytes(addr), &mut value)?;
        Ok(u16::from_be_bytes(value))
    }

    fn write_reg(&mut self, addr: u16, value: u16) -> Result<(), Self::Error> {
        let [a_hi, a_lo] = Self::address_bytes(addr);
        let [v_hi, v_lo] = value.to_be_bytes();
        self.i2c.write(self.address, &[a_hi, a_lo, v_hi, v_lo])
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.is_empty() {
            return Ok(());
        }
        self.i2c.write_read(self.address, &Self::address_bytes(REG_FIFO_DATA), buf)
    }
}
