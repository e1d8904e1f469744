//! Boundary to the bus driver.
//!
//! The core never touches SPI/UART/SDIO directly. A [`Transport`] moves whole
//! frames (descriptor plus payload) and exposes the interrupt mask.

use crate::error::TransportError;

pub trait Transport: Send {
    /// Writes one complete frame to the device.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// True when a frame can be read without blocking.
    fn frame_ready(&self) -> bool;

    /// Reads the next frame into `buf`, returning its length, or `None` when
    /// nothing is pending.
    fn receive_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError>;

    /// Stops the device from raising "data available" interrupts.
    fn mask_interrupts(&mut self);

    fn unmask_interrupts(&mut self);
}
