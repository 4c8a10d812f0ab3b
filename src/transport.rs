//! Raw USB access to a programmer: bulk reads and writes plus control reads.

use crate::error::{Error, Result};
use crate::TIMEOUT;
use rusb::{Device, DeviceHandle, UsbContext};

/// Bulk endpoint used for commands and outgoing data.
pub const WRITE_ENDPOINT: u8 = 0x02;

/// Bulk endpoint used for responses and incoming data.
pub const READ_ENDPOINT: u8 = 0x81;

/// The only interface the programmer exposes.
pub const INTERFACE: u8 = 0;

/// Byte-level access to a programmer. Every call blocks for at most three seconds and errors are
/// passed through as-is; nothing is retried at this level.
pub trait Transport {
    /// Sends a buffer to the bulk out endpoint.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Reads up to `length` bytes from the bulk in endpoint. The device may answer with fewer.
    fn read(&mut self, length: usize) -> Result<Vec<u8>>;

    /// Performs a control-in transfer and returns the bytes the device sent back.
    fn control_read(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
    ) -> Result<Vec<u8>>;
}

/// [`Transport`] implementation for an opened USB device. The interface stays claimed for the
/// lifetime of this object and is released on drop, which also closes the device handle.
///
/// [`Transport`]: trait.Transport.html
pub struct UsbTransport<T: UsbContext> {
    usb_device_handle: DeviceHandle<T>,
}

impl<T: UsbContext> UsbTransport<T> {
    /// Opens the device, claims its interface and resets it.
    pub fn open(device: &Device<T>) -> Result<Self> {
        let usb_device_handle = device.open()?;

        // Not available on every platform; without it, claiming simply fails if a kernel driver
        // is bound.
        match usb_device_handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => return Err(e.into()),
        }

        usb_device_handle.claim_interface(INTERFACE)?;
        let transport = UsbTransport { usb_device_handle };
        transport.usb_device_handle.reset()?;
        Ok(transport)
    }
}

impl<T: UsbContext> Transport for UsbTransport<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        log::trace!("bulk out: {:02x?}", &data[..data.len().min(8)]);
        let written = self
            .usb_device_handle
            .write_bulk(WRITE_ENDPOINT, data, TIMEOUT)?;
        if written != data.len() {
            return Err(Error::Usb(rusb::Error::Io));
        }
        Ok(())
    }

    fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        let read = self
            .usb_device_handle
            .read_bulk(READ_ENDPOINT, &mut buffer, TIMEOUT)?;
        buffer.truncate(read);
        log::trace!("bulk in: {} bytes", read);
        Ok(buffer)
    }

    fn control_read(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        let read = self.usb_device_handle.read_control(
            request_type,
            request,
            value,
            index,
            &mut buffer,
            TIMEOUT,
        )?;
        buffer.truncate(read);
        Ok(buffer)
    }
}

impl<T: UsbContext> Drop for UsbTransport<T> {
    fn drop(&mut self) {
        if let Err(e) = self.usb_device_handle.release_interface(INTERFACE) {
            log::warn!("Could not release USB interface: {}", e);
        }
    }
}
