use super::error::{Error, Result};
use super::protocol::Skybound;
use super::session::Session;
use super::transport::UsbTransport;
use rusb::UsbContext;
use std::fmt;

/// Session with a Skybound programmer connected via USB.
pub type UsbSession<T = rusb::Context> = Session<Skybound<UsbTransport<T>>>;

/// Card programmer variants, told apart by their USB vendor and product IDs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceKind {
    /// Skybound card programmer.
    Skybound,

    /// Garmin card programmer which has not received its firmware yet.
    GarminUninitialized,

    /// Garmin card programmer running its uploaded firmware.
    Garmin,
}

impl DeviceKind {
    pub const SKYBOUND_VID_PID: (u16, u16) = (0x0E39, 0x1250);
    pub const GARMIN_UNINITIALIZED_VID_PID: (u16, u16) = (0x091E, 0x0500);
    pub const GARMIN_VID_PID: (u16, u16) = (0x091E, 0x1300);

    pub fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        match (vendor_id, product_id) {
            Self::SKYBOUND_VID_PID => Some(DeviceKind::Skybound),
            Self::GARMIN_UNINITIALIZED_VID_PID => Some(DeviceKind::GarminUninitialized),
            Self::GARMIN_VID_PID => Some(DeviceKind::Garmin),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Skybound => f.write_str("Skybound card programmer"),
            DeviceKind::GarminUninitialized => f.write_str("un-initialized Garmin card programmer"),
            DeviceKind::Garmin => f.write_str("Garmin card programmer"),
        }
    }
}

/// Contains necessary information to connect to a programmer via USB.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    /// USB bus ID the programmer is connected to.
    pub usb_bus_number: u8,

    /// USB device address of the programmer.
    pub usb_bus_address: u8,

    pub kind: DeviceKind,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at bus {:03} address {:03}",
            self.kind, self.usb_bus_number, self.usb_bus_address
        )
    }
}

impl DeviceInfo {
    /// Connects to the programmer and runs the identification handshake. With `need_card`, the
    /// inserted card is identified as well, so database operations can be used right away.
    pub fn open<T: UsbContext>(&self, context: &T, need_card: bool) -> Result<UsbSession<T>> {
        if self.kind != DeviceKind::Skybound {
            return Err(Error::UnsupportedDevice(self.kind));
        }

        for device in context.devices()?.iter() {
            if device.bus_number() == self.usb_bus_number
                && device.address() == self.usb_bus_address
            {
                // The address may have been reused by another device since enumeration.
                let descriptor = device.device_descriptor()?;
                if DeviceKind::from_ids(descriptor.vendor_id(), descriptor.product_id())
                    != Some(self.kind)
                {
                    return Err(Error::DeviceNotFound);
                }

                log::info!("Opening {}", self);
                let transport = UsbTransport::open(&device)?;
                return Session::start(Skybound::new(transport), need_card);
            }
        }
        Err(Error::DeviceNotFound)
    }
}

pub struct Context {
    usb_context: rusb::Context,
}

impl Context {
    pub fn new() -> Result<Self> {
        let usb_context = rusb::Context::new()?;
        Ok(Context { usb_context })
    }

    /// Lists all connected card programmers, including ones this library cannot drive.
    pub fn find_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();

        for device in self.usb_context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };
            if let Some(kind) = DeviceKind::from_ids(descriptor.vendor_id(), descriptor.product_id())
            {
                let info = DeviceInfo {
                    usb_bus_number: device.bus_number(),
                    usb_bus_address: device.address(),
                    kind,
                };
                log::info!("Found {}", info);
                devices.push(info);
            }
        }

        Ok(devices)
    }

    /// Picks the programmer at the given bus number and address or, if none is given, the only
    /// one connected.
    pub fn pick_device(&self, location: Option<(u8, u8)>) -> Result<DeviceInfo> {
        let mut devices = self.find_devices()?;
        if let Some((bus, address)) = location {
            devices
                .into_iter()
                .find(|i| i.usb_bus_number == bus && i.usb_bus_address == address)
                .ok_or(Error::DeviceNotFound)
        } else if devices.len() > 1 {
            // More than one programmer and no location given
            Err(Error::TooManyMatches)
        } else {
            devices.pop().ok_or(Error::DeviceNotFound)
        }
    }

    /// Opens the only connected programmer.
    pub fn open(&self, need_card: bool) -> Result<UsbSession> {
        self.pick_device(None)?
            .open(&self.usb_context, need_card)
    }
}
