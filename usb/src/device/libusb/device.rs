use crate::catalog::WidgetIdentity;
use crate::device::base::{DeviceStrings, FtdiTransport, Timeouts, UsbBus, UsbCandidate};
use crate::error::{DeviceQueryError, EnumerationError, OpenError};
use crate::sio::SioRequest;
use ftdidmx_types::{ChipType, InterfacePort};
use log::{debug, info, warn};
use rusb::{
    Context, Device, DeviceDescriptor, DeviceHandle, Direction, Recipient, RequestType,
    UsbContext, Version,
};
use std::time::Duration;

pub struct LibUsbBus {
    context: Context,
}

impl LibUsbBus {
    pub fn new() -> Result<Self, EnumerationError> {
        let context = Context::new().map_err(EnumerationError::Context)?;
        Ok(Self { context })
    }

    fn device_at(
        &self,
        candidate: &UsbCandidate,
    ) -> Result<(Device<Context>, DeviceDescriptor), rusb::Error> {
        for device in self.context.devices()?.iter() {
            if device.bus_number() == candidate.bus_number && device.address() == candidate.address
            {
                let descriptor = device.device_descriptor()?;
                return Ok((device, descriptor));
            }
        }
        Err(rusb::Error::NoDevice)
    }

    // With a serial number we can pick out the exact chip, without one the first chip with a
    // matching vendor / product is as good as we can do.
    fn find_device(
        &self,
        identity: &WidgetIdentity,
        timeout: Duration,
    ) -> Result<Option<(Device<Context>, DeviceDescriptor)>, rusb::Error> {
        for device in self.context.devices()?.iter() {
            if let Ok(descriptor) = device.device_descriptor() {
                if descriptor.vendor_id() != identity.vendor_id()
                    || descriptor.product_id() != identity.product_id()
                {
                    continue;
                }

                if identity.serial().is_empty() {
                    return Ok(Some((device, descriptor)));
                }

                match read_device_strings(&device, &descriptor, timeout) {
                    Ok(strings) => {
                        if strings.serial.as_deref() == Some(identity.serial())
                            && strings.product == identity.name()
                        {
                            return Ok(Some((device, descriptor)));
                        }
                    }
                    Err(error) => {
                        debug!("Skipping {:?} while searching, {}", device, error);
                    }
                }
            }
        }
        Ok(None)
    }
}

impl UsbBus for LibUsbBus {
    type Transport = LibUsbTransport;

    fn candidates(&self) -> Result<Vec<UsbCandidate>, rusb::Error> {
        let mut found_devices = Vec::new();
        for device in self.context.devices()?.iter() {
            if let Ok(descriptor) = device.device_descriptor() {
                found_devices.push(UsbCandidate {
                    bus_number: device.bus_number(),
                    address: device.address(),
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                });
            }
        }
        Ok(found_devices)
    }

    fn read_strings(
        &self,
        candidate: &UsbCandidate,
        timeout: Duration,
    ) -> Result<DeviceStrings, rusb::Error> {
        let (device, descriptor) = self.device_at(candidate)?;
        read_device_strings(&device, &descriptor, timeout)
    }

    fn query_chip(&self, identity: &WidgetIdentity) -> Result<ChipType, DeviceQueryError> {
        let usb_error = |source| DeviceQueryError::UsbError {
            description: identity.description(),
            source,
        };

        let (device, descriptor) = self
            .find_device(identity, Duration::from_millis(100))
            .map_err(usb_error)?
            .ok_or_else(|| DeviceQueryError::DeviceNotFound(identity.description()))?;

        // We don't need the handle for anything, but if we can't open the chip now, there's no
        // chance of opening any of its interfaces later.
        let handle = device.open().map_err(usb_error)?;
        let chip = chip_type(&descriptor);
        drop(handle);

        debug!("{} is a {}", identity.description(), chip);
        Ok(chip)
    }

    fn open(
        &self,
        identity: &WidgetIdentity,
        port: InterfacePort,
        timeouts: Timeouts,
    ) -> Result<LibUsbTransport, OpenError> {
        let (device, descriptor) = self
            .find_device(identity, timeouts.read)?
            .ok_or(OpenError::DeviceNotFound)?;

        let chip = chip_type(&descriptor);
        if port.usb_interface() >= chip.interface_count() {
            return Err(OpenError::InterfaceNotPresent(port));
        }

        let handle = device.open()?;

        // The kernel will have bound ftdi_sio to the chip, it needs to let go before we can claim.
        if let Err(error) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto detach unavailable: {}", error);
        }

        if let Err(error) = handle.claim_interface(port.usb_interface()) {
            warn!("Unable to claim interface {} on {:?}: {}", port, device, error);
            return Err(OpenError::DeviceNotClaimed(port));
        }

        info!(
            "Opened {}interface {} ({})",
            identity.description(),
            port,
            chip
        );

        Ok(LibUsbTransport {
            handle,
            chip,
            port,
            claimed: true,
            timeouts,
        })
    }
}

pub struct LibUsbTransport {
    handle: DeviceHandle<Context>,
    chip: ChipType,
    port: InterfacePort,
    claimed: bool,
    timeouts: Timeouts,
}

impl FtdiTransport for LibUsbTransport {
    fn write_control(
        &mut self,
        request: SioRequest,
        value: u16,
        index: u16,
    ) -> Result<(), rusb::Error> {
        self.handle.write_control(
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
            request.request_id(),
            value,
            index,
            &[],
            self.timeouts.write,
        )?;

        Ok(())
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, rusb::Error> {
        self.handle.write_bulk(endpoint, data, self.timeouts.write)
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize, rusb::Error> {
        self.handle.read_bulk(endpoint, buf, self.timeouts.read)
    }

    fn chip_type(&self) -> ChipType {
        self.chip
    }

    fn release(&mut self) -> Result<(), rusb::Error> {
        if !self.claimed {
            return Ok(());
        }
        self.claimed = false;
        self.handle.release_interface(self.port.usb_interface())
    }
}

impl Drop for LibUsbTransport {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            debug!("Error releasing interface {}: {}", self.port, error);
        }
    }
}

fn read_device_strings(
    device: &Device<Context>,
    descriptor: &DeviceDescriptor,
    timeout: Duration,
) -> Result<DeviceStrings, rusb::Error> {
    let handle = device.open()?;

    let languages = handle.read_languages(timeout)?;
    let language = languages
        .get(0)
        .ok_or(rusb::Error::NotFound)?
        .to_owned();

    let manufacturer = handle.read_manufacturer_string(language, descriptor, timeout)?;
    let product = handle.read_product_string(language, descriptor, timeout)?;

    // Some chip revisions simply refuse this one, which isn't fatal.
    let serial = match handle.read_serial_number_string(language, descriptor, timeout) {
        Ok(serial) => Some(serial),
        Err(error) => {
            debug!("Unable to read serial number from {:?}: {}", device, error);
            None
        }
    };

    Ok(DeviceStrings {
        manufacturer,
        product,
        serial,
    })
}

fn chip_type(descriptor: &DeviceDescriptor) -> ChipType {
    ChipType::from_device_version(
        bcd_device(descriptor.device_version()),
        descriptor.serial_number_string_index().is_some(),
    )
}

// rusb hands the revision back decoded, put it back together as the raw bcdDevice.
fn bcd_device(version: Version) -> u16 {
    let major = u16::from(version.major());
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | (u16::from(version.minor()) << 4)
        | u16::from(version.sub_minor())
}
