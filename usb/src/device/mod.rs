// This module hides how widgets are reached. Everything above it only sees the UsbBus and
// FtdiTransport traits, the libusb implementation being the one used on real hardware.
pub mod base;

mod libusb;
pub use crate::device::libusb::device::{LibUsbBus, LibUsbTransport};

#[cfg(test)]
pub(crate) mod mock;
