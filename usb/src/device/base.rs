use crate::catalog::WidgetIdentity;
use crate::error::{DeviceQueryError, OpenError};
use crate::sio::SioRequest;
use ftdidmx_types::{ChipType, InterfacePort};
use std::time::Duration;

// The bus is the only thing which knows how to find and open a chip, everything above it
// (catalog, widget, interface) works purely in terms of these two traits.
pub trait UsbBus: Send + Sync {
    type Transport: FtdiTransport;

    /// Every device currently attached, no strings are read at this point.
    fn candidates(&self) -> Result<Vec<UsbCandidate>, rusb::Error>;

    /// Fails if the manufacturer or product can't be read. A serial number which
    /// can't be read is reported as None instead.
    fn read_strings(
        &self,
        candidate: &UsbCandidate,
        timeout: Duration,
    ) -> Result<DeviceStrings, rusb::Error>;

    /// Briefly opens the chip to work out what it is, the handle is gone by the time
    /// this returns.
    fn query_chip(&self, identity: &WidgetIdentity) -> Result<ChipType, DeviceQueryError>;

    fn open(
        &self,
        identity: &WidgetIdentity,
        port: InterfacePort,
        timeouts: Timeouts,
    ) -> Result<Self::Transport, OpenError>;
}

// A single claimed port on a chip. Dropping it releases the port.
pub trait FtdiTransport: Send {
    fn write_control(&mut self, request: SioRequest, value: u16, index: u16)
        -> Result<(), rusb::Error>;

    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, rusb::Error>;
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize, rusb::Error>;

    fn chip_type(&self) -> ChipType;

    fn max_packet_size(&self) -> usize {
        self.chip_type().max_packet_size()
    }

    fn release(&mut self) -> Result<(), rusb::Error>;
}

// We need the location for re-finding the device, and the descriptor fields for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbCandidate {
    pub(crate) bus_number: u8,
    pub(crate) address: u8,
    pub(crate) vendor_id: u16,
    pub(crate) product_id: u16,
}

impl UsbCandidate {
    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }
    pub fn address(&self) -> u8 {
        self.address
    }
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }
    pub fn product_id(&self) -> u16 {
        self.product_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(1),
            write: Duration::from_secs(1),
        }
    }
}
