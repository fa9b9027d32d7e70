// An in-memory bus for tests. Every transfer made through a MockTransport is recorded so the
// order of requests hitting the 'chip' can be checked.
use crate::catalog::WidgetIdentity;
use crate::device::base::{DeviceStrings, FtdiTransport, Timeouts, UsbBus, UsbCandidate};
use crate::error::{DeviceQueryError, OpenError};
use crate::sio::SioRequest;
use ftdidmx_types::{ChipType, InterfacePort};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transfer {
    Control {
        request: SioRequest,
        value: u16,
        index: u16,
    },
    BulkOut {
        endpoint: u8,
        data: Vec<u8>,
    },
    BulkIn {
        endpoint: u8,
        requested: usize,
    },
    Release,
}

#[derive(Debug, Clone)]
pub(crate) struct MockDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub openable: bool,
}

impl MockDevice {
    pub fn ft232r(serial: &str) -> Self {
        Self {
            vendor_id: 0x0403,
            product_id: 0x6001,
            device_version: 0x0600,
            manufacturer: Some(String::from("FTDI")),
            product: Some(String::from("FT232R USB UART")),
            serial: Some(String::from(serial)),
            openable: true,
        }
    }

    pub fn ft4232h(serial: &str) -> Self {
        Self {
            product_id: 0x6011,
            device_version: 0x0800,
            product: Some(String::from("Quad RS232-HS")),
            ..Self::ft232r(serial)
        }
    }

    pub fn without_serial(self) -> Self {
        Self {
            serial: None,
            ..self
        }
    }

    pub fn with_manufacturer(self, manufacturer: Option<&str>) -> Self {
        Self {
            manufacturer: manufacturer.map(String::from),
            ..self
        }
    }

    pub fn with_ids(self, vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..self
        }
    }

    pub fn unopenable(self) -> Self {
        Self {
            openable: false,
            ..self
        }
    }

    fn chip_type(&self) -> ChipType {
        ChipType::from_device_version(self.device_version, self.serial.is_some())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub transfers: Vec<Transfer>,
    pub fail_request: Option<SioRequest>,
    pub write_limit: Option<usize>,
    pub read_data: Vec<u8>,
    pub open_handles: usize,
    pub chip_queries: usize,
    pub unplugged: bool,
    pub fail_enumeration: bool,
}

pub(crate) struct MockBus {
    devices: Mutex<Vec<MockDevice>>,
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_devices(&self, devices: Vec<MockDevice>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn controls(&self) -> Vec<(SioRequest, u16, u16)> {
        self.state()
            .transfers
            .iter()
            .filter_map(|transfer| match transfer {
                Transfer::Control {
                    request,
                    value,
                    index,
                } => Some((*request, *value, *index)),
                _ => None,
            })
            .collect()
    }

    pub fn bulk_writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .transfers
            .iter()
            .filter_map(|transfer| match transfer {
                Transfer::BulkOut { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_transfers(&self) {
        self.state().transfers.clear();
    }

    fn matching(&self, identity: &WidgetIdentity) -> Option<MockDevice> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|device| {
                device.vendor_id == identity.vendor_id()
                    && device.product_id == identity.product_id()
                    && (identity.serial().is_empty()
                        || device.serial.as_deref() == Some(identity.serial()))
            })
            .cloned()
    }
}

impl UsbBus for MockBus {
    type Transport = MockTransport;

    fn candidates(&self) -> Result<Vec<UsbCandidate>, rusb::Error> {
        if self.state().fail_enumeration {
            return Err(rusb::Error::Io);
        }

        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(position, device)| UsbCandidate {
                bus_number: 1,
                address: position as u8 + 1,
                vendor_id: device.vendor_id,
                product_id: device.product_id,
            })
            .collect())
    }

    fn read_strings(
        &self,
        candidate: &UsbCandidate,
        _timeout: Duration,
    ) -> Result<DeviceStrings, rusb::Error> {
        let devices = self.devices.lock().unwrap();
        let device = devices
            .get(usize::from(candidate.address) - 1)
            .ok_or(rusb::Error::NoDevice)?;

        if !device.openable {
            return Err(rusb::Error::Access);
        }

        Ok(DeviceStrings {
            manufacturer: device.manufacturer.clone().ok_or(rusb::Error::Pipe)?,
            product: device.product.clone().ok_or(rusb::Error::Pipe)?,
            serial: device.serial.clone(),
        })
    }

    fn query_chip(&self, identity: &WidgetIdentity) -> Result<ChipType, DeviceQueryError> {
        self.state().chip_queries += 1;

        let device = self
            .matching(identity)
            .ok_or_else(|| DeviceQueryError::DeviceNotFound(identity.description()))?;

        if !device.openable {
            return Err(DeviceQueryError::UsbError {
                description: identity.description(),
                source: rusb::Error::Busy,
            });
        }
        Ok(device.chip_type())
    }

    fn open(
        &self,
        identity: &WidgetIdentity,
        port: InterfacePort,
        _timeouts: Timeouts,
    ) -> Result<MockTransport, OpenError> {
        let device = self.matching(identity).ok_or(OpenError::DeviceNotFound)?;
        if !device.openable {
            return Err(OpenError::DeviceNotClaimed(port));
        }

        let chip = device.chip_type();
        if port.usb_interface() >= chip.interface_count() {
            return Err(OpenError::InterfaceNotPresent(port));
        }

        self.state().open_handles += 1;
        Ok(MockTransport {
            state: self.state.clone(),
            chip,
        })
    }
}

pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
    chip: ChipType,
}

impl MockTransport {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl FtdiTransport for MockTransport {
    fn write_control(
        &mut self,
        request: SioRequest,
        value: u16,
        index: u16,
    ) -> Result<(), rusb::Error> {
        let mut state = self.state();
        if state.unplugged {
            return Err(rusb::Error::NoDevice);
        }

        state.transfers.push(Transfer::Control {
            request,
            value,
            index,
        });
        if state.fail_request == Some(request) {
            return Err(rusb::Error::Pipe);
        }
        Ok(())
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, rusb::Error> {
        let mut state = self.state();
        if state.unplugged {
            return Err(rusb::Error::NoDevice);
        }

        let accepted = state
            .write_limit
            .map_or(data.len(), |limit| limit.min(data.len()));
        state.transfers.push(Transfer::BulkOut {
            endpoint,
            data: data[..accepted].to_vec(),
        });
        Ok(accepted)
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize, rusb::Error> {
        let mut state = self.state();
        if state.unplugged {
            return Err(rusb::Error::NoDevice);
        }

        state.transfers.push(Transfer::BulkIn {
            endpoint,
            requested: buf.len(),
        });
        let length = buf.len().min(state.read_data.len());
        for (target, byte) in buf.iter_mut().zip(state.read_data.drain(..length)) {
            *target = byte;
        }
        Ok(length)
    }

    fn chip_type(&self) -> ChipType {
        self.chip
    }

    fn release(&mut self) -> Result<(), rusb::Error> {
        let mut state = self.state();
        state.transfers.push(Transfer::Release);
        if state.unplugged {
            return Err(rusb::Error::NoDevice);
        }
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        let mut state = self.state();
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}
