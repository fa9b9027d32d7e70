// Enumeration of attached widgets. This only ever reads descriptors, nothing here claims an
// interface, so a scan is safe to run while other widgets are busy sending frames.
use crate::device::base::UsbBus;
use crate::device::LibUsbBus;
use crate::error::EnumerationError;
use crate::settings::WidgetSettings;
use crate::widget::Widget;
use ftdidmx_types::UsbId;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Identity of a single chip found during a scan.
///
/// The `id` is only the position in that scan's results, (vendor, product, serial)
/// is what identifies a chip between scans, and only when the serial is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetIdentity {
    pub(crate) name: String,
    pub(crate) serial: String,
    pub(crate) id: u32,
    pub(crate) vendor_id: u16,
    pub(crate) product_id: u16,
}

impl WidgetIdentity {
    pub fn new(name: &str, serial: &str, id: u32, vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: String::from(name),
            serial: String::from(serial),
            id,
            vendor_id,
            product_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn serial(&self) -> &str {
        &self.serial
    }
    pub fn id(&self) -> u32 {
        self.id
    }
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }
    pub fn product_id(&self) -> u16 {
        self.product_id
    }
    pub fn usb_id(&self) -> UsbId {
        UsbId::new(self.vendor_id, self.product_id)
    }

    pub fn description(&self) -> String {
        format!("{} with serial number : {} ", self.name, self.serial)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub widgets: Vec<WidgetIdentity>,

    /// At least one widget in this scan came back without a serial number, so widgets
    /// sharing a vendor / product pair can't be told apart.
    pub missing_serial: bool,
}

pub struct WidgetCatalog<B: UsbBus> {
    bus: Arc<B>,
    devices: Vec<UsbId>,
    manufacturers: Vec<String>,
    timeout: Duration,
}

impl WidgetCatalog<LibUsbBus> {
    pub fn new(settings: &WidgetSettings) -> Result<Self, EnumerationError> {
        Ok(Self::with_bus(Arc::new(LibUsbBus::new()?), settings))
    }
}

impl<B: UsbBus> WidgetCatalog<B> {
    pub fn with_bus(bus: Arc<B>, settings: &WidgetSettings) -> Self {
        Self {
            bus,
            devices: settings.devices(),
            manufacturers: settings.manufacturers.clone(),
            timeout: settings.timeouts().read,
        }
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    pub fn widget(&self, identity: WidgetIdentity) -> Arc<Widget<B>> {
        Arc::new(Widget::new(self.bus.clone(), identity))
    }

    pub fn scan(&self) -> Result<ScanReport, EnumerationError> {
        let candidates = self
            .bus
            .candidates()
            .map_err(EnumerationError::DeviceList)?;

        let mut report = ScanReport::default();
        for usb_id in &self.devices {
            let matching = candidates.iter().filter(|candidate| {
                candidate.vendor_id() == usb_id.vendor_id
                    && candidate.product_id() == usb_id.product_id
            });

            for candidate in matching {
                let strings = match self.bus.read_strings(candidate, self.timeout) {
                    Ok(strings) => strings,
                    Err(error) => {
                        warn!(
                            "Unable to fetch string information from USB device {} at {}:{}, {}",
                            usb_id,
                            candidate.bus_number(),
                            candidate.address(),
                            error
                        );
                        continue;
                    }
                };

                if !self.is_known_manufacturer(&strings.manufacturer) {
                    info!(
                        "Unknown FTDI device with manufacturer string: '{}'",
                        strings.manufacturer
                    );
                    continue;
                }

                let serial = match strings.serial.filter(|serial| !serial.is_empty()) {
                    Some(serial) => serial,
                    None => {
                        warn!(
                            "{} ({}) has no readable serial number, multiple devices may not be distinguishable",
                            strings.product, usb_id
                        );
                        report.missing_serial = true;
                        String::new()
                    }
                };

                let identity = WidgetIdentity {
                    name: strings.product,
                    serial,
                    id: report.widgets.len() as u32,
                    vendor_id: usb_id.vendor_id,
                    product_id: usb_id.product_id,
                };

                info!(
                    "Found FTDI device {}from {}",
                    identity.description(),
                    strings.manufacturer
                );
                report.widgets.push(identity);
            }
        }

        debug!("Scan found {} widget(s)", report.widgets.len());
        Ok(report)
    }

    fn is_known_manufacturer(&self, manufacturer: &str) -> bool {
        self.manufacturers.is_empty()
            || self
                .manufacturers
                .iter()
                .any(|known| manufacturer.contains(known.as_str()))
    }
}
