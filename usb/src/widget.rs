use crate::catalog::WidgetIdentity;
use crate::device::base::UsbBus;
use crate::error::DeviceQueryError;
use crate::interface::Interface;
use ftdidmx_types::{ChipType, InterfacePort};
use std::sync::{Arc, OnceLock};

/// A single physical chip. Interfaces built from it hold an `Arc` back to it, so it's
/// always around for as long as any of its ports are.
pub struct Widget<B: UsbBus> {
    identity: WidgetIdentity,
    bus: Arc<B>,
    chip: OnceLock<ChipType>,
}

impl<B: UsbBus> Widget<B> {
    pub fn new(bus: Arc<B>, identity: WidgetIdentity) -> Self {
        Self {
            identity,
            bus,
            chip: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &WidgetIdentity {
        &self.identity
    }
    pub fn name(&self) -> &str {
        self.identity.name()
    }
    pub fn serial(&self) -> &str {
        self.identity.serial()
    }
    pub fn id(&self) -> u32 {
        self.identity.id()
    }
    pub fn vendor_id(&self) -> u16 {
        self.identity.vendor_id()
    }
    pub fn product_id(&self) -> u16 {
        self.identity.product_id()
    }
    pub fn description(&self) -> String {
        self.identity.description()
    }

    pub(crate) fn bus(&self) -> &B {
        &self.bus
    }

    /// Opens the chip just long enough to find out what it is, the answer is kept so later
    /// calls don't touch the device.
    pub fn chip_type(&self) -> Result<ChipType, DeviceQueryError> {
        if let Some(chip) = self.chip.get() {
            return Ok(*chip);
        }

        let chip = self.bus.query_chip(&self.identity)?;
        let _ = self.chip.set(chip);
        Ok(chip)
    }

    pub fn interface_count(&self) -> Result<u8, DeviceQueryError> {
        Ok(self.chip_type()?.interface_count())
    }

    pub fn ports(&self) -> Result<Vec<InterfacePort>, DeviceQueryError> {
        Ok((0..self.interface_count()?)
            .filter_map(InterfacePort::from_ordinal)
            .collect())
    }

    /// One closed Interface for each port on the chip.
    pub fn interfaces(self: &Arc<Self>) -> Result<Vec<Interface<B>>, DeviceQueryError> {
        Ok(self
            .ports()?
            .into_iter()
            .map(|port| Interface::new(self.clone(), port))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockBus, MockDevice};
    use crate::{PID_FT232, PID_FT4232, VID_FTDI};
    use ftdidmx_types::InterfaceState;

    #[test]
    fn single_port_chip() {
        let bus = Arc::new(MockBus::new(vec![MockDevice::ft232r("A1000")]));
        let widget = Widget::new(
            bus.clone(),
            WidgetIdentity::new("FT232R USB UART", "A1000", 0, VID_FTDI, PID_FT232),
        );

        assert_eq!(widget.interface_count().unwrap(), 1);
        assert_eq!(widget.chip_type().unwrap(), ChipType::R);
        assert_eq!(bus.state().open_handles, 0);

        // The second lookup comes from the cache
        assert_eq!(bus.state().chip_queries, 1);
    }

    #[test]
    fn quad_port_chip_builds_four_interfaces() {
        let bus = Arc::new(MockBus::new(vec![MockDevice::ft4232h("FT4XYZ")]));
        let widget = Arc::new(Widget::new(
            bus,
            WidgetIdentity::new("Quad RS232-HS", "FT4XYZ", 0, VID_FTDI, PID_FT4232),
        ));

        assert_eq!(widget.interface_count().unwrap(), 4);
        let interfaces = widget.interfaces().unwrap();
        let ports: Vec<InterfacePort> = interfaces.iter().map(|i| i.port()).collect();
        assert_eq!(
            ports,
            vec![
                InterfacePort::A,
                InterfacePort::B,
                InterfacePort::C,
                InterfacePort::D
            ]
        );
        assert!(interfaces
            .iter()
            .all(|interface| interface.state() == InterfaceState::Closed));
    }

    #[test]
    fn unplugged_chip_fails_query() {
        let bus = Arc::new(MockBus::new(vec![]));
        let widget = Widget::new(
            bus,
            WidgetIdentity::new("FT232R USB UART", "GONE", 0, VID_FTDI, PID_FT232),
        );
        assert!(matches!(
            widget.interface_count(),
            Err(DeviceQueryError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn claimed_chip_fails_query() {
        let bus = Arc::new(MockBus::new(vec![MockDevice::ft232r("A1000").unopenable()]));
        let widget = Widget::new(
            bus,
            WidgetIdentity::new("FT232R USB UART", "A1000", 0, VID_FTDI, PID_FT232),
        );
        assert!(matches!(
            widget.interface_count(),
            Err(DeviceQueryError::UsbError { .. })
        ));
    }
}
