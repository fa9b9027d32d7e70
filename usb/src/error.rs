use ftdidmx_types::{InterfacePort, SetupStep};

#[derive(thiserror::Error, Debug)]
pub enum EnumerationError {
    #[error("Unable to initialise libusb: {0}")]
    Context(rusb::Error),

    #[error("Unable to list USB devices: {0}")]
    DeviceList(rusb::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum DeviceQueryError {
    #[error("{0} is no longer attached")]
    DeviceNotFound(String),

    #[error("Unable to query {description}: {source}")]
    UsbError {
        description: String,
        #[source]
        source: rusb::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum OpenError {
    #[error("Interface is already open")]
    AlreadyOpen,

    #[error("No matching FTDI device was found")]
    DeviceNotFound,

    #[error("Device does not have an interface {0}")]
    InterfaceNotPresent(InterfacePort),

    #[error("Unable to claim interface {0}, it may be in use by another process")]
    DeviceNotClaimed(InterfacePort),

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("Unable to {step}, the interface is not open")]
    NotOpen { step: SetupStep },

    #[error("Unable to {step}: {source}")]
    UsbError {
        step: SetupStep,
        #[source]
        source: rusb::Error,
    },

    #[error("Closest achievable baud rate is {actual}, {requested} was requested")]
    BaudRateMismatch { requested: u32, actual: u32 },
}

impl ConfigurationError {
    /// The setup step which failed, so callers can retry just that step.
    pub fn step(&self) -> SetupStep {
        match self {
            ConfigurationError::NotOpen { step } => *step,
            ConfigurationError::UsbError { step, .. } => *step,
            ConfigurationError::BaudRateMismatch { .. } => SetupStep::BaudRate,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Interface is not open")]
    NotOpen,

    #[error("Interface has not been configured for output")]
    NotConfigured,

    #[error("Partial write, {sent} of {expected} bytes were accepted")]
    Partial { sent: usize, expected: usize },

    #[error("No data was available to read")]
    NoData,

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),
}
