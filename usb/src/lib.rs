pub use ftdidmx_types as types;
pub use rusb;

pub mod catalog;
pub mod error;
pub mod interface;
pub mod output;
pub mod settings;
pub mod sio;
pub mod widget;

mod device;

pub use crate::device::base::{DeviceStrings, FtdiTransport, Timeouts, UsbBus, UsbCandidate};
pub use crate::device::{LibUsbBus, LibUsbTransport};

pub const VID_FTDI: u16 = 0x0403;
pub const PID_FT232: u16 = 0x6001;
pub const PID_FT2232: u16 = 0x6010;
pub const PID_FT4232: u16 = 0x6011;
pub const PID_FT232H: u16 = 0x6014;
