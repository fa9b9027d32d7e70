#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use strum::{Display, EnumCount, EnumIter};

/// Number of channel slots in a single DMX512 universe.
pub const DMX_UNIVERSE_SIZE: usize = 512;

/// The NULL start code, sent ahead of every dimmer frame.
pub const DMX512_START_CODE: u8 = 0x00;

/// The fixed DMX512 line rate.
pub const DMX_BAUD_RATE: u32 = 250_000;

// Minimums from the DMX512 timing contract, in microseconds.
pub const DMX_MIN_BREAK_MICROS: u64 = 92;
pub const DMX_MIN_MAB_MICROS: u64 = 12;

// The fastest full universe refresh the line rate allows.
pub const DMX_MAX_FREQUENCY: u32 = 44;

#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InterfacePort {
    #[default]
    A,
    B,
    C,
    D,
}

impl InterfacePort {
    /// The index used in SIO control requests (A = 1).
    pub fn index(&self) -> u16 {
        *self as u16 + 1
    }

    /// The USB interface number that has to be claimed for this port.
    pub fn usb_interface(&self) -> u8 {
        *self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<InterfacePort> {
        match ordinal {
            0 => Some(InterfacePort::A),
            1 => Some(InterfacePort::B),
            2 => Some(InterfacePort::C),
            3 => Some(InterfacePort::D),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Display, EnumIter, PartialEq, Eq)]
pub enum ChipType {
    #[strum(to_string = "FT8U232AM")]
    Am,
    #[strum(to_string = "FT232BM")]
    Bm,
    #[strum(to_string = "FT2232C")]
    Ft2232C,
    #[strum(to_string = "FT232R")]
    R,
    #[strum(to_string = "FT2232H")]
    Ft2232H,
    #[strum(to_string = "FT4232H")]
    Ft4232H,
    #[strum(to_string = "FT232H")]
    Ft232H,
    #[strum(to_string = "FT230X")]
    Ft230X,
}

impl ChipType {
    /// Classifies a chip from its bcdDevice revision. Anything unrecognised is
    /// treated as a BM, which is what the chip family falls back to.
    pub fn from_device_version(bcd_device: u16, has_serial: bool) -> ChipType {
        match bcd_device {
            0x0200 if !has_serial => ChipType::Bm,
            0x0200 => ChipType::Am,
            0x0400 => ChipType::Bm,
            0x0500 => ChipType::Ft2232C,
            0x0600 => ChipType::R,
            0x0700 => ChipType::Ft2232H,
            0x0800 => ChipType::Ft4232H,
            0x0900 => ChipType::Ft232H,
            0x1000 => ChipType::Ft230X,
            _ => ChipType::Bm,
        }
    }

    pub fn interface_count(&self) -> u8 {
        match self {
            ChipType::Ft2232C | ChipType::Ft2232H => 2,
            ChipType::Ft4232H => 4,
            _ => 1,
        }
    }

    /// High speed parts, these run from a 120MHz clock and use 512 byte packets.
    pub fn is_h_series(&self) -> bool {
        matches!(
            self,
            ChipType::Ft2232H | ChipType::Ft4232H | ChipType::Ft232H
        )
    }

    /// Multi-port parts carry the port index in the low byte of the baud request.
    pub fn has_port_index(&self) -> bool {
        self.is_h_series() || *self == ChipType::Ft2232C
    }

    pub fn max_packet_size(&self) -> usize {
        if self.is_h_series() {
            512
        } else {
            64
        }
    }
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum InterfaceState {
    Closed,
    Open,
    Configured,
}

// Ordered as they are executed when preparing an interface for output
#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq)]
pub enum SetupStep {
    #[strum(to_string = "reset")]
    Reset,
    #[strum(to_string = "set line properties")]
    LineProperties,
    #[strum(to_string = "set baud rate")]
    BaudRate,
    #[strum(to_string = "set flow control")]
    FlowControl,
    #[strum(to_string = "clear RTS")]
    ClearRts,
    #[strum(to_string = "purge buffers")]
    PurgeBuffers,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl std::fmt::Display for UsbId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Break and mark-after-break lengths, and how often a frame is sent.
///
/// These are only honoured as closely as the host scheduler allows, sleeping
/// for 110us on a general purpose OS can easily take a millisecond.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FrameTiming {
    pub break_us: u64,
    pub mab_us: u64,
    pub frequency: u32,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self {
            break_us: 110,
            mab_us: 16,
            frequency: 30,
        }
    }
}

impl FrameTiming {
    pub fn validate(&self) -> Result<(), TimingError> {
        if self.break_us < DMX_MIN_BREAK_MICROS {
            return Err(TimingError::BreakTooShort(self.break_us));
        }
        if self.mab_us < DMX_MIN_MAB_MICROS {
            return Err(TimingError::MarkAfterBreakTooShort(self.mab_us));
        }
        if self.frequency == 0 || self.frequency > DMX_MAX_FREQUENCY {
            return Err(TimingError::Frequency(self.frequency));
        }
        Ok(())
    }

    /// Length of one frame in whole milliseconds, rounded to the nearest.
    pub fn frame_millis(&self) -> u64 {
        let frequency = u64::from(self.frequency.max(1));
        (1000 + frequency / 2) / frequency
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimingError {
    BreakTooShort(u64),
    MarkAfterBreakTooShort(u64),
    Frequency(u32),
}

impl std::fmt::Display for TimingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TimingError::BreakTooShort(us) => write!(
                f,
                "Break of {}us is shorter than the {}us minimum",
                us, DMX_MIN_BREAK_MICROS
            ),
            TimingError::MarkAfterBreakTooShort(us) => write!(
                f,
                "Mark after break of {}us is shorter than the {}us minimum",
                us, DMX_MIN_MAB_MICROS
            ),
            TimingError::Frequency(hz) => write!(
                f,
                "Frequency of {}Hz is outside of 1..={}Hz",
                hz, DMX_MAX_FREQUENCY
            ),
        }
    }
}

impl std::error::Error for TimingError {}

/// A single universe worth of channel values.
///
/// The length is the number of slots which have been set, slots beyond it are
/// always zero.
#[derive(Clone, PartialEq, Eq)]
pub struct DmxBuffer {
    channels: [u8; DMX_UNIVERSE_SIZE],
    length: usize,
}

impl Default for DmxBuffer {
    fn default() -> Self {
        Self {
            channels: [0; DMX_UNIVERSE_SIZE],
            length: 0,
        }
    }
}

impl DmxBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anything past 512 slots is dropped.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buffer = Self::default();
        let length = data.len().min(DMX_UNIVERSE_SIZE);
        buffer.channels[..length].copy_from_slice(&data[..length]);
        buffer.length = length;
        buffer
    }

    pub fn set_channel(&mut self, channel: usize, value: u8) -> bool {
        if channel >= DMX_UNIVERSE_SIZE {
            return false;
        }
        self.channels[channel] = value;
        self.length = self.length.max(channel + 1);
        true
    }

    pub fn get_channel(&self, channel: usize) -> Option<u8> {
        self.as_slice().get(channel).copied()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.channels[..self.length]
    }

    /// All 512 slots, including the zeroed ones past the length.
    pub fn channels(&self) -> &[u8; DMX_UNIVERSE_SIZE] {
        &self.channels
    }

    pub fn blackout(&mut self) {
        self.channels = [0; DMX_UNIVERSE_SIZE];
        self.length = DMX_UNIVERSE_SIZE;
    }
}

impl std::fmt::Debug for DmxBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmxBuffer")
            .field("length", &self.length)
            .field("channels", &self.as_slice())
            .finish()
    }
}
