// The FTDI 'SIO' vendor requests. All of these are OUT control transfers with no data stage,
// everything the chip needs is carried in the value and index fields.
use ftdidmx_types::{ChipType, InterfacePort};
use strum::Display;

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum SioRequest {
    Reset,
    SetModemCtrl,
    SetFlowCtrl,
    SetBaudRate,
    SetData,
}

impl SioRequest {
    pub fn request_id(&self) -> u8 {
        match self {
            SioRequest::Reset => 0x00,
            SioRequest::SetModemCtrl => 0x01,
            SioRequest::SetFlowCtrl => 0x02,
            SioRequest::SetBaudRate => 0x03,
            SioRequest::SetData => 0x04,
        }
    }
}

// Values for SioRequest::Reset
pub const SIO_RESET_SIO: u16 = 0;
pub const SIO_RESET_PURGE_RX: u16 = 1;
pub const SIO_RESET_PURGE_TX: u16 = 2;

// Value for SioRequest::SetFlowCtrl, OR'd with the port index
pub const SIO_DISABLE_FLOW_CTRL: u16 = 0x0000;

// Value for SioRequest::SetModemCtrl, the high byte is the mask of lines being changed.
pub const SIO_SET_RTS_LOW: u16 = 0x0200;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parity {
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopBits {
    One = 0,
    OnePointFive = 1,
    Two = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineProperties {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub break_on: bool,
}

impl LineProperties {
    /// 8N2, break released.
    pub const DMX: LineProperties = LineProperties {
        data_bits: 8,
        parity: Parity::None,
        stop_bits: StopBits::Two,
        break_on: false,
    };

    pub fn with_break(self, break_on: bool) -> Self {
        Self { break_on, ..self }
    }

    pub fn value(&self) -> u16 {
        u16::from(self.data_bits)
            | (self.parity as u16) << 8
            | (self.stop_bits as u16) << 11
            | u16::from(self.break_on) << 14
    }
}

pub fn in_endpoint(port: InterfacePort) -> u8 {
    0x81 + 2 * port.usb_interface()
}

pub fn out_endpoint(port: InterfacePort) -> u8 {
    0x02 + 2 * port.usb_interface()
}

const C_CLK: u64 = 48_000_000;
const H_CLK: u64 = 120_000_000;

// Sub-integer divisor bits, indexed by eighths.
const FRAC_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];
const H_CLK_FLAG: u32 = 0x20000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BaudDivisor {
    pub actual: u32,
    pub value: u16,
    pub index: u16,
}

/// Works out the SetBaudRate value / index pair for a chip, along with the rate it'll really
/// run at. The divisor is in eighths, so most rates can only be approximated.
pub fn baud_divisor(chip: ChipType, port: InterfacePort, baud: u32) -> Option<BaudDivisor> {
    if baud == 0 {
        return None;
    }

    let baud = u64::from(baud);
    let (actual, encoded) = if chip.is_h_series() && baud * 10 > H_CLK / 0x3fff {
        let (actual, encoded) = clock_bits(baud, H_CLK, 10);
        (actual, encoded | H_CLK_FLAG)
    } else {
        clock_bits(baud, C_CLK, 16)
    };

    let value = (encoded & 0xffff) as u16;
    let index = if chip.has_port_index() {
        ((encoded >> 8) & 0xff00) as u16 | port.index()
    } else {
        (encoded >> 16) as u16
    };

    Some(BaudDivisor {
        actual,
        value,
        index,
    })
}

fn clock_bits(baud: u64, clock: u64, clock_div: u64) -> (u32, u32) {
    // The three fastest rates have dedicated codes
    if baud >= clock / clock_div {
        return ((clock / clock_div) as u32, 0);
    }
    if baud >= clock / (clock_div + clock_div / 2) {
        return ((clock / (clock_div + clock_div / 2)) as u32, 1);
    }
    if baud >= clock / (2 * clock_div) {
        return ((clock / (2 * clock_div)) as u32, 2);
    }

    // Calculate in sixteenths so we can round to the nearest eighth
    let divisor = clock * 16 / clock_div / baud;
    let mut best_divisor = if divisor & 1 == 1 {
        divisor / 2 + 1
    } else {
        divisor / 2
    };
    if best_divisor > 0x20000 {
        best_divisor = 0x1ffff;
    }

    let best_baud = clock * 16 / clock_div / best_divisor;
    let best_baud = if best_baud & 1 == 1 {
        best_baud / 2 + 1
    } else {
        best_baud / 2
    };

    let encoded = (best_divisor >> 3) as u32 | (FRAC_CODE[(best_divisor & 0x7) as usize] << 14);
    (best_baud as u32, encoded)
}
