// A single serial port on a widget, driven as a DMX512 transmitter.
//
// The port moves through Closed -> Open -> Configured. The transport only exists while the port
// is open, so there's nothing to accidentally write to while it's closed. Nothing in here
// retries, if a request fails the caller decides what happens next.
//
// Calls on one Interface must come from one place at a time (everything takes &mut self),
// separate Interfaces, even on the same chip, have nothing in common and can be driven from
// separate threads.
use crate::device::base::{FtdiTransport, Timeouts, UsbBus};
use crate::error::{ConfigurationError, OpenError, TransportError};
use crate::settings::WidgetSettings;
use crate::sio::{
    baud_divisor, in_endpoint, out_endpoint, LineProperties, SioRequest,
    SIO_DISABLE_FLOW_CTRL, SIO_RESET_PURGE_RX, SIO_RESET_PURGE_TX, SIO_RESET_SIO,
    SIO_SET_RTS_LOW,
};
use crate::widget::Widget;
use byteorder::{ByteOrder, LittleEndian};
use ftdidmx_types::{
    DmxBuffer, InterfacePort, InterfaceState, SetupStep, DMX512_START_CODE, DMX_BAUD_RATE,
    DMX_UNIVERSE_SIZE,
};
use log::{debug, info, warn};
use std::sync::Arc;

// Every bulk IN packet starts with two bytes of modem / line status.
const STATUS_BYTES: usize = 2;

const DEFAULT_CHUNK_SIZE: usize = 4096;

enum Session<T> {
    Closed,
    Open(T),
    Configured(T),
}

pub struct Interface<B: UsbBus> {
    widget: Arc<Widget<B>>,
    port: InterfacePort,
    timeouts: Timeouts,
    chunk_size: usize,
    session: Session<B::Transport>,

    // Payload bytes from the last bulk read that didn't fit in the caller's buffer.
    pending: Vec<u8>,
}

impl<B: UsbBus> Interface<B> {
    pub fn new(widget: Arc<Widget<B>>, port: InterfacePort) -> Self {
        Self {
            widget,
            port,
            timeouts: Timeouts::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            session: Session::Closed,
            pending: Vec::new(),
        }
    }

    pub fn from_settings(widget: Arc<Widget<B>>, settings: &WidgetSettings) -> Self {
        Self::new(widget, settings.interface_index)
            .with_timeouts(settings.timeouts())
            .with_write_chunk_size(settings.write_chunk_size)
    }

    /// Only applies to the next open.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_write_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn widget(&self) -> &Arc<Widget<B>> {
        &self.widget
    }

    pub fn port(&self) -> InterfacePort {
        self.port
    }

    pub fn description(&self) -> String {
        self.widget.description()
    }

    pub fn state(&self) -> InterfaceState {
        match self.session {
            Session::Closed => InterfaceState::Closed,
            Session::Open(_) => InterfaceState::Open,
            Session::Configured(_) => InterfaceState::Configured,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.session, Session::Closed)
    }

    pub fn open(&mut self) -> Result<(), OpenError> {
        if self.is_open() {
            return Err(OpenError::AlreadyOpen);
        }

        if self.widget.serial().is_empty() {
            warn!(
                "{} has no serial number, which might cause issues with multiple devices",
                self.widget.name()
            );
        }

        let transport = self
            .widget
            .bus()
            .open(self.widget.identity(), self.port, self.timeouts)?;
        self.pending.clear();
        self.session = Session::Open(transport);
        Ok(())
    }

    /// Safe to call in any state. Errors releasing an already severed device are logged
    /// and otherwise ignored.
    pub fn close(&mut self) {
        let mut transport = match std::mem::replace(&mut self.session, Session::Closed) {
            Session::Closed => return,
            Session::Open(transport) | Session::Configured(transport) => transport,
        };
        self.pending.clear();

        if let Err(error) = transport.release() {
            debug!(
                "Error releasing {}interface {}: {}",
                self.description(),
                self.port,
                error
            );
        }
        info!("Closed {}interface {}", self.description(), self.port);
    }

    pub fn reset(&mut self) -> Result<(), ConfigurationError> {
        self.control(SetupStep::Reset, SioRequest::Reset, SIO_RESET_SIO, self.port.index())
    }

    /// 8 data bits, no parity and 2 stop bits.
    pub fn set_line_properties(&mut self) -> Result<(), ConfigurationError> {
        self.control(
            SetupStep::LineProperties,
            SioRequest::SetData,
            LineProperties::DMX.value(),
            self.port.index(),
        )
    }

    pub fn set_baud_rate(&mut self) -> Result<(), ConfigurationError> {
        let step = SetupStep::BaudRate;
        let chip = self
            .transport()
            .ok_or(ConfigurationError::NotOpen { step })?
            .chip_type();

        let divisor = baud_divisor(chip, self.port, DMX_BAUD_RATE).ok_or(
            ConfigurationError::BaudRateMismatch {
                requested: DMX_BAUD_RATE,
                actual: 0,
            },
        )?;

        // Receivers won't tolerate any drift, so an approximation is as good as a failure
        if divisor.actual != DMX_BAUD_RATE {
            return Err(ConfigurationError::BaudRateMismatch {
                requested: DMX_BAUD_RATE,
                actual: divisor.actual,
            });
        }

        self.control(step, SioRequest::SetBaudRate, divisor.value, divisor.index)
    }

    pub fn set_flow_control(&mut self) -> Result<(), ConfigurationError> {
        self.control(
            SetupStep::FlowControl,
            SioRequest::SetFlowCtrl,
            0,
            SIO_DISABLE_FLOW_CTRL | self.port.index(),
        )
    }

    pub fn clear_rts(&mut self) -> Result<(), ConfigurationError> {
        self.control(
            SetupStep::ClearRts,
            SioRequest::SetModemCtrl,
            SIO_SET_RTS_LOW,
            self.port.index(),
        )
    }

    pub fn purge_buffers(&mut self) -> Result<(), ConfigurationError> {
        let index = self.port.index();
        self.control(SetupStep::PurgeBuffers, SioRequest::Reset, SIO_RESET_PURGE_RX, index)?;
        self.pending.clear();
        self.control(SetupStep::PurgeBuffers, SioRequest::Reset, SIO_RESET_PURGE_TX, index)
    }

    /// Runs every setup step in order, the interface is only Configured if all of them
    /// succeed. On failure it's left Open, and the error says which step broke.
    pub fn setup_output(&mut self) -> Result<(), ConfigurationError> {
        // Re-running setup on a configured port starts from Open again
        self.session = match std::mem::replace(&mut self.session, Session::Closed) {
            Session::Configured(transport) => Session::Open(transport),
            session => session,
        };

        if !self.is_open() {
            return Err(ConfigurationError::NotOpen {
                step: SetupStep::Reset,
            });
        }

        // Baud before flow control, purge last so it catches anything the earlier
        // requests left behind.
        self.reset()?;
        self.set_line_properties()?;
        self.set_baud_rate()?;
        self.set_flow_control()?;
        self.clear_rts()?;
        self.purge_buffers()?;

        self.session = match std::mem::replace(&mut self.session, Session::Closed) {
            Session::Open(transport) => Session::Configured(transport),
            session => session,
        };
        debug!("{}interface {} configured for DMX", self.description(), self.port);
        Ok(())
    }

    /// Raises or drops the line break. This happens as soon as the request lands, how long
    /// the break lasts is entirely down to the caller, and is only as accurate as the host
    /// scheduler allows.
    pub fn set_break(&mut self, on: bool) -> Result<(), TransportError> {
        let index = self.port.index();
        let transport = self.transport().ok_or(TransportError::NotOpen)?;
        transport.write_control(
            SioRequest::SetData,
            LineProperties::DMX.with_break(on).value(),
            index,
        )?;
        Ok(())
    }

    /// Sends the start code, followed by all 512 slots regardless of the buffer length.
    pub fn write(&mut self, data: &DmxBuffer) -> Result<(), TransportError> {
        let mut frame = [0; DMX_UNIVERSE_SIZE + 1];
        frame[0] = DMX512_START_CODE;
        frame[1..].copy_from_slice(data.channels());
        self.send_frame(&frame)
    }

    /// Sends the start code followed by only the slots which have been set.
    pub fn write_short(&mut self, data: &DmxBuffer) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(DMX512_START_CODE);
        frame.extend_from_slice(data.as_slice());
        self.send_frame(&frame)
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let chunk_size = self.chunk_size;
        let endpoint = out_endpoint(self.port);
        let transport = match &mut self.session {
            Session::Configured(transport) => transport,
            Session::Open(_) => return Err(TransportError::NotConfigured),
            Session::Closed => return Err(TransportError::NotOpen),
        };

        let mut sent = 0;
        for chunk in frame.chunks(chunk_size) {
            let written = transport.write_bulk(endpoint, chunk)?;
            sent += written;
            if written < chunk.len() {
                return Err(TransportError::Partial {
                    sent,
                    expected: frame.len(),
                });
            }
        }
        Ok(())
    }

    /// Reads whatever the chip has buffered, up to the size of `buf`. Anything a USB packet
    /// carried past the end of `buf` is kept and handed out by the next call, before the chip
    /// is asked for more.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            self.fill_pending(buf.len())?;
        }
        if self.pending.is_empty() {
            return Err(TransportError::NoData);
        }

        let count = buf.len().min(self.pending.len());
        buf[..count].copy_from_slice(&self.pending[..count]);
        self.pending.drain(..count);
        Ok(count)
    }

    fn fill_pending(&mut self, wanted: usize) -> Result<(), TransportError> {
        let endpoint = in_endpoint(self.port);
        let transport = match &mut self.session {
            Session::Open(transport) | Session::Configured(transport) => transport,
            Session::Closed => return Err(TransportError::NotOpen),
        };

        let packet_size = transport.max_packet_size();
        let payload_size = packet_size - STATUS_BYTES;
        let packets = wanted.div_ceil(payload_size).max(1);

        let mut raw = vec![0; packets * packet_size];
        let length = transport.read_bulk(endpoint, &mut raw)?;
        raw.truncate(length);

        for packet in raw.chunks(packet_size) {
            if packet.len() < STATUS_BYTES {
                continue;
            }

            let status = LittleEndian::read_u16(&packet[..STATUS_BYTES]);
            debug!("Modem status: {:#06x}", status);
            self.pending.extend_from_slice(&packet[STATUS_BYTES..]);
        }
        Ok(())
    }

    fn transport(&mut self) -> Option<&mut B::Transport> {
        match &mut self.session {
            Session::Open(transport) | Session::Configured(transport) => Some(transport),
            Session::Closed => None,
        }
    }

    fn control(
        &mut self,
        step: SetupStep,
        request: SioRequest,
        value: u16,
        index: u16,
    ) -> Result<(), ConfigurationError> {
        let transport = self
            .transport()
            .ok_or(ConfigurationError::NotOpen { step })?;
        transport
            .write_control(request, value, index)
            .map_err(|source| ConfigurationError::UsbError { step, source })
    }
}

impl<B: UsbBus> Drop for Interface<B> {
    fn drop(&mut self) {
        self.close();
    }
}
