use crate::device::base::Timeouts;
use crate::{PID_FT2232, PID_FT232, PID_FT232H, PID_FT4232, VID_FTDI};
use anyhow::{Context, Result};
use ftdidmx_types::{FrameTiming, InterfacePort, UsbId};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetSettings {
    /// Vendor / product pairs the catalog will pick up.
    pub devices: Vec<UsbId>,

    /// A widget is only reported if its manufacturer string contains one of these, an
    /// empty list accepts anything.
    pub manufacturers: Vec<String>,

    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,

    pub interface_index: InterfacePort,
    pub write_chunk_size: usize,

    pub timing: FrameTiming,

    /// Consecutive failed frames before the output thread re-runs the interface setup.
    pub max_failures: u32,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            devices: vec![
                UsbId::new(VID_FTDI, PID_FT232),
                UsbId::new(VID_FTDI, PID_FT2232),
                UsbId::new(VID_FTDI, PID_FT4232),
                UsbId::new(VID_FTDI, PID_FT232H),
            ],
            manufacturers: ["FTDI", "KMTRONIC", "KWMATIK", "WWW.SOH.CZ"]
                .iter()
                .map(|manufacturer| manufacturer.to_string())
                .collect(),
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            interface_index: InterfacePort::A,
            write_chunk_size: 4096,
            timing: FrameTiming::default(),
            max_failures: 10,
        }
    }
}

impl WidgetSettings {
    pub fn read(path: &Path) -> Result<WidgetSettings> {
        match File::open(path) {
            Ok(reader) => serde_json::from_reader(reader).context(format!(
                "Could not parse widget settings file at {}",
                path.to_string_lossy()
            )),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(WidgetSettings::default()),
            Err(error) => Err(error).context(format!(
                "Could not open widget settings file for reading at {}",
                path.to_string_lossy()
            )),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if let Err(e) = create_dir_all(parent) {
                if e.kind() != ErrorKind::AlreadyExists {
                    return Err(e).context(format!(
                        "Could not create settings directory at {}",
                        parent.to_string_lossy()
                    ))?;
                }
            }
        }
        let writer = File::create(path).context(format!(
            "Could not open widget settings file for writing at {}",
            path.to_string_lossy()
        ))?;
        serde_json::to_writer_pretty(writer, self).context(format!(
            "Could not write to widget settings file at {}",
            path.to_string_lossy()
        ))?;
        Ok(())
    }

    /// The configured pairs in order, with any repeats removed.
    pub fn devices(&self) -> Vec<UsbId> {
        let mut devices: Vec<UsbId> = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            if !devices.contains(device) {
                devices.push(*device);
            }
        }
        devices
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
        }
    }
}
