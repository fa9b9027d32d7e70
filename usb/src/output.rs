// Continuous DMX output for a single interface.
//
// Every frame is: break, mark after break, start code + 512 slots, then a wait for the rest of
// the frame period. The break / MAB lengths are sleeps, so they're only as accurate as the
// host scheduler. If sleeping for 1ms takes more than BAD_GRANULARITY_LIMIT, the sleeps are
// dropped entirely (the USB round trip between requests is long enough on its own) and the
// frame wait busy-polls instead.
use crate::device::base::UsbBus;
use crate::interface::Interface;
use anyhow::{anyhow, Context, Result};
use ftdidmx_types::{DmxBuffer, FrameTiming, InterfaceState};
use futures::executor::block_on;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{sleep, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Sender;

const BAD_GRANULARITY_LIMIT: Duration = Duration::from_millis(3);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Granularity {
    Good,
    Bad,
}

pub struct DmxOutput {
    frame: Arc<Mutex<DmxBuffer>>,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    description: String,
}

impl DmxOutput {
    /// Takes ownership of the interface, opening and configuring it first if needed, and
    /// starts sending frames. The interface is closed when the output stops.
    ///
    /// If the interface can't be recovered after repeated failures, its description is
    /// sent on `event_sender`.
    pub fn start<B: UsbBus + 'static>(
        mut interface: Interface<B>,
        timing: FrameTiming,
        max_failures: u32,
        event_sender: Option<Sender<String>>,
    ) -> Result<Self> {
        timing.validate()?;

        let description = format!("{}interface {}", interface.description(), interface.port());
        if interface.state() != InterfaceState::Configured {
            if !interface.is_open() {
                interface
                    .open()
                    .context(format!("Unable to open {}", description))?;
            }
            interface
                .setup_output()
                .context(format!("Unable to configure {}", description))?;
        }

        let frame = Arc::new(Mutex::new(DmxBuffer::new()));
        let stopping = Arc::new(AtomicBool::new(false));

        let mut worker = OutputWorker {
            interface,
            frame: frame.clone(),
            stopping: stopping.clone(),
            timing,
            max_failures: max_failures.max(1),
            event_sender,
            granularity: Granularity::Good,
            failures: 0,
            reported: false,
        };

        let handle = std::thread::Builder::new()
            .name(format!("dmx-output-{}", worker.interface.port()))
            .spawn(move || worker.run())
            .context("Unable to spawn DMX output thread")?;

        info!("Started DMX output on {} at {}Hz", description, timing.frequency);
        Ok(Self {
            frame,
            stopping,
            handle: Some(handle),
            description,
        })
    }

    /// Replaces the frame being sent, the current frame is always finished first.
    pub fn set_frame(&self, buffer: &DmxBuffer) -> Result<()> {
        let mut frame = self
            .frame
            .lock()
            .map_err(|_| anyhow!("DMX frame lock poisoned"))?;
        *frame = buffer.clone();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("DMX output thread for {} panicked", self.description);
            } else {
                info!("Stopped DMX output on {}", self.description);
            }
        }
    }
}

impl Drop for DmxOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OutputWorker<B: UsbBus> {
    interface: Interface<B>,
    frame: Arc<Mutex<DmxBuffer>>,
    stopping: Arc<AtomicBool>,
    timing: FrameTiming,
    max_failures: u32,
    event_sender: Option<Sender<String>>,
    granularity: Granularity,
    failures: u32,
    reported: bool,
}

impl<B: UsbBus> OutputWorker<B> {
    fn run(&mut self) {
        self.granularity = measure_granularity();
        if self.granularity == Granularity::Bad {
            info!("Timer granularity is poor, break timing will rely on USB latency");
        }

        let frame_time = Duration::from_millis(self.timing.frame_millis());

        while !self.stopping.load(Ordering::Relaxed) {
            // Take a copy up front, so a frame being replaced mid-send can't tear.
            let buffer = match self.frame.lock() {
                Ok(frame) => frame.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };

            let frame_start = Instant::now();
            match self.send_frame(&buffer) {
                Ok(()) => {
                    self.failures = 0;
                    self.reported = false;
                }
                Err(error) => {
                    debug!("Frame failed on {}: {}", self.interface.description(), error);
                    self.failures += 1;
                    if self.failures >= self.max_failures {
                        self.failures = 0;
                        self.recover();
                    }
                }
            }

            self.wait_for_frame_end(frame_start, frame_time);
        }

        self.interface.close();
    }

    fn send_frame(&mut self, buffer: &DmxBuffer) -> Result<()> {
        self.interface.set_break(true)?;
        if self.granularity == Granularity::Good {
            sleep(Duration::from_micros(self.timing.break_us));
        }

        self.interface.set_break(false)?;
        if self.granularity == Granularity::Good {
            sleep(Duration::from_micros(self.timing.mab_us));
        }

        self.interface.write(buffer)?;
        Ok(())
    }

    fn recover(&mut self) {
        warn!(
            "{} failed {} frames in a row, reconfiguring",
            self.interface.description(),
            self.max_failures
        );

        let result = self.interface.setup_output().or_else(|error| {
            debug!("Setup failed ({}), reopening the interface", error);
            self.interface.close();
            self.interface.open()?;
            self.interface.setup_output()?;
            Ok::<(), anyhow::Error>(())
        });

        match result {
            Ok(()) => info!("{} recovered", self.interface.description()),
            Err(error) => {
                error!(
                    "Unable to recover {}: {}",
                    self.interface.description(),
                    error
                );
                self.report();
            }
        }
    }

    // Only report once per run of failures, the receiver doesn't need to hear about it
    // every time the thread retries.
    fn report(&mut self) {
        if self.reported {
            return;
        }
        if let Some(sender) = &self.event_sender {
            if sender.capacity() > 0 && !sender.is_closed() {
                if let Err(error) = block_on(sender.send(self.interface.description())) {
                    warn!("Unable to report output failure: {}", error);
                }
                self.reported = true;
            }
        }
    }

    fn wait_for_frame_end(&mut self, frame_start: Instant, frame_time: Duration) {
        if self.granularity == Granularity::Good {
            while frame_start.elapsed() < frame_time {
                sleep(Duration::from_millis(1));
            }
            return;
        }

        // See if the scheduler has improved enough to go back to sleeping
        let before = Instant::now();
        sleep(Duration::from_millis(1));
        if before.elapsed() < BAD_GRANULARITY_LIMIT {
            self.granularity = Granularity::Good;
            info!("Timer granularity has improved, using timed breaks");
        }

        while frame_start.elapsed() < frame_time {
            std::hint::spin_loop();
        }
    }
}

fn measure_granularity() -> Granularity {
    let before = Instant::now();
    sleep(Duration::from_millis(1));
    if before.elapsed() > BAD_GRANULARITY_LIMIT {
        Granularity::Bad
    } else {
        Granularity::Good
    }
}
