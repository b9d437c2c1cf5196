use std::sync::{Mutex, MutexGuard, PoisonError};

use harpio_frame::request;
use harpio_frame::{Frame, HarpTimestamp, Payload, PayloadElement, PayloadType};
use harpio_transport::{Interrupter, Transport, TransportError};
use tracing::{debug, info, warn};

use crate::comm_log::CommLog;
use crate::config::DeviceConfig;
use crate::correlator::{Correlator, Reply};
use crate::error::{DeviceError, Result};
use crate::mode::{DeviceMode, DeviceState, OperationCtrl, ResetFlags};
use crate::register_map::{RegisterMap, RegisterSpec, OPERATION_CTRL, RESET_DEV, WHO_AM_I};
use crate::report::{DeviceInfo, FailureKind, ReadOutcome, RegisterDump, RegisterReadout, RegisterValue};
use crate::retry::RetryPolicy;

type Link = Correlator<Box<dyn Transport>>;

struct Inner {
    link: Option<Link>,
    state: DeviceState,
}

impl Inner {
    fn link(&mut self) -> Result<&mut Link> {
        self.link.as_mut().ok_or(DeviceError::NotConnected)
    }

    /// One request/reply with retry; ReadError/WriteError become errors.
    fn exchange(&mut self, request: &Frame, retry: &RetryPolicy) -> Result<Reply> {
        let link = self.link()?;
        retry.run(
            link,
            |link| link.send(request).and_then(reject_error_reply),
            |link| link.resync().map(|_| ()),
        )
    }

    fn cache_mode(&mut self, mode: DeviceMode) {
        if let DeviceState::Connected { mode: cached } = &mut self.state {
            if *cached != Some(mode) {
                info!(%mode, "device mode");
            }
            *cached = Some(mode);
        }
    }

    /// Drop the link after the remote end went away.
    fn lost(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.close();
        }
        self.state = DeviceState::Disconnected;
    }
}

fn reject_error_reply(reply: Reply) -> Result<Reply> {
    if reply.frame.message_type.is_error() {
        return Err(DeviceError::ErrorReply {
            address: reply.frame.address,
            message_type: reply.frame.message_type,
        });
    }
    Ok(reply)
}

/// A session with one HARP device.
///
/// Owns at most one open link. Every operation takes `&self` and runs under
/// an internal lock, so a `Device` can be shared across threads; requests
/// from different threads are serialised, never interleaved.
pub struct Device {
    config: DeviceConfig,
    inner: Mutex<Inner>,
    interrupter: Mutex<Option<Interrupter>>,
}

impl Device {
    /// Create a disconnected session.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                link: None,
                state: DeviceState::Disconnected,
            }),
            interrupter: Mutex::new(None),
        }
    }

    /// Create a session and connect it.
    pub fn open(config: DeviceConfig) -> Result<Self> {
        let device = Self::new(config);
        device.connect()?;
        Ok(device)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn registers(&self) -> &RegisterMap {
        &self.config.registers
    }

    pub fn state(&self) -> DeviceState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Open the configured address and verify the device identity.
    ///
    /// An open link is closed and reopened.
    pub fn connect(&self) -> Result<()> {
        self.config.validate()?;
        let transport = harpio_transport::open(&self.config.address, &self.config.serial())?;
        self.connect_transport(transport)
    }

    /// Connect over an already-open link.
    pub fn connect_transport(&self, transport: Box<dyn Transport>) -> Result<()> {
        self.config.registers.validate()?;
        let comm_log = self.config.comm_log.as_deref().map(CommLog::create).transpose()?;

        let mut inner = self.lock();
        if let Some(mut old) = inner.link.take() {
            let _ = old.close();
        }

        let link_name = transport.describe();
        let interrupter = transport.interrupter();
        let mut link = Correlator::new(transport)
            .with_timeout(self.config.timeout)
            .with_quiet_interval(self.config.quiet_interval);
        if let Some(log) = comm_log {
            link = link.with_comm_log(log);
        }

        inner.link = Some(link);
        inner.state = DeviceState::Connected { mode: None };
        *self.lock_interrupter() = interrupter;

        if self.config.verify_identity {
            if let Err(err) = self.verify_identity(&mut inner) {
                self.drop_link(&mut inner);
                return Err(err);
            }
        }
        info!(link = %link_name, "device connected");
        Ok(())
    }

    fn verify_identity(&self, inner: &mut Inner) -> Result<()> {
        let address = self.config.registers.address_of(WHO_AM_I)?;
        let reply = inner.exchange(&request::read_u16(address), &self.config.retry)?;
        let who_am_i = reply.frame.payload.value::<u16>()?;
        debug!(who_am_i, "device identity");
        match self.config.expected_who_am_i {
            Some(expected) if expected != who_am_i => Err(DeviceError::IdentityMismatch {
                expected,
                actual: who_am_i,
            }),
            _ => Ok(()),
        }
    }

    /// Close the link. Safe to call in any state.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        *self.lock_interrupter() = None;
        let closed = match inner.link.take() {
            Some(mut link) => link.close(),
            None => Ok(()),
        };
        if inner.state != DeviceState::Disconnected {
            info!("device disconnected");
        }
        inner.state = DeviceState::Disconnected;
        closed
    }

    /// Close the link from any thread, unblocking a request in progress.
    ///
    /// Socket links are shut down at once; serial links notice within one
    /// read slice. A link without an interrupter ends the request at its
    /// deadline.
    pub fn abort(&self) {
        if let Some(interrupter) = self.lock_interrupter().as_ref() {
            warn!("aborting device link");
            interrupter.interrupt();
        }
    }

    /// Send one frame and return its reply, without retry or reply checks.
    pub fn send(&self, frame: &Frame) -> Result<Reply> {
        self.with_inner(|inner| inner.link()?.send(frame))
    }

    /// Drain the link after a failed exchange.
    pub fn resync(&self) -> Result<usize> {
        self.with_inner(|inner| inner.link()?.resync())
    }

    /// Read a register with the configured retry policy.
    pub fn read_register(&self, address: u8, payload_type: PayloadType) -> Result<Reply> {
        let retry = self.config.retry;
        self.with_inner(|inner| inner.exchange(&request::read(address, payload_type), &retry))
    }

    /// Write a register with the configured retry policy.
    pub fn write_register(&self, address: u8, payload: Payload) -> Result<Reply> {
        let retry = self.config.retry;
        self.with_inner(|inner| inner.exchange(&request::write_payload(address, payload), &retry))
    }

    /// Read a single-element register as `T`.
    pub fn read<T: PayloadElement>(&self, address: u8) -> Result<T> {
        let reply = self.read_register(address, T::TYPE)?;
        Ok(reply.frame.payload.value::<T>()?)
    }

    /// Read an array register as `T` elements.
    pub fn read_array<T: PayloadElement>(&self, address: u8) -> Result<Vec<T>> {
        let reply = self.read_register(address, T::TYPE)?;
        Ok(reply.frame.payload.array::<T>()?)
    }

    pub fn write<T: PayloadElement>(&self, address: u8, value: T) -> Result<Reply> {
        self.write_register(address, Payload::from_value(value))
    }

    pub fn write_array<T: PayloadElement>(&self, address: u8, values: &[T]) -> Result<Reply> {
        self.write_register(address, Payload::from_slice(values))
    }

    /// Read a register by name or address from the register map.
    pub fn read_named(&self, key: &str) -> Result<Reply> {
        let spec = self.config.registers.resolve(key)?;
        self.read_register(spec.address, spec.payload_type)
    }

    /// Read the operating mode and refresh the cached state.
    pub fn read_device_mode(&self) -> Result<DeviceMode> {
        let address = self.config.registers.address_of(OPERATION_CTRL)?;
        let retry = self.config.retry;
        self.with_inner(|inner| {
            let reply = inner.exchange(&request::read_u8(address), &retry)?;
            let mode = OperationCtrl(reply.frame.payload.value::<u8>()?).mode();
            inner.cache_mode(mode);
            Ok(mode)
        })
    }

    /// Switch the operating mode.
    ///
    /// Reads OPERATION_CTRL, replaces the mode bits and writes it back with
    /// DUMP cleared. Returns the mode the device reports in its reply.
    pub fn set_mode(&self, mode: DeviceMode) -> Result<DeviceMode> {
        let address = self.config.registers.address_of(OPERATION_CTRL)?;
        let retry = self.config.retry;
        self.with_inner(|inner| {
            let current = inner.exchange(&request::read_u8(address), &retry)?;
            let current = OperationCtrl(current.frame.payload.value::<u8>()?);
            let next = current.with_mode(mode);

            let reply = inner.exchange(&request::write_u8(address, next.bits()), &retry)?;
            let reported = OperationCtrl(reply.frame.payload.value::<u8>()?).mode();
            if reported != mode {
                warn!(requested = %mode, reported = %reported, "device kept a different mode");
            }
            inner.cache_mode(reported);
            Ok(reported)
        })
    }

    /// Write RESET_DEV.
    ///
    /// Flags that reboot the device (RST_DEF, RST_EE, BOOT_USB) close the
    /// link and leave the session in `Reset` or `BootloaderUpdate`; a
    /// missing reply is expected for those. Other flags need a normal reply.
    pub fn reset_device(&self, flags: ResetFlags) -> Result<()> {
        let address = self.config.registers.address_of(RESET_DEV)?;
        let frame = request::write_u8(address, flags.bits());

        if !flags.reboots() {
            let retry = self.config.retry;
            return self.with_inner(|inner| inner.exchange(&frame, &retry).map(|_| ()));
        }

        let mut inner = self.lock();
        let link = inner.link()?;
        match link.send(&frame).and_then(reject_error_reply) {
            Ok(_) => {}
            Err(err @ DeviceError::ErrorReply { .. }) => return Err(err),
            Err(err) => debug!(error = %err, "no reset reply (device rebooting)"),
        }
        if let Some(mut link) = inner.link.take() {
            let _ = link.close();
        }
        *self.lock_interrupter() = None;
        inner.state = if flags.contains(ResetFlags::BOOT_USB) {
            DeviceState::BootloaderUpdate
        } else {
            DeviceState::Reset
        };
        info!(state = %inner.state, flags = flags.bits(), "device rebooting");
        Ok(())
    }

    /// Reboot into the USB bootloader for a firmware update.
    pub fn reboot_to_bootloader(&self) -> Result<()> {
        self.reset_device(ResetFlags::BOOT_USB)
    }

    /// Read the device clock.
    pub fn read_timestamp(&self) -> Result<HarpTimestamp> {
        let seconds = self.config.registers.address_of("TIMESTAMP_SECOND")?;
        let ticks = self.config.registers.address_of("TIMESTAMP_MICRO")?;
        let retry = self.config.retry;
        self.with_inner(|inner| {
            let seconds = inner.exchange(&request::read_u32(seconds), &retry)?;
            let ticks = inner.exchange(&request::read_u16(ticks), &retry)?;
            Ok(HarpTimestamp::new(
                seconds.frame.payload.value::<u32>()?,
                ticks.frame.payload.value::<u16>()?,
            ))
        })
    }

    /// Read every readable register of the map.
    ///
    /// A failed register is recorded in the dump and the link is
    /// resynchronised before the next read; the dump itself only fails if
    /// the session is not connected.
    pub fn dump_registers(&self) -> Result<RegisterDump> {
        let specs: Vec<RegisterSpec> = self
            .config
            .registers
            .iter()
            .filter(|r| r.access.readable())
            .cloned()
            .collect();
        self.dump(&specs)
    }

    /// Read the readable common registers (addresses below 32).
    pub fn dump_common(&self) -> Result<RegisterDump> {
        let specs: Vec<RegisterSpec> = self
            .config
            .registers
            .common()
            .filter(|r| r.access.readable())
            .cloned()
            .collect();
        self.dump(&specs)
    }

    /// Summarise the common registers.
    pub fn info(&self) -> Result<DeviceInfo> {
        let dump = self.dump_common()?;
        let info = DeviceInfo::from_dump(&dump);
        if let Some(mode) = info.mode {
            self.lock().cache_mode(mode);
        }
        Ok(info)
    }

    fn dump(&self, specs: &[RegisterSpec]) -> Result<RegisterDump> {
        let retry = self.config.retry;
        let mut inner = self.lock();
        inner.link()?;

        let mut dump = RegisterDump::default();
        for spec in specs {
            let outcome = match inner.exchange(&request::read(spec.address, spec.payload_type), &retry) {
                Ok(reply) => readout(&reply),
                Err(err) => {
                    warn!(register = %spec.name, address = spec.address, error = %err, "register read failed");
                    let outcome = ReadOutcome::Failed {
                        kind: FailureKind::of(&err),
                        error: err.to_string(),
                    };
                    if matches!(err, DeviceError::Transport(TransportError::Closed)) {
                        self.drop_link(&mut inner);
                    } else if let Ok(link) = inner.link() {
                        if let Err(resync) = link.resync() {
                            warn!(error = %resync, "resync after failed register read");
                        }
                    }
                    outcome
                }
            };
            dump.registers.push(RegisterReadout {
                name: spec.name.clone(),
                address: spec.address,
                outcome,
            });
        }
        Ok(dump)
    }

    fn with_inner<R>(&self, op: impl FnOnce(&mut Inner) -> Result<R>) -> Result<R> {
        let mut inner = self.lock();
        let result = op(&mut inner);
        if let Err(DeviceError::Transport(TransportError::Closed)) = &result {
            warn!("device link closed");
            self.drop_link(&mut inner);
        }
        result
    }

    /// Forget a link that is gone, along with its interrupter.
    fn drop_link(&self, inner: &mut Inner) {
        inner.lost();
        *self.lock_interrupter() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_interrupter(&self) -> MutexGuard<'_, Option<Interrupter>> {
        self.interrupter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.config.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn readout(reply: &Reply) -> ReadOutcome {
    let payload = &reply.frame.payload;
    match RegisterValue::from_payload(payload) {
        Ok(value) => ReadOutcome::Ok {
            value,
            payload_type: payload.payload_type(),
            timestamp: reply.frame.timestamp.map(|ts| ts.as_secs_f64()),
        },
        Err(err) => ReadOutcome::Failed {
            kind: FailureKind::Format,
            error: err.to_string(),
        },
    }
}
