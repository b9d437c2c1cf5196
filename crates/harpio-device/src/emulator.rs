//! Software model of the HARP core register bank.
//!
//! [`Emulator`] answers request frames the way device firmware does, so
//! sessions, the CLI and tests can run without hardware. It keeps the
//! common registers, a monotonic device clock and any application
//! registers the caller adds, and can inject link faults.
//!
//! [`EmulatorListener`] serves an emulator on a Unix domain socket; connect
//! to it with the `unix:<path>` address form.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use harpio_frame::registers::{self, DEVICE_NAME_LEN};
use harpio_frame::{Frame, HarpTimestamp, MessageType, Payload};
use tracing::{debug, trace};

use crate::mode::{OperationCtrl, ResetFlags};

/// Fixed identity registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub who_am_i: u16,
    pub hw_version: (u8, u8),
    pub assembly_version: u8,
    pub core_version: (u8, u8),
    pub fw_version: (u8, u8),
    pub serial_number: u16,
    pub device_name: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            who_am_i: 1216,
            hw_version: (1, 0),
            assembly_version: 0,
            core_version: (1, 11),
            fw_version: (0, 1),
            serial_number: 0,
            device_name: "harpio emulator".to_string(),
        }
    }
}

/// Link faults to inject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Addresses that never answer.
    pub silent: HashSet<u8>,
    /// Addresses whose replies carry a wrong checksum.
    pub corrupt: HashSet<u8>,
}

/// What the emulator sends back for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Reply(Frame),
    /// A reply whose checksum byte must be damaged on the wire.
    Corrupted(Frame),
    /// The device reboots; the link ends.
    Close,
}

#[derive(Debug, Clone)]
struct AppRegister {
    value: Payload,
    writable: bool,
}

/// Emulated HARP device.
#[derive(Debug, Clone)]
pub struct Emulator {
    identity: Identity,
    operation_ctrl: u8,
    reset_status: u8,
    device_name: [u8; DEVICE_NAME_LEN],
    serial_number: u16,
    clock_config: u8,
    timestamp_offset: u8,
    origin: Instant,
    clock_base: Duration,
    app: BTreeMap<u8, AppRegister>,
    faults: Faults,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new(Identity::default())
    }
}

impl Emulator {
    pub fn new(identity: Identity) -> Self {
        let mut emulator = Self {
            device_name: [0; DEVICE_NAME_LEN],
            serial_number: identity.serial_number,
            identity,
            operation_ctrl: 0,
            reset_status: ResetFlags::BOOT_DEF.bits(),
            clock_config: 0,
            timestamp_offset: 0,
            origin: Instant::now(),
            clock_base: Duration::ZERO,
            app: BTreeMap::new(),
            faults: Faults::default(),
        };
        emulator.restore_name();
        emulator
    }

    /// Add an application register. Its type and element count are fixed by
    /// `initial`.
    pub fn with_register(mut self, address: u8, initial: Payload, writable: bool) -> Self {
        self.app.insert(
            address,
            AppRegister {
                value: initial,
                writable,
            },
        );
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    pub fn operation_ctrl(&self) -> OperationCtrl {
        OperationCtrl(self.operation_ctrl)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current device clock.
    pub fn now(&self) -> HarpTimestamp {
        HarpTimestamp::from_duration(self.clock_base + self.origin.elapsed())
    }

    /// Answer one request frame.
    pub fn handle(&mut self, request: &Frame) -> Vec<Output> {
        let address = request.address;
        let mut outputs = match request.message_type {
            MessageType::Read => vec![self.read(request)],
            MessageType::Write => self.write(request),
            other => {
                debug!(message_type = %other, address, "ignoring non-request frame");
                return Vec::new();
            }
        };

        if self.operation_ctrl().contains(OperationCtrl::MUTE_RPL) {
            trace!(address, "replies muted");
            outputs.retain(|o| matches!(o, Output::Close));
        }
        if self.faults.silent.contains(&address) {
            trace!(address, "silent register");
            outputs.retain(|o| matches!(o, Output::Close));
        }
        if self.faults.corrupt.contains(&address) {
            outputs = outputs
                .into_iter()
                .map(|o| match o {
                    Output::Reply(frame) => Output::Corrupted(frame),
                    other => other,
                })
                .collect();
        }
        outputs
    }

    fn read(&self, request: &Frame) -> Output {
        match self.value(request.address) {
            Some(value) if value.payload_type() == request.payload_type() => {
                self.reply(MessageType::Read, request.address, value)
            }
            _ => self.error(MessageType::ReadError, request),
        }
    }

    fn write(&mut self, request: &Frame) -> Vec<Output> {
        let address = request.address;
        let Some(current) = self.value(address) else {
            return vec![self.error(MessageType::WriteError, request)];
        };
        let payload = &request.payload;
        let shape_ok = payload.payload_type() == current.payload_type()
            && (payload.len() == current.len()
                || (address == registers::DEVICE_NAME && (1..=DEVICE_NAME_LEN).contains(&payload.len())));
        if !shape_ok {
            return vec![self.error(MessageType::WriteError, request)];
        }

        let bytes = payload.as_bytes();
        match address {
            registers::TIMESTAMP_SECOND => {
                let seconds = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let subsec = (self.clock_base + self.origin.elapsed()).subsec_nanos();
                self.origin = Instant::now();
                self.clock_base = Duration::new(u64::from(seconds), subsec);
            }
            registers::OPERATION_CTRL => {
                let written = bytes[0];
                self.operation_ctrl = written & !OperationCtrl::DUMP;
                debug!(mode = %self.operation_ctrl().mode(), "operation control written");
                if written & OperationCtrl::DUMP != 0 {
                    let bank = Payload::from_slice(self.packed_bank().as_ref());
                    return vec![self.reply(MessageType::Write, address, bank)];
                }
            }
            registers::RESET_DEV => return self.reset(ResetFlags::from_bits(bytes[0])),
            registers::DEVICE_NAME => {
                self.device_name = [0; DEVICE_NAME_LEN];
                self.device_name[..bytes.len()].copy_from_slice(bytes);
            }
            registers::SERIAL_NUMBER => self.serial_number = u16::from_le_bytes([bytes[0], bytes[1]]),
            registers::CLOCK_CONFIG => self.clock_config = bytes[0],
            registers::TIMESTAMP_OFFSET => self.timestamp_offset = bytes[0],
            _ => match self.app.get_mut(&address) {
                Some(register) if register.writable => register.value = payload.clone(),
                _ => return vec![self.error(MessageType::WriteError, request)],
            },
        }

        match self.value(address) {
            Some(value) => vec![self.reply(MessageType::Write, address, value)],
            None => vec![self.error(MessageType::WriteError, request)],
        }
    }

    fn reset(&mut self, flags: ResetFlags) -> Vec<Output> {
        let reply = self.reply(
            MessageType::Write,
            registers::RESET_DEV,
            Payload::from_value(flags.bits()),
        );
        if flags.contains(ResetFlags::NAME_TO_DEFAULT) {
            self.restore_name();
        }
        if !flags.reboots() {
            return vec![reply];
        }

        debug!(flags = flags.bits(), "emulated reboot");
        self.operation_ctrl = 0;
        self.clock_config = 0;
        self.timestamp_offset = 0;
        self.reset_status = if flags.contains(ResetFlags::RST_EE) {
            ResetFlags::BOOT_EE.bits()
        } else {
            ResetFlags::BOOT_DEF.bits()
        };
        self.origin = Instant::now();
        self.clock_base = Duration::ZERO;
        vec![reply, Output::Close]
    }

    /// Current value of a register, or `None` for undefined addresses.
    fn value(&self, address: u8) -> Option<Payload> {
        let id = &self.identity;
        let now = self.now();
        let value = match address {
            registers::WHO_AM_I => Payload::from_value(id.who_am_i),
            registers::HW_VERSION_H => Payload::from_value(id.hw_version.0),
            registers::HW_VERSION_L => Payload::from_value(id.hw_version.1),
            registers::ASSEMBLY_VERSION => Payload::from_value(id.assembly_version),
            registers::CORE_VERSION_H => Payload::from_value(id.core_version.0),
            registers::CORE_VERSION_L => Payload::from_value(id.core_version.1),
            registers::FW_VERSION_H => Payload::from_value(id.fw_version.0),
            registers::FW_VERSION_L => Payload::from_value(id.fw_version.1),
            registers::TIMESTAMP_SECOND => Payload::from_value(now.seconds),
            registers::TIMESTAMP_MICRO => Payload::from_value(now.ticks),
            registers::OPERATION_CTRL => Payload::from_value(self.operation_ctrl),
            registers::RESET_DEV => Payload::from_value(self.reset_status),
            registers::DEVICE_NAME => Payload::from_slice(&self.device_name),
            registers::SERIAL_NUMBER => Payload::from_value(self.serial_number),
            registers::CLOCK_CONFIG => Payload::from_value(self.clock_config),
            registers::TIMESTAMP_OFFSET => Payload::from_value(self.timestamp_offset),
            other => return self.app.get(&other).map(|r| r.value.clone()),
        };
        Some(value)
    }

    /// Common bank as the firmware lays it out in memory, little-endian.
    fn packed_bank(&self) -> BytesMut {
        let id = &self.identity;
        let now = self.now();
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16_le(id.who_am_i);
        buf.put_slice(&[
            id.hw_version.0,
            id.hw_version.1,
            id.assembly_version,
            id.core_version.0,
            id.core_version.1,
            id.fw_version.0,
            id.fw_version.1,
        ]);
        buf.put_u32_le(now.seconds);
        buf.put_u16_le(now.ticks);
        buf.put_u8(self.operation_ctrl);
        buf.put_u8(self.reset_status);
        buf.put_slice(&self.device_name);
        buf.put_u16_le(self.serial_number);
        buf.put_u8(self.clock_config);
        buf.put_u8(self.timestamp_offset);
        buf
    }

    fn restore_name(&mut self) {
        self.device_name = [0; DEVICE_NAME_LEN];
        let name = self.identity.device_name.as_bytes();
        let len = name.len().min(DEVICE_NAME_LEN - 1);
        self.device_name[..len].copy_from_slice(&name[..len]);
    }

    fn reply(&self, message_type: MessageType, address: u8, value: Payload) -> Output {
        Output::Reply(Frame::new(message_type, address, value).with_timestamp(self.now()))
    }

    fn error(&self, message_type: MessageType, request: &Frame) -> Output {
        debug!(address = request.address, %message_type, "rejecting request");
        let value = self
            .value(request.address)
            .unwrap_or_else(|| Payload::empty(request.payload_type()));
        self.reply(message_type, request.address, value)
    }
}

#[cfg(unix)]
pub use listener::{serve_stream, EmulatorListener};

#[cfg(unix)]
mod listener {
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    use harpio_frame::{FrameError, FrameReader, FrameWriter};
    use harpio_transport::{TransportError, UnixDomainSocket};
    use tracing::{debug, info, warn};

    use super::{Emulator, Output};
    use crate::error::Result;

    /// Serves one [`Emulator`] on a Unix domain socket.
    ///
    /// Connections are handled one at a time; register state carries over
    /// from one connection to the next, as on a real device.
    pub struct EmulatorListener {
        socket: UnixDomainSocket,
        emulator: Emulator,
    }

    impl EmulatorListener {
        pub fn bind(path: impl AsRef<Path>, emulator: Emulator) -> Result<Self> {
            let socket = UnixDomainSocket::bind(path)?;
            Ok(Self { socket, emulator })
        }

        /// Bound socket path.
        pub fn path(&self) -> &Path {
            self.socket.path()
        }

        pub fn emulator(&self) -> &Emulator {
            &self.emulator
        }

        /// Accept one connection and serve it until the host hangs up or the
        /// emulated device reboots.
        pub fn serve_one(&mut self) -> Result<()> {
            let stream = self.socket.accept()?;
            serve_stream(&mut self.emulator, stream)
        }

        /// Serve connections until `running` is cleared or `max_connections`
        /// have been handled. The flag is checked between connections.
        pub fn serve(&mut self, running: &AtomicBool, max_connections: Option<usize>) -> Result<usize> {
            let mut served = 0usize;
            while running.load(Ordering::SeqCst) {
                if max_connections.is_some_and(|max| served >= max) {
                    break;
                }
                self.serve_one()?;
                served += 1;
            }
            info!(served, "emulator stopped");
            Ok(served)
        }
    }

    /// Run `emulator` over one connected stream.
    pub fn serve_stream(emulator: &mut Emulator, stream: UnixStream) -> Result<()> {
        let mut reader = FrameReader::new(stream.try_clone().map_err(TransportError::Io)?);
        let mut writer = FrameWriter::new(stream);

        loop {
            let request = match reader.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => {
                    debug!("host disconnected");
                    return Ok(());
                }
                Err(err) if err.is_checksum() || err.is_format() => {
                    warn!(error = %err, "dropping malformed request");
                    continue;
                }
                Err(FrameError::Io(err)) if harpio_transport::traits::is_disconnect(&err) => {
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            for output in emulator.handle(&request) {
                let written = match &output {
                    Output::Reply(frame) => writer.write_frame(frame),
                    Output::Corrupted(frame) => writer.write_corrupted(frame),
                    Output::Close => {
                        let _ = writer.get_ref().shutdown(Shutdown::Both);
                        return Ok(());
                    }
                };
                match written {
                    Ok(()) => {}
                    Err(FrameError::ConnectionClosed) => return Ok(()),
                    Err(FrameError::Io(err)) if harpio_transport::traits::is_disconnect(&err) => {
                        return Ok(())
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use harpio_frame::{request, PayloadType};

    use super::*;
    use crate::mode::DeviceMode;

    fn single_reply(outputs: Vec<Output>) -> Frame {
        match outputs.as_slice() {
            [Output::Reply(frame)] => frame.clone(),
            other => panic!("expected one reply, got {other:?}"),
        }
    }

    #[test]
    fn identity_registers_read_back() {
        let mut emu = Emulator::default();
        let reply = single_reply(emu.handle(&request::read_u16(registers::WHO_AM_I)));
        assert_eq!(reply.message_type, MessageType::Read);
        assert_eq!(reply.payload.value::<u16>().unwrap(), 1216);
        assert!(reply.timestamp.is_some());

        let name = single_reply(emu.handle(&request::read_u8(registers::DEVICE_NAME)));
        assert_eq!(name.payload.len(), DEVICE_NAME_LEN);
        assert!(name.payload.as_bytes().starts_with(b"harpio emulator\0"));
    }

    #[test]
    fn read_only_register_rejects_writes() {
        let mut emu = Emulator::default();
        let reply = single_reply(emu.handle(&request::write_u16(registers::WHO_AM_I, 1)));
        assert_eq!(reply.message_type, MessageType::WriteError);
        assert_eq!(reply.payload.value::<u16>().unwrap(), 1216);
    }

    #[test]
    fn type_mismatch_and_unknown_address_are_errors() {
        let mut emu = Emulator::default();
        let reply = single_reply(emu.handle(&request::read_u8(registers::WHO_AM_I)));
        assert_eq!(reply.message_type, MessageType::ReadError);

        let reply = single_reply(emu.handle(&request::read_u8(20)));
        assert_eq!(reply.message_type, MessageType::ReadError);
        assert!(reply.payload.is_empty());

        let reply = single_reply(emu.handle(&request::write_u8(99, 1)));
        assert_eq!(reply.message_type, MessageType::WriteError);
    }

    #[test]
    fn operation_ctrl_clears_dump_and_dumps_bank() {
        let mut emu = Emulator::default();
        let reply = single_reply(emu.handle(&request::write_u8(
            registers::OPERATION_CTRL,
            OperationCtrl::DUMP | DeviceMode::Active.bits(),
        )));
        assert_eq!(reply.message_type, MessageType::Write);
        assert_eq!(reply.payload.payload_type(), PayloadType::U8);
        assert_eq!(reply.payload.len(), 46);
        assert_eq!(&reply.payload.as_bytes()[..2], &1216u16.to_le_bytes());

        assert_eq!(emu.operation_ctrl().mode(), DeviceMode::Active);
        assert!(!emu.operation_ctrl().contains(OperationCtrl::DUMP));
    }

    #[test]
    fn mute_suppresses_replies_but_applies_writes() {
        let mut emu = Emulator::default();
        assert!(emu
            .handle(&request::write_u8(registers::OPERATION_CTRL, OperationCtrl::MUTE_RPL))
            .is_empty());
        assert!(emu.handle(&request::read_u8(registers::OPERATION_CTRL)).is_empty());

        let reply = single_reply(emu.handle(&request::write_u8(registers::OPERATION_CTRL, 0)));
        assert_eq!(reply.payload.value::<u8>().unwrap(), 0);
    }

    #[test]
    fn reboot_resets_state_and_closes() {
        let mut emu = Emulator::default();
        emu.handle(&request::write_u8(registers::OPERATION_CTRL, 1));
        let outputs = emu.handle(&request::write_u8(registers::RESET_DEV, ResetFlags::RST_DEF.bits()));
        assert!(matches!(outputs.as_slice(), [Output::Reply(_), Output::Close]));
        assert_eq!(emu.operation_ctrl().mode(), DeviceMode::Standby);

        let outputs = emu.handle(&request::write_u8(registers::RESET_DEV, ResetFlags::SAVE.bits()));
        assert!(matches!(outputs.as_slice(), [Output::Reply(_)]));
    }

    #[test]
    fn device_name_write_pads_and_restores() {
        let mut emu = Emulator::default();
        single_reply(emu.handle(&request::write_array(registers::DEVICE_NAME, b"bench".as_slice())));
        let name = single_reply(emu.handle(&request::read_u8(registers::DEVICE_NAME)));
        assert!(name.payload.as_bytes().starts_with(b"bench\0"));

        emu.handle(&request::write_u8(
            registers::RESET_DEV,
            ResetFlags::NAME_TO_DEFAULT.bits(),
        ));
        let name = single_reply(emu.handle(&request::read_u8(registers::DEVICE_NAME)));
        assert!(name.payload.as_bytes().starts_with(b"harpio emulator"));
    }

    #[test]
    fn timestamp_second_write_rebases_clock() {
        let mut emu = Emulator::default();
        single_reply(emu.handle(&request::write_u32(registers::TIMESTAMP_SECOND, 5000)));
        let reply = single_reply(emu.handle(&request::read_u32(registers::TIMESTAMP_SECOND)));
        let seconds = reply.payload.value::<u32>().unwrap();
        assert!((5000..5002).contains(&seconds));
    }

    #[test]
    fn application_registers() {
        let mut emu = Emulator::default()
            .with_register(32, Payload::from_value(0u16), true)
            .with_register(33, Payload::from_value(1.5f32), false);

        let reply = single_reply(emu.handle(&request::write_u16(32, 700)));
        assert_eq!(reply.payload.value::<u16>().unwrap(), 700);
        let reply = single_reply(emu.handle(&request::write_f32(33, 2.0)));
        assert_eq!(reply.message_type, MessageType::WriteError);
        let reply = single_reply(emu.handle(&request::write_u8(32, 1)));
        assert_eq!(reply.message_type, MessageType::WriteError);
    }

    #[test]
    fn injected_faults() {
        let mut faults = Faults::default();
        faults.silent.insert(registers::CORE_VERSION_L);
        faults.corrupt.insert(registers::FW_VERSION_H);
        let mut emu = Emulator::default().with_faults(faults);

        assert!(emu.handle(&request::read_u8(registers::CORE_VERSION_L)).is_empty());
        assert!(matches!(
            emu.handle(&request::read_u8(registers::FW_VERSION_H)).as_slice(),
            [Output::Corrupted(_)]
        ));
    }
}
