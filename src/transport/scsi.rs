//! SCSI-style command wrapping used by AX206 frames.
//!
//! Every exchange is:
//! - a 31 byte command block wrapper (`USBC`, tag, payload length, flags, LUN,
//!   command length, 16 byte command) written to the OUT endpoint
//! - an optional payload, written to OUT or read from IN
//! - a 13 byte status block read from IN, starting with `USBS`
//!
//! Multi-byte fields are little-endian.

use std::time::Duration;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::warn;

use super::{BulkChannel, TransportError};
use crate::rect::Rect;

pub const ENDPOINT_OUT: u8 = 0x01;
pub const ENDPOINT_IN: u8 = 0x81;

pub const CBW_SIGNATURE: [u8; 4] = *b"USBC";
pub const CSW_SIGNATURE: [u8; 4] = *b"USBS";
const CBW_TAG: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

pub const COMMAND_LEN: usize = 16;
pub const WRAPPER_LEN: usize = 15 + COMMAND_LEN;
pub const STATUS_LEN: usize = 13;
pub const ACK_ATTEMPTS: usize = 5;

const HEADER_TIMEOUT: Duration = Duration::from_millis(1000);
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
const READ_TIMEOUT: Duration = Duration::from_millis(4000);
const ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// 厂商扩展命令 (`0xcd`) 的子命令, 位于命令第 5 字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SubCommand {
    LcdParameters = 0x02,
    Extended = 0x06,
}

/// 扩展命令的操作码, 位于命令第 6 字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
    SetProperty = 0x01,
    Blit = 0x12,
}

/// Property ids for [`Opcode::SetProperty`].
const PROPERTY_BACKLIGHT: u16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command([u8; COMMAND_LEN]);

impl Command {
    fn new(sub: SubCommand) -> Self {
        let mut cmd = [0u8; COMMAND_LEN];
        cmd[0] = 0xcd;
        cmd[5] = sub.into();
        Self(cmd)
    }

    fn with_args(args: &[u8]) -> Self {
        let mut cmd = Self::new(SubCommand::Extended);
        cmd.0[6..6 + args.len()].copy_from_slice(args);
        cmd
    }

    pub fn lcd_parameters() -> Self {
        Self::new(SubCommand::LcdParameters)
    }

    /// 原点 `min`, 远角 `max` (包含), 各 16 位
    pub fn blit(rect: Rect) -> Self {
        let [x0, x1] = (rect.min.x as u16).to_le_bytes();
        let [y0, y1] = (rect.min.y as u16).to_le_bytes();
        let [u0, u1] = (rect.max.x as u16).to_le_bytes();
        let [v0, v1] = (rect.max.y as u16).to_le_bytes();
        Self::with_args(&[Opcode::Blit.into(), x0, x1, y0, y1, u0, u1, v0, v1, 0x00])
    }

    pub fn backlight(level: u8) -> Self {
        let [p0, p1] = PROPERTY_BACKLIGHT.to_le_bytes();
        let [v0, v1] = u16::from(level).to_le_bytes();
        Self::with_args(&[Opcode::SetProperty.into(), p0, p1, v0, v1])
    }

    pub fn bytes(&self) -> &[u8; COMMAND_LEN] {
        &self.0
    }

    pub fn sub_command(&self) -> Option<SubCommand> {
        SubCommand::try_from(self.0[5]).ok()
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self.sub_command() {
            Some(SubCommand::Extended) => Opcode::try_from(self.0[6]).ok(),
            _ => None,
        }
    }
}

pub fn wrap(cmd: &Command, data_len: usize) -> [u8; WRAPPER_LEN] {
    let mut buf = [0u8; WRAPPER_LEN];
    buf[0..4].copy_from_slice(&CBW_SIGNATURE);
    buf[4..8].copy_from_slice(&CBW_TAG);
    buf[8..12].copy_from_slice(&(data_len as u32).to_le_bytes());
    // flags 和 LUN 恒为 0
    buf[14] = COMMAND_LEN as u8;
    buf[15..].copy_from_slice(cmd.bytes());
    buf
}

/// Parses a wrapper written by [`wrap`]: returns the command and payload length.
pub fn unwrap(buf: &[u8]) -> Option<(Command, usize)> {
    if buf.len() != WRAPPER_LEN || buf[0..4] != CBW_SIGNATURE {
        return None;
    }
    let len = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
    let mut cmd = [0u8; COMMAND_LEN];
    cmd.copy_from_slice(&buf[15..]);
    Some((Command(cmd), len))
}

#[derive(Debug)]
pub enum Payload<'a> {
    None,
    Out(&'a [u8]),
    In(&'a mut [u8]),
}

impl Payload<'_> {
    fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Out(data) => data.len(),
            Self::In(data) => data.len(),
        }
    }
}

fn write_all<C: BulkChannel>(chan: &mut C, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
    let actual = chan.write_bulk(ENDPOINT_OUT, data, timeout)?;
    if actual != data.len() {
        return Err(TransportError::ShortWrite {
            expected: data.len(),
            actual,
        });
    }
    Ok(())
}

/// 读取状态块, 短读时最多尝试 [`ACK_ATTEMPTS`] 次
fn read_status<C: BulkChannel>(chan: &mut C) -> Result<[u8; STATUS_LEN], TransportError> {
    let mut status = [0u8; STATUS_LEN];
    for attempt in 1..=ACK_ATTEMPTS {
        match chan.read_bulk(ENDPOINT_IN, &mut status, ACK_TIMEOUT) {
            Ok(n) if n == STATUS_LEN => return Ok(status),
            Ok(n) => warn!(attempt, read = n, "dpf: short ACK read"),
            Err(e) => warn!(attempt, error = %e, "dpf: bulk ACK read"),
        }
    }
    Err(TransportError::AckTimeout(ACK_ATTEMPTS))
}

/// One full request/acknowledge exchange. Returns the status byte of the ACK.
pub fn exchange<C: BulkChannel>(chan: &mut C, cmd: &Command, payload: Payload<'_>) -> Result<u8, TransportError> {
    write_all(chan, &wrap(cmd, payload.len()), HEADER_TIMEOUT)?;

    match payload {
        Payload::None => {}
        Payload::Out(data) => write_all(chan, data, WRITE_TIMEOUT)?,
        Payload::In(data) => {
            let actual = chan.read_bulk(ENDPOINT_IN, data, READ_TIMEOUT)?;
            if actual != data.len() {
                return Err(TransportError::ShortRead {
                    expected: data.len(),
                    actual,
                });
            }
        }
    }

    let status = read_status(chan)?;
    let mut signature = [0u8; 4];
    signature.copy_from_slice(&status[0..4]);
    if signature != CSW_SIGNATURE {
        return Err(TransportError::BadSignature(signature));
    }
    Ok(status[12])
}
