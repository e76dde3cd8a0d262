//! Device transport: everything that talks to the panel.
//!
//! [`Driver`] is the command surface the rest of the daemon sees. The only
//! implementation is [`dpf::Dpf`], which speaks the AX206 block protocol
//! through any [`BulkChannel`]; [`usb::UsbLink`] is the real one.

pub mod dpf;
pub mod scsi;
pub mod usb;

use std::time::Duration;

use thiserror::Error;

use crate::{canvas::Frame, color::Rgba};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid device '{0}', please specify a string like 'usb0'")]
    InvalidDevice(String),
    #[error("no matching USB device {0} found")]
    DeviceNotFound(String),
    #[error("failed to open usb device {device}: {source}")]
    Open { device: String, source: rusb::Error },
    #[error("failed to claim usb device {device}: {source}")]
    Claim { device: String, source: rusb::Error },
    #[error("error reading LCD dimensions")]
    Dimensions,
    #[error("bulk write: {actual} != {expected}")]
    ShortWrite { expected: usize, actual: usize },
    #[error("bulk read: {actual} != {expected}")]
    ShortRead { expected: usize, actual: usize },
    #[error("got invalid reply {0:?}")]
    BadSignature([u8; 4]),
    #[error("no ACK after {0} attempts")]
    AckTimeout(usize),
    #[error("frame is {actual:?}, panel is {expected:?}")]
    FrameSize {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error(transparent)]
    Usb(#[from] rusb::Error),
}

impl TransportError {
    /// 打开设备阶段的错误是致命的, 其余的只丢弃当前这次传输
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidDevice(_)
                | Self::DeviceNotFound(_)
                | Self::Open { .. }
                | Self::Claim { .. }
                | Self::Dimensions
        )
    }
}

/// USB bulk 端点的读写, 与 [`rusb::DeviceHandle`] 的同名方法一致
pub trait BulkChannel: Send {
    fn write_bulk(&mut self, endpoint: u8, buf: &[u8], timeout: Duration) -> Result<usize, rusb::Error>;
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, rusb::Error>;
}

/// Command surface of a physical panel.
pub trait Driver: Send {
    fn name(&self) -> &'static str;

    fn device(&self) -> &str;

    /// 设备报告的物理尺寸, 优先于任何配置值
    fn size(&self) -> (usize, usize);

    fn backlight(&self) -> u8;

    /// Out-of-range levels are clamped, not rejected.
    fn set_backlight(&mut self, level: i32) -> Result<(), TransportError>;

    /// Sends the changed pixels inside `x, y, width, height` of `frame`.
    fn blit(&mut self, frame: &Frame, x: i32, y: i32, width: i32, height: i32) -> Result<(), TransportError>;

    /// 整帧比较并发送所有脏矩形, 返回发出的命令数
    fn blit_fullscreen(&mut self, frame: &Frame) -> Result<usize, TransportError>;

    /// 整屏填充为 `color`, 不经过脏矩形比较
    fn clear(&mut self, color: Rgba) -> Result<(), TransportError>;

    /// 关闭前的收尾. `goodbye_shown` 为真时保留面板上的告别页
    fn shutdown(&mut self, goodbye_shown: bool);
}
