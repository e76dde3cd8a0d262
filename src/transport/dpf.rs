//! AX206 based "DPF" photo frames, driven over the SCSI wrapped block protocol.

use tracing::{debug, error, info, trace, warn};

use super::{
    BulkChannel, Driver, TransportError,
    scsi::{self, Command, Payload},
};
use crate::{
    canvas::{Frame, dirty::DirtyTracker},
    color::Rgba,
    rect::Rect,
};

/// 面板只支持 0-7 级背光
pub const BACKLIGHT_MAX: u8 = 7;

/// Bytes per transmitted pixel (RGB565).
pub const BPP: usize = 2;

pub fn encode_rgb565(pixels: &[Rgba]) -> Vec<u8> {
    pixels.iter().flat_map(Rgba::rgb565).collect()
}

fn clamp_backlight(level: i32) -> u8 {
    if !(0..=i32::from(BACKLIGHT_MAX)).contains(&level) {
        warn!(level, "dpf: backlight setting out of range 0-{BACKLIGHT_MAX}");
    }
    level.clamp(0, i32::from(BACKLIGHT_MAX)) as u8
}

#[derive(Debug)]
pub struct Dpf<C: BulkChannel> {
    device: String,
    chan: C,
    width: usize,
    height: usize,
    backlight: u8,
    dirty: DirtyTracker,
    closed: bool,
}

impl<C: BulkChannel> Dpf<C> {
    /// 读取面板尺寸, 关背光, 刷黑, 再打开配置的背光
    pub fn open(device: impl Into<String>, mut chan: C, backlight: i32) -> Result<Self, TransportError> {
        let device = device.into();
        let (width, height) = Self::query_dimensions(&mut chan)?;
        info!(%device, width, height, "dpf: got LCD dimensions");

        let mut dpf = Self {
            device,
            chan,
            width,
            height,
            backlight: 0,
            dirty: DirtyTracker::new(width, height),
            closed: false,
        };

        if let Err(e) = dpf.write_backlight(0) {
            warn!(error = %e, "dpf: failed to switch backlight off during open");
        }
        if let Err(e) = dpf.fill(Rgba::BLACK) {
            warn!(error = %e, "dpf: failed to clear panel during open");
        }
        dpf.set_backlight(backlight)?;
        Ok(dpf)
    }

    fn query_dimensions(chan: &mut C) -> Result<(usize, usize), TransportError> {
        let mut buf = [0u8; 5];
        scsi::exchange(chan, &Command::lcd_parameters(), Payload::In(&mut buf)).map_err(|e| {
            error!(error = %e, "dpf: error reading LCD dimensions");
            TransportError::Dimensions
        })?;
        let width = usize::from(u16::from_le_bytes([buf[0], buf[1]]));
        let height = usize::from(u16::from_le_bytes([buf[2], buf[3]]));
        if width == 0 || height == 0 {
            return Err(TransportError::Dimensions);
        }
        Ok((width, height))
    }

    pub fn channel(&self) -> &C {
        &self.chan
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.chan
    }

    fn write_backlight(&mut self, level: u8) -> Result<(), TransportError> {
        scsi::exchange(&mut self.chan, &Command::backlight(level), Payload::None)?;
        self.backlight = level;
        Ok(())
    }

    fn check_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(TransportError::FrameSize {
                expected: (self.width, self.height),
                actual: (frame.width(), frame.height()),
            });
        }
        Ok(())
    }

    fn send_rect(&mut self, pixels: &[Rgba], rect: Rect) -> Result<(), TransportError> {
        if pixels.is_empty() {
            return Ok(());
        }
        trace!(?rect, bytes = pixels.len() * BPP, "dpf: blit");
        let data = encode_rgb565(pixels);
        scsi::exchange(&mut self.chan, &Command::blit(rect), Payload::Out(&data))?;
        Ok(())
    }

    fn fill(&mut self, color: Rgba) -> Result<(), TransportError> {
        let pixels = vec![color; self.width * self.height];
        let rect = Rect::from_size(0, 0, self.width as i32, self.height as i32);
        let sent = self.send_rect(&pixels, rect);
        match &sent {
            Ok(()) => self.dirty.assume_filled(color),
            Err(_) => self.dirty.reset(),
        }
        sent
    }

    /// 传输失败时影子帧已不可信, 下一轮全部重发
    fn abandon(&mut self, e: TransportError) -> TransportError {
        self.dirty.reset();
        e
    }
}

impl<C: BulkChannel> Driver for Dpf<C> {
    fn name(&self) -> &'static str {
        "DPF"
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn backlight(&self) -> u8 {
        self.backlight
    }

    fn set_backlight(&mut self, level: i32) -> Result<(), TransportError> {
        let level = clamp_backlight(level);
        debug!(level, "dpf: backlight");
        self.write_backlight(level)
    }

    fn blit(&mut self, frame: &Frame, x: i32, y: i32, width: i32, height: i32) -> Result<(), TransportError> {
        self.check_frame(frame)?;
        let rect = self.dirty.diff_region(frame, Rect::from_size(x, y, width, height));
        if rect.is_empty() {
            return Ok(());
        }
        self.send_rect(&frame.region(rect), rect).map_err(|e| self.abandon(e))
    }

    fn blit_fullscreen(&mut self, frame: &Frame) -> Result<usize, TransportError> {
        self.check_frame(frame)?;
        let rects = self.dirty.diff_full(frame);
        for &rect in &rects {
            self.send_rect(&frame.region(rect), rect).map_err(|e| self.abandon(e))?;
        }
        Ok(rects.len())
    }

    fn clear(&mut self, color: Rgba) -> Result<(), TransportError> {
        self.fill(color)
    }

    fn shutdown(&mut self, goodbye_shown: bool) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !goodbye_shown {
            if let Err(e) = self.write_backlight(0) {
                warn!(error = %e, "dpf: failed to switch backlight off");
            }
            if let Err(e) = self.fill(Rgba::BLACK) {
                warn!(error = %e, "dpf: failed to clear panel");
            }
        }
        info!(device = %self.device, "dpf: driver exiting");
    }
}

impl<C: BulkChannel> Drop for Dpf<C> {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}
