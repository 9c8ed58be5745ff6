// 该文件是 Xingren （行人计数） 项目的一部分。
// src/frame.rs - 原始帧与编码帧定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{fmt, str::FromStr, time::Duration};

use crossbeam_channel::{Receiver, Sender, bounded};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
  #[error("未知像素格式: {0}")]
  UnknownPixelFormat(String),
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
}

/// 像素格式，采集端配置后不再变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  /// 每像素 2 字节，高字节在前
  Rgb565,
  Rgb888,
  Grayscale,
}

impl PixelFormat {
  pub fn bytes_per_pixel(self) -> usize {
    match self {
      PixelFormat::Rgb565 => 2,
      PixelFormat::Rgb888 => 3,
      PixelFormat::Grayscale => 1,
    }
  }

  pub fn frame_len(self, width: u32, height: u32) -> usize {
    self.bytes_per_pixel() * width as usize * height as usize
  }

  /// 把 RGB 颜色编码为该格式的一个像素
  pub fn pack(self, [r, g, b]: [u8; 3]) -> PackedPixel {
    match self {
      PixelFormat::Rgb565 => {
        let value = (u16::from(r & 0xF8) << 8) | (u16::from(g & 0xFC) << 3) | u16::from(b >> 3);
        let [hi, lo] = value.to_be_bytes();
        PackedPixel {
          bytes: [hi, lo, 0],
          len: 2,
        }
      }
      PixelFormat::Rgb888 => PackedPixel {
        bytes: [r, g, b],
        len: 3,
      },
      PixelFormat::Grayscale => PackedPixel {
        bytes: [luma([r, g, b]), 0, 0],
        len: 1,
      },
    }
  }
}

/// 单个已编码像素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedPixel {
  bytes: [u8; 3],
  len: usize,
}

impl PackedPixel {
  pub fn as_slice(&self) -> &[u8] {
    &self.bytes[..self.len]
  }
}

/// BT.601 亮度
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
  ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
}

/// RGB888 像素流转换为目标格式
pub fn convert_rgb888(rgb: &[u8], format: PixelFormat) -> Vec<u8> {
  if format == PixelFormat::Rgb888 {
    return rgb.to_vec();
  }
  let mut out = Vec::with_capacity(rgb.len() / 3 * format.bytes_per_pixel());
  for px in rgb.chunks_exact(3) {
    out.extend_from_slice(format.pack([px[0], px[1], px[2]]).as_slice());
  }
  out
}

/// RGB565（高字节在前）展开为 RGB888
pub fn rgb565_to_rgb888(data: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(data.len() / 2 * 3);
  for px in data.chunks_exact(2) {
    let value = u16::from_be_bytes([px[0], px[1]]);
    let r = ((value >> 11) & 0x1F) as u8;
    let g = ((value >> 5) & 0x3F) as u8;
    let b = (value & 0x1F) as u8;
    out.extend_from_slice(&[(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]);
  }
  out
}

impl FromStr for PixelFormat {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb565" => Ok(PixelFormat::Rgb565),
      "rgb888" | "rgb" => Ok(PixelFormat::Rgb888),
      "gray" | "grayscale" => Ok(PixelFormat::Grayscale),
      other => Err(FrameError::UnknownPixelFormat(other.to_string())),
    }
  }
}

impl fmt::Display for PixelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PixelFormat::Rgb565 => "rgb565",
      PixelFormat::Rgb888 => "rgb888",
      PixelFormat::Grayscale => "grayscale",
    };
    f.write_str(name)
  }
}

/// 固定数量的帧缓冲池，相当于摄像头驱动的 fb_count。
///
/// 缓冲区只能通过 [`RawFrame`] 借出，`RawFrame` 析构时自动归还。
pub struct FramePool {
  free_tx: Sender<Box<[u8]>>,
  free_rx: Receiver<Box<[u8]>>,
  capacity: usize,
  width: u32,
  height: u32,
  format: PixelFormat,
  next_index: u64,
}

impl FramePool {
  pub fn new(capacity: usize, width: u32, height: u32, format: PixelFormat) -> Self {
    let capacity = capacity.max(1);
    let (free_tx, free_rx) = bounded(capacity);
    let len = format.frame_len(width, height);
    for _ in 0..capacity {
      // 容量与缓冲区数量一致，不会失败
      let _ = free_tx.try_send(vec![0u8; len].into_boxed_slice());
    }

    Self {
      free_tx,
      free_rx,
      capacity,
      width,
      height,
      format,
      next_index: 0,
    }
  }

  /// 借出一个空闲缓冲区；所有缓冲区都在流水线中时等待至多 `timeout`
  pub fn acquire(&mut self, timeout: Duration) -> Option<RawFrame> {
    let data = self.free_rx.recv_timeout(timeout).ok()?;
    let index = self.next_index;
    self.next_index = self.next_index.wrapping_add(1);

    Some(RawFrame {
      data: Some(data),
      width: self.width,
      height: self.height,
      format: self.format,
      index,
      recycle: self.free_tx.clone(),
    })
  }

  pub fn available(&self) -> usize {
    self.free_rx.len()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }
}

/// 原始帧句柄。
///
/// 不可复制；同一时刻只有一个所有者。析构（或 [`RawFrame::release`]）
/// 把缓冲区归还给来源的 [`FramePool`]，且只发生一次。
pub struct RawFrame {
  data: Option<Box<[u8]>>,
  width: u32,
  height: u32,
  format: PixelFormat,
  index: u64,
  recycle: Sender<Box<[u8]>>,
}

impl RawFrame {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  /// 采集序号，由缓冲池分配
  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn pixels(&self) -> &[u8] {
    self.data.as_deref().unwrap_or(&[])
  }

  pub fn pixels_mut(&mut self) -> &mut [u8] {
    self.data.as_deref_mut().unwrap_or(&mut [])
  }

  /// 用完整一帧像素覆盖缓冲区
  pub fn fill_from(&mut self, pixels: &[u8]) -> Result<(), FrameError> {
    let target = self.pixels_mut();
    if target.len() != pixels.len() {
      return Err(FrameError::SizeMismatch {
        expected: target.len(),
        actual: pixels.len(),
      });
    }
    target.copy_from_slice(pixels);
    Ok(())
  }

  /// 显式归还缓冲区
  pub fn release(self) {}
}

impl Drop for RawFrame {
  fn drop(&mut self) {
    if let Some(data) = self.data.take() {
      // 缓冲池已销毁时直接释放内存
      let _ = self.recycle.try_send(data);
    }
  }
}

impl fmt::Debug for RawFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RawFrame")
      .field("index", &self.index)
      .field("width", &self.width)
      .field("height", &self.height)
      .field("format", &self.format)
      .finish()
  }
}

/// 编码后的 JPEG 帧。所有权依次经过 推理线程 -> 输出队列 -> 推流连接，析构即释放。
pub struct EncodedFrame {
  data: Vec<u8>,
  index: u64,
}

impl EncodedFrame {
  pub fn new(data: Vec<u8>, index: u64) -> Self {
    Self { data, index }
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 对应的原始帧序号
  pub fn index(&self) -> u64 {
    self.index
  }
}

impl fmt::Debug for EncodedFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EncodedFrame")
      .field("index", &self.index)
      .field("len", &self.data.len())
      .finish()
  }
}
