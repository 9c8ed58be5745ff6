// 该文件是 Xingren （行人计数） 项目的一部分。
// src/output/draw.rs - 检测线与行人标记绘制
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

use crate::{
  frame::{PixelFormat, RawFrame},
  tracker::Centroid,
};

pub const LINE_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
pub const MARKER_COLOR: [u8; 3] = [255, 0, 0]; // 红色
pub const DEFAULT_MARKER_RADIUS: i32 = 3;

/// 在原始帧上原地绘制检测线和行人质心标记。
///
/// 标记为实心圆，偏移表在构造时计算一次。超出画面的像素直接裁掉。
#[derive(Debug, Clone)]
pub struct Annotator {
  line_y: i32,
  line_color: [u8; 3],
  marker_color: [u8; 3],
  offsets: Vec<(i32, i32)>,
}

impl Annotator {
  pub fn new(line_y: i32, marker_radius: i32) -> Self {
    let r = marker_radius.max(0);
    let mut offsets = Vec::new();
    for dy in -r..=r {
      for dx in -r..=r {
        if dx * dx + dy * dy <= r * r {
          offsets.push((dx, dy));
        }
      }
    }

    Self {
      line_y,
      line_color: LINE_COLOR,
      marker_color: MARKER_COLOR,
      offsets,
    }
  }

  pub fn line_y(&self) -> i32 {
    self.line_y
  }

  /// 标记覆盖的像素数
  pub fn marker_area(&self) -> usize {
    self.offsets.len()
  }

  pub fn annotate<I>(&self, frame: &mut RawFrame, centroids: I)
  where
    I: IntoIterator<Item = Centroid>,
  {
    let (width, height, format) = (frame.width(), frame.height(), frame.format());
    let mut canvas = Canvas {
      pixels: frame.pixels_mut(),
      width: width as i32,
      height: height as i32,
      format,
    };

    let line = format.pack(self.line_color);
    for x in 0..canvas.width {
      canvas.put(x, self.line_y, line.as_slice());
    }

    let marker = format.pack(self.marker_color);
    for c in centroids {
      for (dx, dy) in &self.offsets {
        canvas.put(c.x + dx, c.y + dy, marker.as_slice());
      }
    }
  }
}

impl Default for Annotator {
  fn default() -> Self {
    Self::new(crate::config::DEFAULT_LINE_Y, DEFAULT_MARKER_RADIUS)
  }
}

struct Canvas<'a> {
  pixels: &'a mut [u8],
  width: i32,
  height: i32,
  format: PixelFormat,
}

impl Canvas<'_> {
  fn put(&mut self, x: i32, y: i32, pixel: &[u8]) {
    if x < 0 || y < 0 || x >= self.width || y >= self.height {
      return;
    }
    let bpp = self.format.bytes_per_pixel();
    let offset = (y as usize * self.width as usize + x as usize) * bpp;
    if let Some(target) = self.pixels.get_mut(offset..offset + bpp) {
      target.copy_from_slice(pixel);
    }
  }
}
