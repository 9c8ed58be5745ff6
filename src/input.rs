// 该文件是 Xingren （行人计数） 项目的一部分。
// src/input.rs - 摄像头/图像帧来源
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

use std::time::Duration;

use thiserror::Error;

use crate::{
  FromUrl,
  frame::{PixelFormat, RawFrame},
};

/// 等待缓冲池归还缓冲区的最长时间，超时即视为本次采集失败
pub const BUFFER_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
/// 默认帧缓冲数量，对应有 PSRAM 时的 fb_count
pub const DEFAULT_BUFFER_COUNT: usize = 2;
pub const DEFAULT_WIDTH: u32 = 160;
pub const DEFAULT_HEIGHT: u32 = 120;

/// 帧来源。每次 `acquire` 借出一个池化缓冲区，`RawFrame` 析构时归还。
///
/// * `Ok(Some(frame))`：采集成功
/// * `Ok(None)`：来源已结束，不会再产生帧
/// * `Err(_)`：本次暂时不可用，调用者稍后重试
pub trait FrameSource: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn acquire(&mut self) -> Result<Option<RawFrame>, Self::Error>;

  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn format(&self) -> PixelFormat;
}

#[cfg(feature = "read_image_file")]
mod still_image;
#[cfg(feature = "read_image_file")]
pub use self::still_image::{StillImageSource, StillImageSourceError};

#[cfg(feature = "v4l2_input")]
mod v4l2_source;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_source::{V4l2Source, V4l2SourceError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  StillImageSourceError(#[from] StillImageSourceError),
  #[cfg(feature = "v4l2_input")]
  #[error("V4L2 输入错误: {0}")]
  V4l2SourceError(#[from] V4l2SourceError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  StillImage(StillImageSource),
  #[cfg(feature = "v4l2_input")]
  V4l2(V4l2Source),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == StillImageSource::SCHEME {
        return Ok(InputWrapper::StillImage(StillImageSource::from_url(url)?));
      }
    }
    #[cfg(feature = "v4l2_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4l2Source::SCHEME {
        return Ok(InputWrapper::V4l2(V4l2Source::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn acquire(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(source) => Ok(source.acquire()?),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => Ok(source.acquire()?),
    }
  }

  fn width(&self) -> u32 {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(source) => source.width(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => source.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(source) => source.height(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => source.height(),
    }
  }

  fn format(&self) -> PixelFormat {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(source) => source.format(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => source.format(),
    }
  }
}
