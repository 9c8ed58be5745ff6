// 该文件是 Xingren （行人计数） 项目的一部分。
// src/lib.rs - 库主文件
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

//! # Xingren 行人计数
//!
//! 摄像头帧经过 采集 -> 推理/跟踪/标注/编码 -> 网络推流 三段流水线：
//!
//! ```text
//! FrameSource -> [capture queue, 5] -> inference worker -> [output queue, 1, drop-oldest] -> /stream
//! ```
//!
//! 跟踪器根据质心在检测线两侧的移动产生进入/离开事件。

pub mod config;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
#[cfg(feature = "report")]
pub mod report;
pub mod server;
pub mod stream;
pub mod task;
pub mod tracker;
pub mod watchdog;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 解析 URL 查询参数，缺失时返回 `None`，格式错误时返回原始字符串
pub(crate) fn query_param<T: std::str::FromStr>(
  url: &url::Url,
  key: &str,
) -> Result<Option<T>, String> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v.parse::<T>().map(Some).map_err(|_| v.into_owned()),
    None => Ok(None),
  }
}
