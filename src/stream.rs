// 该文件是 Xingren （行人计数） 项目的一部分。
// src/stream.rs - MJPEG multipart 推流
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

//! `multipart/x-mixed-replace` 帧格式，外层使用 HTTP/1.1 分块传输：
//!
//! ```text
//! \r\n--<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n 字节 JPEG>
//! ```

use std::{
  io::{self, Write},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info};

use crate::{
  frame::EncodedFrame,
  task::{queue::OutputReceiver, worker::POLL_INTERVAL},
};

pub const BOUNDARY: &str = "123456789000000000000987654321";
pub const STREAM_CONTENT_TYPE: &str =
  "multipart/x-mixed-replace;boundary=123456789000000000000987654321";
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// HTTP/1.1 分块编码写入器
pub struct ChunkedWriter<W: Write> {
  inner: W,
  finished: bool,
}

impl<W: Write> ChunkedWriter<W> {
  pub fn new(inner: W) -> Self {
    Self {
      inner,
      finished: false,
    }
  }

  /// 空数据会被跳过，零长度块只在 [`ChunkedWriter::finish`] 中写出
  pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
    if data.is_empty() {
      return Ok(());
    }
    write!(self.inner, "{:X}\r\n", data.len())?;
    self.inner.write_all(data)?;
    self.inner.write_all(b"\r\n")
  }

  pub fn flush(&mut self) -> io::Result<()> {
    self.inner.flush()
  }

  pub fn finish(&mut self) -> io::Result<()> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;
    self.inner.write_all(b"0\r\n\r\n")?;
    self.inner.flush()
  }

  pub fn into_inner(self) -> W {
    self.inner
  }
}

/// 逐帧写出 multipart 分段
pub struct MultipartWriter<W: Write> {
  chunked: ChunkedWriter<W>,
}

impl<W: Write> MultipartWriter<W> {
  pub fn new(inner: W) -> Self {
    Self {
      chunked: ChunkedWriter::new(inner),
    }
  }

  /// 负载按原样写出
  pub fn write_part(&mut self, payload: &[u8]) -> io::Result<()> {
    self
      .chunked
      .write_chunk(format!("\r\n--{}\r\n", BOUNDARY).as_bytes())?;
    self.chunked.write_chunk(
      format!(
        "Content-Type: {}\r\nContent-Length: {}\r\n\r\n",
        PART_CONTENT_TYPE,
        payload.len()
      )
      .as_bytes(),
    )?;
    self.chunked.write_chunk(payload)?;
    self.chunked.flush()
  }

  pub fn finish(&mut self) -> io::Result<()> {
    self.chunked.finish()
  }

  pub fn into_inner(self) -> W {
    self.chunked.into_inner()
  }
}

#[derive(Debug)]
pub enum SinkExit {
  /// 写失败，通常是客户端断开
  ClientGone(io::Error),
  /// 流水线已结束
  QueueClosed,
  Shutdown,
}

/// 推流端：从输出队列取帧写给一个客户端，每帧写完（无论成败）立即释放
pub struct StreamingSink {
  frames: OutputReceiver<EncodedFrame>,
  running: Arc<AtomicBool>,
}

impl StreamingSink {
  pub fn new(frames: OutputReceiver<EncodedFrame>, running: Arc<AtomicBool>) -> Self {
    Self { frames, running }
  }

  /// 持续推流，返回退出原因和已发送帧数
  pub fn run<W: Write>(&self, writer: W) -> (SinkExit, u64) {
    let mut out = MultipartWriter::new(writer);
    let mut sent = 0u64;

    loop {
      if !self.running.load(Ordering::Relaxed) {
        let _ = out.finish();
        return (SinkExit::Shutdown, sent);
      }

      match self.frames.recv_timeout(POLL_INTERVAL) {
        Ok(frame) => {
          let written = out.write_part(frame.as_bytes());
          let index = frame.index();
          drop(frame);
          if let Err(e) = written {
            info!("推流客户端断开: {}", e);
            return (SinkExit::ClientGone(e), sent);
          }
          debug!("发送帧 {}", index);
          sent += 1;
        }
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => {
          let _ = out.finish();
          return (SinkExit::QueueClosed, sent);
        }
      }
    }
  }
}
