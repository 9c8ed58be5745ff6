// 该文件是 Xingren （行人计数） 项目的一部分。
// tests/pipeline.rs - 流水线端到端测试
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;

use xingren::{
  config::PipelineConfig,
  frame::{FramePool, PixelFormat, RawFrame},
  input::FrameSource,
  model::{Detection, ReplayDetector},
  task::{PipelineTask, Task},
};

#[derive(Error, Debug)]
#[error("没有空闲缓冲")]
struct Starved;

/// 缓冲池只有两个缓冲区；若流水线不归还，采集会失败并计数
struct CountedSource {
  pool: FramePool,
  remaining: usize,
  starved: Arc<AtomicUsize>,
}

impl FrameSource for CountedSource {
  type Error = Starved;

  fn acquire(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    if self.remaining == 0 {
      return Ok(None);
    }
    match self.pool.acquire(Duration::from_secs(2)) {
      Some(frame) => {
        self.remaining -= 1;
        Ok(Some(frame))
      }
      None => {
        self.starved.fetch_add(1, Ordering::SeqCst);
        Err(Starved)
      }
    }
  }

  fn width(&self) -> u32 {
    self.pool.width()
  }

  fn height(&self) -> u32 {
    self.pool.height()
  }

  fn format(&self) -> PixelFormat {
    self.pool.format()
  }
}

fn at(x: i32, y: i32) -> Detection {
  Detection {
    score: 0.9,
    bbox: [x - 5, y - 10, x + 5, y + 10],
  }
}

#[test]
fn every_captured_frame_is_processed_in_order() {
  let starved = Arc::new(AtomicUsize::new(0));
  let source = CountedSource {
    pool: FramePool::new(2, 160, 120, PixelFormat::Rgb565),
    remaining: 12,
    starved: starved.clone(),
  };
  // 一人向下穿过检测线，随后向上走回
  let detector = ReplayDetector::new(vec![
    vec![at(80, 40)],
    vec![at(80, 52)],
    vec![at(80, 64)],
    vec![at(80, 76)],
    vec![at(80, 66)],
    vec![at(80, 56)],
  ])
  .looping(false);

  let pipeline = PipelineTask::new(PipelineConfig::default())
    .run_task(source, detector)
    .unwrap();
  let frames = pipeline.frames();

  let mut received = Vec::new();
  loop {
    match frames.recv_timeout(Duration::from_secs(10)) {
      Ok(frame) => {
        assert_eq!(&frame.as_bytes()[..2], &[0xFF, 0xD8]);
        received.push(frame.index());
      }
      Err(RecvTimeoutError::Disconnected) => break,
      Err(RecvTimeoutError::Timeout) => panic!("流水线没有结束"),
    }
  }

  let stats = pipeline.join();
  assert_eq!(starved.load(Ordering::SeqCst), 0);
  assert_eq!(stats.captured(), 12);
  assert_eq!(stats.processed(), 12);
  assert_eq!(stats.encoded(), 12);
  assert_eq!(stats.entered(), 1);
  assert_eq!(stats.exited(), 1);

  // 输出端可以丢帧，但顺序不变，且最后一帧一定送达
  assert!(!received.is_empty());
  assert!(received.windows(2).all(|w| w[0] < w[1]));
  assert_eq!(received.last(), Some(&11));
  assert_eq!(
    received.len() as u64 + stats.evicted(),
    stats.encoded()
  );
}

#[test]
fn shutdown_stops_an_endless_source() {
  let source = CountedSource {
    pool: FramePool::new(2, 32, 24, PixelFormat::Grayscale),
    remaining: usize::MAX,
    starved: Arc::new(AtomicUsize::new(0)),
  };
  let pipeline = PipelineTask::new(PipelineConfig::default())
    .run_task(source, ReplayDetector::new(Vec::new()))
    .unwrap();

  let frames = pipeline.frames();
  assert!(frames.recv_timeout(Duration::from_secs(10)).is_ok());
  pipeline.shutdown();
  let stats = pipeline.join();
  assert!(stats.processed() >= 1);
}
