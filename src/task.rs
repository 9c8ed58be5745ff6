// 该文件是 Xingren （行人计数） 项目的一部分。
// src/task.rs - 流水线任务调度
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
  fmt,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use crossbeam_channel::{Sender, bounded};
use tracing::{error, info, warn};

use crate::{
  config::PipelineConfig,
  frame::EncodedFrame,
  input::FrameSource,
  model::{Detector, filter_by_score},
  output::JpegEncoder,
  tracker::{TrackEvent, Tracker, TrackerConfig},
  watchdog::{Heartbeat, NoHeartbeat},
};

pub mod queue;
pub mod worker;

use self::queue::{OutputReceiver, output_queue};
use self::worker::{InferenceWorker, run_capture};

pub trait Task<S, D>: Sized {
  type Output;
  type Error;
  fn run_task(self, source: S, detector: D) -> Result<Self::Output, Self::Error>;
}

/// 流水线计数器，各线程并发累加
#[derive(Debug, Default)]
pub struct PipelineStats {
  captured: AtomicU64,
  processed: AtomicU64,
  detector_failures: AtomicU64,
  encoded: AtomicU64,
  encode_failures: AtomicU64,
  evicted: AtomicU64,
  entered: AtomicU64,
  exited: AtomicU64,
}

impl PipelineStats {
  fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub fn captured(&self) -> u64 {
    self.captured.load(Ordering::Relaxed)
  }

  pub fn processed(&self) -> u64 {
    self.processed.load(Ordering::Relaxed)
  }

  pub fn detector_failures(&self) -> u64 {
    self.detector_failures.load(Ordering::Relaxed)
  }

  pub fn encoded(&self) -> u64 {
    self.encoded.load(Ordering::Relaxed)
  }

  pub fn encode_failures(&self) -> u64 {
    self.encode_failures.load(Ordering::Relaxed)
  }

  /// 因输出队列已满被丢弃的旧帧
  pub fn evicted(&self) -> u64 {
    self.evicted.load(Ordering::Relaxed)
  }

  pub fn entered(&self) -> u64 {
    self.entered.load(Ordering::Relaxed)
  }

  pub fn exited(&self) -> u64 {
    self.exited.load(Ordering::Relaxed)
  }
}

impl fmt::Display for PipelineStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "采集 {} 帧, 处理 {} 帧 (推理失败 {}), 编码 {} 帧 (失败 {}), 丢弃旧帧 {}, 进入 {} 人, 离开 {} 人",
      self.captured(),
      self.processed(),
      self.detector_failures(),
      self.encoded(),
      self.encode_failures(),
      self.evicted(),
      self.entered(),
      self.exited()
    )
  }
}

/// 三段流水线：采集线程、推理/编码线程，输出队列交给推流端消费
pub struct PipelineTask {
  config: PipelineConfig,
  running: Arc<AtomicBool>,
  heartbeat: Arc<dyn Heartbeat>,
  events: Option<Sender<TrackEvent>>,
}

impl PipelineTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      running: Arc::new(AtomicBool::new(true)),
      heartbeat: Arc::new(NoHeartbeat),
      events: None,
    }
  }

  /// 共享的运行标志，清除后所有线程退出
  pub fn with_running(mut self, running: Arc<AtomicBool>) -> Self {
    self.running = running;
    self
  }

  pub fn with_heartbeat(mut self, heartbeat: Arc<dyn Heartbeat>) -> Self {
    self.heartbeat = heartbeat;
    self
  }

  /// 跟踪事件的旁路通道，通道满时丢弃事件而不阻塞推理
  pub fn with_event_sink(mut self, events: Sender<TrackEvent>) -> Self {
    self.events = Some(events);
    self
  }
}

impl<S, D> Task<S, D> for PipelineTask
where
  S: FrameSource + 'static,
  D: Detector + 'static,
{
  type Output = Pipeline;
  type Error = anyhow::Error;

  fn run_task(self, source: S, detector: D) -> Result<Self::Output, Self::Error> {
    let config = self.config;
    config.validate()?;
    let encoder = JpegEncoder::new(config.jpeg_quality)?;

    let stats = Arc::new(PipelineStats::default());
    let (capture_tx, capture_rx) = bounded(config.capture_queue_depth);
    let (output_tx, output_rx) = output_queue::<EncodedFrame>(config.output_queue_depth);

    info!(
      "启动流水线: 检测线 y={}, 匹配窗口 ({}, {}), 阈值 {}, 采集队列 {}, 输出队列 {}, JPEG 质量 {}",
      config.line_y,
      config.window_x,
      config.window_y,
      config.score_threshold,
      config.capture_queue_depth,
      config.output_queue_depth,
      config.jpeg_quality
    );

    let capture = {
      let running = self.running.clone();
      let stats = stats.clone();
      let retry_delay = config.capture_retry_delay;
      thread::Builder::new()
        .name("xingren-capture".into())
        .spawn(move || run_capture(source, capture_tx, running, retry_delay, stats))?
    };

    let worker = InferenceWorker::new(detector, encoder, &config, output_tx, stats.clone())
      .with_events(self.events)
      .with_heartbeat(self.heartbeat);
    let inference = {
      let running = self.running.clone();
      thread::Builder::new()
        .name("xingren-inference".into())
        .spawn(move || worker.run(capture_rx, running))?
    };

    Ok(Pipeline {
      frames: output_rx,
      running: self.running,
      stats,
      handles: vec![capture, inference],
    })
  }
}

/// 运行中的流水线句柄
pub struct Pipeline {
  frames: OutputReceiver<EncodedFrame>,
  running: Arc<AtomicBool>,
  stats: Arc<PipelineStats>,
  handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
  /// 输出队列的消费端
  pub fn frames(&self) -> OutputReceiver<EncodedFrame> {
    self.frames.clone()
  }

  pub fn stats(&self) -> Arc<PipelineStats> {
    self.stats.clone()
  }

  pub fn running(&self) -> Arc<AtomicBool> {
    self.running.clone()
  }

  /// 两个工作线程都已退出
  pub fn is_finished(&self) -> bool {
    self.handles.iter().all(|h| h.is_finished())
  }

  pub fn shutdown(&self) {
    self.running.store(false, Ordering::SeqCst);
  }

  pub fn join(self) -> Arc<PipelineStats> {
    for handle in self.handles {
      let name = handle.thread().name().unwrap_or("worker").to_string();
      if handle.join().is_err() {
        error!("线程 {} 异常退出", name);
      }
    }
    info!("流水线结束: {}", self.stats);
    self.stats
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountSummary {
  pub frames: u64,
  pub entered: u64,
  pub exited: u64,
}

/// 单线程计数：采集 -> 推理 -> 跟踪，不做标注和编码
pub struct CountTask {
  config: PipelineConfig,
  frame_limit: Option<u64>,
  running: Arc<AtomicBool>,
}

impl CountTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      frame_limit: None,
      running: Arc::new(AtomicBool::new(true)),
    }
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn with_running(mut self, running: Arc<AtomicBool>) -> Self {
    self.running = running;
    self
  }
}

impl<S: FrameSource, D: Detector> Task<S, D> for CountTask {
  type Output = CountSummary;
  type Error = anyhow::Error;

  fn run_task(self, mut source: S, mut detector: D) -> Result<Self::Output, Self::Error> {
    self.config.validate()?;
    let mut tracker = Tracker::new(TrackerConfig::from(&self.config));
    let mut summary = CountSummary::default();

    info!("开始计数任务...");
    while self.running.load(Ordering::Relaxed) {
      if self.frame_limit.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }

      let frame = match source.acquire() {
        Ok(Some(frame)) => frame,
        Ok(None) => break,
        Err(e) => {
          warn!("采集失败: {}", e);
          thread::sleep(self.config.capture_retry_delay);
          continue;
        }
      };
      summary.frames += 1;

      let detections = match detector.infer(frame.pixels(), frame.width(), frame.height()) {
        Ok(detections) => detections,
        Err(e) => {
          warn!("帧 {} 推理失败: {}", frame.index(), e);
          continue;
        }
      };
      frame.release();

      for event in tracker.update(&filter_by_score(detections, self.config.score_threshold)) {
        match event {
          TrackEvent::Entered(_) => {
            summary.entered += 1;
            info!("{}", event);
          }
          TrackEvent::Exited(_) => {
            summary.exited += 1;
            info!("{}", event);
          }
          _ => {}
        }
      }
    }

    info!(
      "计数完成: {} 帧, 进入 {} 人, 离开 {} 人",
      summary.frames, summary.entered, summary.exited
    );
    Ok(summary)
  }
}

/// 中断信号清除运行标志；30 秒内没有退出则强制结束进程
pub fn install_interrupt_handler(running: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    running.store(false, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::{FramePool, PixelFormat, RawFrame},
    model::{Detection, ReplayDetector},
  };
  use std::convert::Infallible;

  struct Blank {
    pool: FramePool,
    remaining: usize,
  }

  impl FrameSource for Blank {
    type Error = Infallible;

    fn acquire(&mut self) -> Result<Option<RawFrame>, Self::Error> {
      if self.remaining == 0 {
        return Ok(None);
      }
      self.remaining -= 1;
      Ok(self.pool.acquire(Duration::from_secs(1)))
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

  fn at(x: i32, y: i32) -> Vec<Detection> {
    vec![Detection {
      score: 0.9,
      bbox: [x - 4, y - 8, x + 4, y + 8],
    }]
  }

  #[test]
  fn count_task_tallies_crossings() {
    let source = Blank {
      pool: FramePool::new(2, 160, 120, PixelFormat::Grayscale),
      remaining: 4,
    };
    let detector = ReplayDetector::new(vec![at(50, 50), at(50, 62), at(50, 70), at(50, 58)]);

    let summary = CountTask::new(PipelineConfig::default())
      .run_task(source, detector)
      .unwrap();
    assert_eq!(
      summary,
      CountSummary {
        frames: 4,
        entered: 1,
        exited: 1
      }
    );
  }

  #[test]
  fn count_task_respects_frame_limit() {
    let source = Blank {
      pool: FramePool::new(1, 8, 8, PixelFormat::Grayscale),
      remaining: 100,
    };
    let summary = CountTask::new(PipelineConfig::default())
      .with_frame_limit(Some(3))
      .run_task(source, ReplayDetector::new(Vec::new()))
      .unwrap();
    assert_eq!(summary.frames, 3);
  }

  #[test]
  fn pipeline_rejects_invalid_config() {
    let source = Blank {
      pool: FramePool::new(1, 8, 8, PixelFormat::Grayscale),
      remaining: 1,
    };
    let config = PipelineConfig {
      capture_queue_depth: 0,
      ..Default::default()
    };
    assert!(
      PipelineTask::new(config)
        .run_task(source, ReplayDetector::new(Vec::new()))
        .is_err()
    );
  }
}
