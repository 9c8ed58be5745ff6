// 该文件是 Xingren （行人计数） 项目的一部分。
// src/task/worker.rs - 采集线程与推理/编码线程
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
  fmt::Display,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::{
  PipelineStats,
  queue::{OutputSender, PushOutcome},
};
use crate::{
  config::PipelineConfig,
  frame::{EncodedFrame, RawFrame},
  input::FrameSource,
  model::{Detector, filter_by_score},
  output::{Annotator, Encode, draw::DEFAULT_MARKER_RADIUS},
  tracker::{TrackEvent, Tracker, TrackerConfig},
  watchdog::{Heartbeat, NoHeartbeat},
};

/// 阻塞等待的轮询间隔，用于及时响应停止信号
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 采集循环：获取帧并阻塞推入采集队列。
///
/// 来源暂时不可用时等待 `retry_delay` 后重试；来源结束或队列关闭时退出。
pub fn run_capture<S: FrameSource>(
  mut source: S,
  tx: Sender<RawFrame>,
  running: Arc<AtomicBool>,
  retry_delay: Duration,
  stats: Arc<PipelineStats>,
) {
  info!(
    "采集线程启动: {}x{} {}",
    source.width(),
    source.height(),
    source.format()
  );

  'capture: while running.load(Ordering::Relaxed) {
    let mut frame = match source.acquire() {
      Ok(Some(frame)) => frame,
      Ok(None) => {
        info!("帧来源已结束");
        break;
      }
      Err(e) => {
        warn!("采集失败: {}", e);
        thread::sleep(retry_delay);
        continue;
      }
    };
    PipelineStats::bump(&stats.captured);

    loop {
      match tx.send_timeout(frame, POLL_INTERVAL) {
        Ok(()) => break,
        Err(SendTimeoutError::Timeout(back)) => {
          if !running.load(Ordering::Relaxed) {
            break 'capture;
          }
          frame = back;
        }
        Err(SendTimeoutError::Disconnected(_)) => {
          warn!("采集队列已关闭");
          break 'capture;
        }
      }
    }
  }

  info!("采集线程退出");
}

/// 单帧处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  Streamed(PushOutcome),
  DetectorFailed,
  EncodeFailed,
}

/// 推理/编码线程持有的全部状态，跟踪器只在这里被修改
pub struct InferenceWorker<D, E> {
  detector: D,
  encoder: E,
  tracker: Tracker,
  annotator: Annotator,
  score_threshold: f32,
  output: OutputSender<EncodedFrame>,
  events: Option<Sender<TrackEvent>>,
  heartbeat: Arc<dyn Heartbeat>,
  stats: Arc<PipelineStats>,
}

impl<D, E> InferenceWorker<D, E>
where
  D: Detector,
  E: Encode<Error: Display>,
{
  pub fn new(
    detector: D,
    encoder: E,
    config: &PipelineConfig,
    output: OutputSender<EncodedFrame>,
    stats: Arc<PipelineStats>,
  ) -> Self {
    Self {
      detector,
      encoder,
      tracker: Tracker::new(TrackerConfig::from(config)),
      annotator: Annotator::new(config.line_y, DEFAULT_MARKER_RADIUS),
      score_threshold: config.score_threshold,
      output,
      events: None,
      heartbeat: Arc::new(NoHeartbeat),
      stats,
    }
  }

  pub fn with_events(mut self, events: Option<Sender<TrackEvent>>) -> Self {
    self.events = events;
    self
  }

  pub fn with_heartbeat(mut self, heartbeat: Arc<dyn Heartbeat>) -> Self {
    self.heartbeat = heartbeat;
    self
  }

  pub fn tracker(&self) -> &Tracker {
    &self.tracker
  }

  /// 推理 -> 跟踪 -> 标注 -> 编码 -> 推送。
  ///
  /// 原始帧按值传入，在编码完成后立即归还缓冲池，早于推送输出队列。
  pub fn process_frame(&mut self, mut frame: RawFrame) -> FrameOutcome {
    PipelineStats::bump(&self.stats.processed);

    let detections = match self
      .detector
      .infer(frame.pixels(), frame.width(), frame.height())
    {
      Ok(detections) => detections,
      Err(e) => {
        warn!("帧 {} 推理失败，丢弃: {}", frame.index(), e);
        PipelineStats::bump(&self.stats.detector_failures);
        return FrameOutcome::DetectorFailed;
      }
    };
    let detections = filter_by_score(detections, self.score_threshold);

    let events = self.tracker.update(&detections);
    for event in events {
      self.dispatch(event);
    }

    self.annotator.annotate(
      &mut frame,
      self.tracker.live().iter().map(|p| p.centroid()),
    );
    let encoded = self.encoder.encode(&frame);
    let index = frame.index();
    frame.release();

    match encoded {
      Ok(encoded) => {
        PipelineStats::bump(&self.stats.encoded);
        let outcome = self.output.push(encoded);
        match outcome {
          PushOutcome::ReplacedStale => PipelineStats::bump(&self.stats.evicted),
          PushOutcome::Discarded => debug!("帧 {} 未能进入输出队列", index),
          PushOutcome::Enqueued => {}
        }
        FrameOutcome::Streamed(outcome)
      }
      Err(e) => {
        warn!("帧 {} 编码失败: {}", index, e);
        PipelineStats::bump(&self.stats.encode_failures);
        FrameOutcome::EncodeFailed
      }
    }
  }

  fn dispatch(&self, event: TrackEvent) {
    match event {
      TrackEvent::Entered(_) => {
        PipelineStats::bump(&self.stats.entered);
        info!("{}", event);
      }
      TrackEvent::Exited(_) => {
        PipelineStats::bump(&self.stats.exited);
        info!("{}", event);
      }
      TrackEvent::StillPresent(_) | TrackEvent::LeftFrame(_) => {
        debug!("{}", event);
        return;
      }
    }

    // 旁路通道只接收越线事件
    if let Some(events) = &self.events
      && let Err(TrySendError::Full(dropped)) = events.try_send(event)
    {
      warn!("事件通道已满，丢弃事件: {}", dropped);
    }
  }

  /// 推理循环，采集队列关闭或 `running` 被清除时退出
  pub fn run(mut self, rx: Receiver<RawFrame>, running: Arc<AtomicBool>) {
    info!("推理线程启动");
    while running.load(Ordering::Relaxed) {
      match rx.recv_timeout(POLL_INTERVAL) {
        Ok(frame) => {
          self.process_frame(frame);
        }
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => {
          info!("采集队列已关闭");
          break;
        }
      }
      // 每轮循环都喂狗，采集端长时间无帧也不算卡死
      self.heartbeat.beat();
    }
    info!("推理线程退出");
  }
}
