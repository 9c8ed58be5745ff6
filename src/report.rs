// 该文件是 Xingren （行人计数） 项目的一部分。
// src/report.rs - 进出记录上报
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

//! 推理线程把跟踪事件投递到有界通道，上报线程把进入/离开事件
//! 攒成批次，定期以 JSON 数组 POST 到看板服务的 `/movements/` 接口。

use std::{
  collections::VecDeque,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::tracker::TrackEvent;

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
/// 上报失败时最多保留的记录数，超出丢弃最旧的
pub const MAX_PENDING_MOVEMENTS: usize = 1024;
/// 推理线程到上报线程的事件通道深度
pub const EVENT_CHANNEL_DEPTH: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("上报地址错误: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("HTTP 请求失败: {0}")]
  HttpError(#[from] Box<ureq::Error>),
  #[error("序列化失败: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 一次进出记录，字段名与看板接口一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
  /// Unix 时间戳，秒
  pub time: i64,
  /// true 为进入，false 为离开
  pub form: bool,
}

impl Movement {
  pub fn from_event(event: &TrackEvent, time: i64) -> Option<Self> {
    match event {
      TrackEvent::Entered(_) => Some(Self { time, form: true }),
      TrackEvent::Exited(_) => Some(Self { time, form: false }),
      TrackEvent::StillPresent(_) | TrackEvent::LeftFrame(_) => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
  pub endpoint: Url,
  pub api_key: String,
  pub interval: Duration,
}

impl ReportConfig {
  pub fn new(endpoint: Url, api_key: impl Into<String>) -> Self {
    Self {
      endpoint,
      api_key: api_key.into(),
      interval: DEFAULT_REPORT_INTERVAL,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  /// `<endpoint>/movements/?api_key=<key>`
  pub fn movements_url(&self) -> Result<Url, ReportError> {
    let mut base = self.endpoint.clone();
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    let mut url = base.join("movements/")?;
    url
      .query_pairs_mut()
      .clear()
      .append_pair("api_key", &self.api_key);
    Ok(url)
  }
}

/// 上报目标
pub trait MovementPoster: Send {
  fn post(&mut self, movements: &[Movement]) -> Result<(), ReportError>;
}

pub struct HttpPoster {
  url: Url,
}

impl HttpPoster {
  pub fn new(config: &ReportConfig) -> Result<Self, ReportError> {
    Ok(Self {
      url: config.movements_url()?,
    })
  }
}

impl MovementPoster for HttpPoster {
  fn post(&mut self, movements: &[Movement]) -> Result<(), ReportError> {
    let body = serde_json::to_string(movements)?;
    ureq::post(self.url.as_str())
      .set("Content-Type", "application/json")
      .send_string(&body)
      .map_err(Box::new)?;
    Ok(())
  }
}

/// 待上报记录，容量固定
#[derive(Debug)]
pub struct MovementBatch {
  pending: VecDeque<Movement>,
  capacity: usize,
}

impl MovementBatch {
  pub fn new(capacity: usize) -> Self {
    Self {
      pending: VecDeque::new(),
      capacity: capacity.max(1),
    }
  }

  /// 满时丢弃最旧的记录并返回 true
  pub fn push(&mut self, movement: Movement) -> bool {
    let overflow = self.pending.len() >= self.capacity;
    if overflow {
      self.pending.pop_front();
    }
    self.pending.push_back(movement);
    overflow
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  /// 成功后清空；失败时保留，下次一起上报
  pub fn flush<P: MovementPoster>(&mut self, poster: &mut P) -> Result<usize, ReportError> {
    if self.pending.is_empty() {
      return Ok(0);
    }
    let movements: &[Movement] = self.pending.make_contiguous();
    poster.post(movements)?;
    let sent = self.pending.len();
    self.pending.clear();
    Ok(sent)
  }
}

pub struct MovementReporter<P> {
  poster: P,
  interval: Duration,
  batch: MovementBatch,
}

impl MovementReporter<HttpPoster> {
  pub fn http(config: &ReportConfig) -> Result<Self, ReportError> {
    Ok(Self::new(HttpPoster::new(config)?, config.interval))
  }
}

impl<P: MovementPoster + 'static> MovementReporter<P> {
  pub fn new(poster: P, interval: Duration) -> Self {
    Self {
      poster,
      interval,
      batch: MovementBatch::new(MAX_PENDING_MOVEMENTS),
    }
  }

  pub fn record(&mut self, event: &TrackEvent) {
    if let Some(movement) = Movement::from_event(event, Utc::now().timestamp())
      && self.batch.push(movement)
    {
      warn!("待上报记录已满 {} 条，丢弃最旧记录", MAX_PENDING_MOVEMENTS);
    }
  }

  pub fn pending(&self) -> usize {
    self.batch.len()
  }

  pub fn flush(&mut self) {
    match self.batch.flush(&mut self.poster) {
      Ok(0) => {}
      Ok(sent) => info!("上报 {} 条进出记录", sent),
      Err(e) => warn!("上报失败，保留 {} 条记录: {}", self.batch.len(), e),
    }
  }

  /// 每个周期上报一次；事件通道关闭或 `running` 清除时做最后一次上报后退出
  pub fn run(mut self, events: Receiver<TrackEvent>, running: Arc<AtomicBool>) {
    let mut deadline = Instant::now() + self.interval;
    while running.load(Ordering::Relaxed) {
      let wait = deadline
        .saturating_duration_since(Instant::now())
        .min(POLL_INTERVAL);
      match events.recv_timeout(wait) {
        Ok(event) => self.record(&event),
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => {
          debug!("事件通道已关闭");
          break;
        }
      }
      if Instant::now() >= deadline {
        self.flush();
        deadline = Instant::now() + self.interval;
      }
    }
    while let Ok(event) = events.try_recv() {
      self.record(&event);
    }
    self.flush();
  }

  pub fn spawn(
    self,
    events: Receiver<TrackEvent>,
    running: Arc<AtomicBool>,
  ) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
      .name("xingren-report".into())
      .spawn(move || self.run(events, running))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tracker::Centroid;
  use crossbeam_channel::bounded;
  use std::sync::Mutex;

  #[derive(Clone, Default)]
  struct Recorder {
    posted: Arc<Mutex<Vec<Vec<Movement>>>>,
    fail: Arc<AtomicBool>,
  }

  impl MovementPoster for Recorder {
    fn post(&mut self, movements: &[Movement]) -> Result<(), ReportError> {
      if self.fail.load(Ordering::SeqCst) {
        return Err(ReportError::UrlError(url::ParseError::EmptyHost));
      }
      self.posted.lock().unwrap().push(movements.to_vec());
      Ok(())
    }
  }

  #[test]
  fn only_crossings_become_movements() {
    let c = Centroid::new(1, 1);
    assert_eq!(
      Movement::from_event(&TrackEvent::Entered(c), 5),
      Some(Movement {
        time: 5,
        form: true
      })
    );
    assert_eq!(
      Movement::from_event(&TrackEvent::Exited(c), 6),
      Some(Movement {
        time: 6,
        form: false
      })
    );
    assert_eq!(Movement::from_event(&TrackEvent::StillPresent(c), 7), None);
    assert_eq!(Movement::from_event(&TrackEvent::LeftFrame(c), 8), None);
  }

  #[test]
  fn serializes_like_the_dashboard_expects() {
    let json = serde_json::to_string(&[Movement {
      time: 1700000000,
      form: true,
    }])
    .unwrap();
    assert_eq!(json, r#"[{"time":1700000000,"form":true}]"#);
  }

  #[test]
  fn builds_movements_url() {
    let config = ReportConfig::new(Url::parse("http://dash.local:8000/api").unwrap(), "k 1");
    assert_eq!(
      config.movements_url().unwrap().as_str(),
      "http://dash.local:8000/api/movements/?api_key=k+1"
    );
  }

  #[test]
  fn batch_is_capped_and_kept_on_failure() {
    let mut batch = MovementBatch::new(2);
    let mut poster = Recorder::default();
    assert!(!batch.push(Movement { time: 1, form: true }));
    assert!(!batch.push(Movement { time: 2, form: false }));
    assert!(batch.push(Movement { time: 3, form: true }));

    poster.fail.store(true, Ordering::SeqCst);
    assert!(batch.flush(&mut poster).is_err());
    assert_eq!(batch.len(), 2);

    poster.fail.store(false, Ordering::SeqCst);
    assert_eq!(batch.flush(&mut poster).unwrap(), 2);
    assert!(batch.is_empty());
    let posted = poster.posted.lock().unwrap();
    assert_eq!(posted[0].iter().map(|m| m.time).collect::<Vec<_>>(), vec![2, 3]);
  }

  #[test]
  fn reporter_flushes_when_events_close() {
    let poster = Recorder::default();
    let posted = poster.posted.clone();
    let (tx, rx) = bounded(8);
    let c = Centroid::new(0, 0);
    tx.send(TrackEvent::Entered(c)).unwrap();
    tx.send(TrackEvent::StillPresent(c)).unwrap();
    tx.send(TrackEvent::Exited(c)).unwrap();
    drop(tx);

    MovementReporter::new(poster, Duration::from_secs(60))
      .run(rx, Arc::new(AtomicBool::new(true)));
    let posted = posted.lock().unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(
      posted[0].iter().map(|m| m.form).collect::<Vec<_>>(),
      vec![true, false]
    );
  }
}
