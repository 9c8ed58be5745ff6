// 该文件是 Xingren （行人计数） 项目的一部分。
// src/watchdog.rs - 推理线程看门狗
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

//! 推理线程每处理完一帧喂一次狗。超过超时时间没有心跳时，看门狗
//! 记录故障并清除 `running` 标志，所有工作线程随之退出，
//! 进程以非零状态结束，由外部守护进程重启。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use tracing::{debug, error};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub trait Heartbeat: Send + Sync {
  fn beat(&self);
}

/// 不受监控时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeartbeat;

impl Heartbeat for NoHeartbeat {
  fn beat(&self) {}
}

#[derive(Debug)]
struct WatchdogState {
  epoch: Instant,
  /// 距 epoch 的毫秒数；初值为 0，即启动宽限期等于超时时间
  last_beat_ms: AtomicU64,
  tripped: AtomicBool,
  stopped: AtomicBool,
}

impl WatchdogState {
  fn now_ms(&self) -> u64 {
    self.epoch.elapsed().as_millis() as u64
  }
}

impl Heartbeat for WatchdogState {
  fn beat(&self) {
    self.last_beat_ms.store(self.now_ms(), Ordering::Relaxed);
  }
}

pub struct Watchdog {
  state: Arc<WatchdogState>,
  handle: Option<JoinHandle<()>>,
}

impl Watchdog {
  pub fn spawn(timeout: Duration, running: Arc<AtomicBool>) -> std::io::Result<Self> {
    let state = Arc::new(WatchdogState {
      epoch: Instant::now(),
      last_beat_ms: AtomicU64::new(0),
      tripped: AtomicBool::new(false),
      stopped: AtomicBool::new(false),
    });
    let poll = (timeout / 4).clamp(Duration::from_millis(1), MAX_POLL_INTERVAL);
    let timeout_ms = timeout.as_millis() as u64;

    let watched = Arc::clone(&state);
    let handle = thread::Builder::new()
      .name("xingren-watchdog".into())
      .spawn(move || {
        while running.load(Ordering::Relaxed) && !watched.stopped.load(Ordering::Relaxed) {
          thread::sleep(poll);
          let silent = watched
            .now_ms()
            .saturating_sub(watched.last_beat_ms.load(Ordering::Relaxed));
          if silent > timeout_ms {
            error!("看门狗超时: 推理线程 {} ms 没有心跳，停止流水线", silent);
            watched.tripped.store(true, Ordering::SeqCst);
            running.store(false, Ordering::SeqCst);
            break;
          }
        }
        debug!("看门狗线程退出");
      })?;

    Ok(Self {
      state,
      handle: Some(handle),
    })
  }

  /// 交给推理线程的心跳句柄
  pub fn heartbeat(&self) -> Arc<dyn Heartbeat> {
    self.state.clone()
  }

  pub fn tripped(&self) -> bool {
    self.state.tripped.load(Ordering::SeqCst)
  }

  /// 停止监控，不会触发故障
  pub fn stop(mut self) -> bool {
    self.shutdown();
    self.tripped()
  }

  fn shutdown(&mut self) {
    self.state.stopped.store(true, Ordering::SeqCst);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

impl Drop for Watchdog {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn silent_worker_trips_and_clears_running() {
    let running = Arc::new(AtomicBool::new(true));
    let watchdog = Watchdog::spawn(Duration::from_millis(40), running.clone()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(5));
    }
    assert!(!running.load(Ordering::SeqCst));
    assert!(watchdog.stop());
  }

  #[test]
  fn regular_beats_keep_pipeline_alive() {
    let running = Arc::new(AtomicBool::new(true));
    let watchdog = Watchdog::spawn(Duration::from_millis(200), running.clone()).unwrap();
    let heartbeat = watchdog.heartbeat();

    for _ in 0..20 {
      heartbeat.beat();
      thread::sleep(Duration::from_millis(10));
    }
    assert!(running.load(Ordering::SeqCst));
    assert!(!watchdog.stop());
  }

  #[test]
  fn stopping_does_not_touch_running() {
    let running = Arc::new(AtomicBool::new(true));
    let watchdog = Watchdog::spawn(Duration::from_secs(10), running.clone()).unwrap();
    assert!(!watchdog.stop());
    assert!(running.load(Ordering::SeqCst));
  }
}
