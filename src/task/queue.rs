// 该文件是 Xingren （行人计数） 项目的一部分。
// src/task/queue.rs - 丢弃最旧帧的输出队列
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

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

/// 腾出空位后仍被抢占时最多重试的次数
const MAX_PUSH_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
  Enqueued,
  /// 队列已满，最旧的一帧被丢弃
  ReplacedStale,
  /// 新帧本身被丢弃
  Discarded,
}

/// 生产端。持有一个接收端克隆，用来在队列满时取出并丢弃最旧的元素，
/// 因此推送永远不会阻塞。
pub struct OutputSender<T> {
  tx: Sender<T>,
  evict: Receiver<T>,
}

/// 消费端，可以克隆；多个消费者瓜分同一帧序列
pub struct OutputReceiver<T> {
  rx: Receiver<T>,
}

// 手写实现：元素本身（如 `EncodedFrame`）不可克隆
impl<T> Clone for OutputReceiver<T> {
  fn clone(&self) -> Self {
    Self {
      rx: self.rx.clone(),
    }
  }
}

pub fn output_queue<T>(depth: usize) -> (OutputSender<T>, OutputReceiver<T>) {
  let (tx, rx) = bounded(depth.max(1));
  (
    OutputSender {
      tx,
      evict: rx.clone(),
    },
    OutputReceiver { rx },
  )
}

impl<T> OutputSender<T> {
  pub fn push(&self, item: T) -> PushOutcome {
    let mut item = item;
    let mut evicted = false;
    for _ in 0..MAX_PUSH_ATTEMPTS {
      match self.tx.try_send(item) {
        Ok(()) if evicted => return PushOutcome::ReplacedStale,
        Ok(()) => return PushOutcome::Enqueued,
        Err(TrySendError::Full(back)) => {
          item = back;
          // 取出的旧元素在此处析构
          if self.evict.try_recv().is_ok() {
            evicted = true;
          }
        }
        Err(TrySendError::Disconnected(_)) => return PushOutcome::Discarded,
      }
    }
    PushOutcome::Discarded
  }

  pub fn len(&self) -> usize {
    self.tx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tx.is_empty()
  }
}

impl<T> OutputReceiver<T> {
  /// 等待下一帧。所有生产端析构后返回 `Disconnected`
  pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
    self.rx.recv_timeout(timeout)
  }

  pub fn try_recv(&self) -> Option<T> {
    self.rx.try_recv().ok()
  }

  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }
}
