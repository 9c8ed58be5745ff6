// 该文件是 Xingren （行人计数） 项目的一部分。
// src/tracker.rs - 行人跟踪
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

//! # 质心跟踪
//!
//! 每帧调用一次 [`Tracker::update`]：
//!
//! 1. 匹配：对上一帧的每个跟踪目标，取第一个质心落在窗口内的检测结果。
//!    匹配成功则更新位置，并根据检测线判断进入/离开；否则丢弃并报告离开画面。
//! 2. 新建：与上一帧任何目标都不匹配的检测结果成为新的跟踪目标。
//!
//! 第 2 步始终与更新前的快照比较，因此一个检测结果既能延续旧目标，
//! 又不会在同一帧被重复新建。

use std::fmt;

use crate::model::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Centroid {
  pub x: i32,
  pub y: i32,
}

impl Centroid {
  pub fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }

  /// 检测框中点，整数除法；在 i64 中求和，任意坐标都不会溢出
  pub fn of_box(bbox: &[i32; 4]) -> Self {
    let mid = |a: i32, b: i32| ((i64::from(a) + i64::from(b)) / 2) as i32;
    Self {
      x: mid(bbox[0], bbox[2]),
      y: mid(bbox[1], bbox[3]),
    }
  }
}

impl fmt::Display for Centroid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {})", self.x, self.y)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
  /// 质心从检测线上方跨到线上或线下
  Entered(Centroid),
  /// 质心从检测线下方跨到线上或线上方
  Exited(Centroid),
  StillPresent(Centroid),
  /// 位置为最后一次出现的位置
  LeftFrame(Centroid),
}

impl TrackEvent {
  pub fn centroid(&self) -> Centroid {
    match self {
      TrackEvent::Entered(c)
      | TrackEvent::Exited(c)
      | TrackEvent::StillPresent(c)
      | TrackEvent::LeftFrame(c) => *c,
    }
  }
}

impl fmt::Display for TrackEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TrackEvent::Entered(c) => write!(f, "行人进入 {}", c),
      TrackEvent::Exited(c) => write!(f, "行人离开 {}", c),
      TrackEvent::StillPresent(c) => write!(f, "行人仍在画面中 {}", c),
      TrackEvent::LeftFrame(c) => write!(f, "行人离开画面 {}", c),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPedestrian {
  bbox: [i32; 4],
  centroid: Centroid,
}

impl TrackedPedestrian {
  fn from_box(bbox: [i32; 4]) -> Self {
    Self {
      bbox,
      centroid: Centroid::of_box(&bbox),
    }
  }

  pub fn bbox(&self) -> [i32; 4] {
    self.bbox
  }

  pub fn centroid(&self) -> Centroid {
    self.centroid
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
  pub line_y: i32,
  pub window_x: i32,
  pub window_y: i32,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      line_y: crate::config::DEFAULT_LINE_Y,
      window_x: crate::config::DEFAULT_WINDOW_X,
      window_y: crate::config::DEFAULT_WINDOW_Y,
    }
  }
}

impl From<&crate::config::PipelineConfig> for TrackerConfig {
  fn from(config: &crate::config::PipelineConfig) -> Self {
    Self {
      line_y: config.line_y,
      window_x: config.window_x,
      window_y: config.window_y,
    }
  }
}

/// 行人跟踪器，只由推理线程持有
#[derive(Debug, Default)]
pub struct Tracker {
  config: TrackerConfig,
  live: Vec<TrackedPedestrian>,
}

impl Tracker {
  pub fn new(config: TrackerConfig) -> Self {
    Self {
      config,
      live: Vec::new(),
    }
  }

  pub fn config(&self) -> &TrackerConfig {
    &self.config
  }

  pub fn live(&self) -> &[TrackedPedestrian] {
    &self.live
  }

  fn same_pedestrian(&self, a: Centroid, b: Centroid) -> bool {
    let within =
      |p: i32, q: i32, window: i32| (i64::from(p) - i64::from(q)).abs() <= i64::from(window);
    within(a.x, b.x, self.config.window_x) && within(a.y, b.y, self.config.window_y)
  }

  fn crossing(&self, old: Centroid, new: Centroid) -> TrackEvent {
    let line = self.config.line_y;
    if old.y > line && new.y <= line {
      TrackEvent::Exited(new)
    } else if old.y < line && new.y >= line {
      TrackEvent::Entered(new)
    } else {
      TrackEvent::StillPresent(new)
    }
  }

  /// 用本帧（已按阈值过滤的）检测结果更新跟踪集合，返回本帧事件
  pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackEvent> {
    let candidates: Vec<TrackedPedestrian> = detections
      .iter()
      .map(|d| TrackedPedestrian::from_box(d.bbox))
      .collect();

    let mut events = Vec::with_capacity(self.live.len() + candidates.len());
    let mut next = Vec::with_capacity(self.live.len() + candidates.len());

    for old in &self.live {
      match candidates
        .iter()
        .find(|c| self.same_pedestrian(old.centroid, c.centroid))
      {
        Some(matched) => {
          events.push(self.crossing(old.centroid, matched.centroid));
          next.push(matched.clone());
        }
        None => events.push(TrackEvent::LeftFrame(old.centroid)),
      }
    }

    // self.live 此时仍是更新前的快照
    for candidate in &candidates {
      let known = self
        .live
        .iter()
        .any(|old| self.same_pedestrian(candidate.centroid, old.centroid));
      if !known {
        next.push(candidate.clone());
      }
    }

    self.live = next;
    events
  }
}
