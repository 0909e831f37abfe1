//! PriorityQueue - 優先度ごとの FIFO キュー
//!
//! # 設計原則
//! - task_id のみを保持（状態・payload は Repository に保存）
//! - dequeue は CRITICAL → HIGH → NORMAL → LOW の順に走査し、最初に
//!   見つかった空でないレベルの先頭を取り出す。aging はしない
//! - 空のときは timeout 付きで待つ（worker が busy-loop しない）
//! - 同じ task_id は二重に積まない

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::domain::{Priority, TaskId};

/// 優先度ごとの待ち件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSizes {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueSizes {
    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

#[derive(Default)]
struct QueueState {
    /// `Priority::level()` でインデックス（0 = CRITICAL）
    levels: [VecDeque<TaskId>; 4],
    queued: HashSet<TaskId>,
}

/// PriorityQueue は worker 間で共有される配送キュー
///
/// # 使用例
/// ```ignore
/// let queue = PriorityQueue::new();
/// queue.enqueue(task.id, task.priority).await;
/// let next = queue.dequeue(Duration::from_secs(1)).await;
/// ```
#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 末尾に追加。既に積まれていれば何もせず false
    pub async fn enqueue(&self, task_id: TaskId, priority: Priority) -> bool {
        {
            let mut state = self.state.lock().await;
            if !state.queued.insert(task_id) {
                return false;
            }
            state.levels[priority.level()].push_back(task_id);
        }
        debug!(task_id = %task_id, priority = %priority, "enqueued");
        self.notify.notify_one();
        true
    }

    /// 最優先レベルの先頭を取り出す。`timeout` 内に何も来なければ None
    pub async fn dequeue(&self, timeout: Duration) -> Option<TaskId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task_id) = self.try_dequeue().await {
                return Some(task_id);
            }
            // notify_one は待ち手がいなければ permit を残すので取りこぼさない
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    async fn try_dequeue(&self) -> Option<TaskId> {
        let mut state = self.state.lock().await;
        let task_id = state.levels.iter_mut().find_map(|level| level.pop_front())?;
        state.queued.remove(&task_id);
        Some(task_id)
    }

    /// キューから外す（cancel・優先度変更用）。積まれていたら true
    pub async fn remove(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        if !state.queued.remove(&task_id) {
            return false;
        }
        for level in state.levels.iter_mut() {
            level.retain(|id| *id != task_id);
        }
        true
    }

    pub async fn contains(&self, task_id: TaskId) -> bool {
        self.state.lock().await.queued.contains(&task_id)
    }

    pub async fn queue_sizes(&self) -> QueueSizes {
        let state = self.state.lock().await;
        let len = |p: Priority| state.levels[p.level()].len();
        QueueSizes {
            critical: len(Priority::Critical),
            high: len(Priority::High),
            normal: len(Priority::Normal),
            low: len(Priority::Low),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queued.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
