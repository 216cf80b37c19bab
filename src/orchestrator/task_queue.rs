//! FIFO pending queue plus a processing index, both keyed by task id. A
//! task id is in the queue xor the processing set xor absent, never both.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::models::task::Task;

struct QueuedEntry {
    task: Task,
    queued_at: DateTime<Utc>,
}

struct ProcessingEntry {
    task: Task,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskQueueStats {
    pub queued: usize,
    pub processing: usize,
    pub total: usize,
    pub oldest_queued_at: Option<DateTime<Utc>>,
}

pub struct TaskQueue {
    queue: Mutex<VecDeque<QueuedEntry>>,
    processing: Mutex<HashMap<String, ProcessingEntry>>,
    max_queue_size: usize,
}

impl TaskQueue {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            processing: Mutex::new(HashMap::new()),
            max_queue_size,
        }
    }

    pub async fn has_task(&self, task_id: &str) -> bool {
        let queue = self.queue.lock().await;
        if queue.iter().any(|e| e.task.id == task_id) {
            return true;
        }
        drop(queue);
        self.processing.lock().await.contains_key(task_id)
    }

    pub async fn enqueue(&self, task: Task) -> Result<()> {
        if self.has_task(&task.id).await {
            return Err(OrchestratorError::DuplicateTask(task.id));
        }

        let mut queue = self.queue.lock().await;
        if queue.len() >= self.max_queue_size {
            return Err(OrchestratorError::QueueFull {
                max_size: self.max_queue_size,
            });
        }

        let task_id = task.id.clone();
        queue.push_back(QueuedEntry {
            task,
            queued_at: Utc::now(),
        });
        info!(task_id = %task_id, position = queue.len(), "task enqueued");
        Ok(())
    }

    /// Removes the head of the queue and moves it into the processing set.
    pub async fn dequeue(&self) -> Option<Task> {
        let mut queue = self.queue.lock().await;
        let entry = queue.pop_front()?;
        drop(queue);

        let task = entry.task.clone();
        let mut processing = self.processing.lock().await;
        processing.insert(
            task.id.clone(),
            ProcessingEntry {
                task: entry.task,
                started_at: Utc::now(),
            },
        );
        debug!(task_id = %task.id, "task moved to processing");
        Some(task)
    }

    pub async fn peek(&self) -> Option<Task> {
        let queue = self.queue.lock().await;
        queue.front().map(|e| e.task.clone())
    }

    /// Removes a task from either the queue or the processing set.
    pub async fn remove(&self, task_id: &str) -> bool {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|e| e.task.id != task_id);
        if queue.len() != before {
            return true;
        }
        drop(queue);
        self.processing.lock().await.remove(task_id).is_some()
    }

    /// Marks a processing task as finished, removing it entirely.
    pub async fn complete(&self, task_id: &str) -> bool {
        self.processing.lock().await.remove(task_id).is_some()
    }

    pub async fn size(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    pub async fn get_stale_tasks(&self, max_age_ms: i64) -> Vec<Task> {
        let processing = self.processing.lock().await;
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms);
        processing
            .values()
            .filter(|e| e.started_at < cutoff)
            .map(|e| e.task.clone())
            .collect()
    }

    pub async fn clear(&self) {
        let mut queue = self.queue.lock().await;
        let mut processing = self.processing.lock().await;
        let count = queue.len() + processing.len();
        queue.clear();
        processing.clear();
        info!(count, "task queue cleared");
    }

    pub async fn get_stats(&self) -> TaskQueueStats {
        let queue = self.queue.lock().await;
        let processing = self.processing.lock().await;
        TaskQueueStats {
            queued: queue.len(),
            processing: processing.len(),
            total: queue.len() + processing.len(),
            oldest_queued_at: queue.front().map(|e| e.queued_at),
        }
    }
}
