use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::job::{JobId, RecognitionResult};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("等待识别结果超时")]
    Timeout,
    #[error("识别结果通道已关闭")]
    Closed,
}

enum Slot {
    /// 调用方正在等待
    Waiting(oneshot::Sender<RecognitionResult>),
    /// 结果已完成，但还没有被取走
    Ready { result: RecognitionResult, published_at: Instant },
}

/// 任务 ID 到识别结果的映射，每个结果只能被取走一次
#[derive(Default)]
pub struct ResultStore {
    slots: Mutex<HashMap<JobId, Slot>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<JobId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在任务入队前登记等待，返回接收结果的通道
    pub fn subscribe(&self, id: JobId) -> oneshot::Receiver<RecognitionResult> {
        let (tx, rx) = oneshot::channel();
        self.slots().insert(id, Slot::Waiting(tx));
        rx
    }

    /// 发布任务结果
    ///
    /// 有调用方在等待时直接交给调用方，否则保存下来等待 [`Self::try_take`]。
    /// 调用方已经放弃等待的结果会成为孤儿，由 [`Self::evict_expired`] 清理。
    pub fn publish(&self, id: JobId, result: RecognitionResult) {
        let mut slots = self.slots();
        let result = match slots.remove(&id) {
            Some(Slot::Waiting(tx)) => match tx.send(result) {
                Ok(()) => return,
                Err(result) => {
                    debug!("任务 {id} 的调用方已放弃等待，保留孤儿结果");
                    result
                }
            },
            Some(Slot::Ready { .. }) => {
                warn!("任务 {id} 的结果被重复发布，覆盖旧结果");
                result
            }
            None => result,
        };
        slots.insert(id, Slot::Ready { result, published_at: Instant::now() });
    }

    /// 取走已完成的结果，不存在或尚未完成时返回 None
    pub fn try_take(&self, id: &JobId) -> Option<RecognitionResult> {
        let mut slots = self.slots();
        if !matches!(slots.get(id), Some(Slot::Ready { .. })) {
            return None;
        }
        match slots.remove(id) {
            Some(Slot::Ready { result, .. }) => Some(result),
            _ => None,
        }
    }

    /// 移除任务的所有记录，用于任务未能入队的情况
    pub fn forget(&self, id: &JobId) {
        self.slots().remove(id);
    }

    /// 调用方是否已经放弃等待该任务
    ///
    /// 等待记录已被清理的任务同样视为放弃
    pub fn is_abandoned(&self, id: &JobId) -> bool {
        match self.slots().get(id) {
            Some(Slot::Waiting(tx)) => tx.is_closed(),
            Some(Slot::Ready { .. }) => false,
            None => true,
        }
    }

    /// 关闭所有仍在等待的调用方，它们会收到 [`WaitError::Closed`]
    ///
    /// 识别线程退出后调用，返回关闭的数量
    pub fn close_all_waiting(&self) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| matches!(slot, Slot::Ready { .. }));
        before - slots.len()
    }

    /// 等待结果，超过 `timeout` 后放弃
    ///
    /// 放弃等待会关闭接收端，识别线程据此可以跳过尚未开始的任务
    pub async fn wait(
        &self,
        id: JobId,
        rx: oneshot::Receiver<RecognitionResult>,
        timeout: Duration,
    ) -> Result<RecognitionResult, WaitError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => {
                self.slots().remove(&id);
                Err(WaitError::Closed)
            }
            Err(_) => Err(WaitError::Timeout),
        }
    }

    /// 清理超过 `grace` 仍未被取走的孤儿结果，以及调用方已放弃的等待记录，返回清理数量
    pub fn evict_expired(&self, grace: Duration) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready { published_at, .. } => published_at.elapsed() < grace,
            Slot::Waiting(tx) => !tx.is_closed(),
        });
        before - slots.len()
    }

    /// 已完成但尚未被取走的结果数量
    pub fn ready_count(&self) -> usize {
        self.slots().values().filter(|slot| matches!(slot, Slot::Ready { .. })).count()
    }

    /// 尚未完成的等待数量
    pub fn waiting_count(&self) -> usize {
        self.slots().values().filter(|slot| matches!(slot, Slot::Waiting(_))).count()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::job::ErrorKind;

    fn result() -> RecognitionResult {
        RecognitionResult::error(ErrorKind::DetectionFailure, "未检测到猫脸")
    }

    #[test]
    fn try_take_is_one_shot() {
        let store = ResultStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.try_take(&id), None);
        store.publish(id, result());
        assert_eq!(store.try_take(&id), Some(result()));
        assert_eq!(store.try_take(&id), None);
        assert_eq!(store.ready_count(), 0);
    }

    #[test]
    fn try_take_does_not_steal_pending_slot() {
        let store = ResultStore::new();
        let id = Uuid::new_v4();
        let _rx = store.subscribe(id);
        assert_eq!(store.try_take(&id), None);
        assert_eq!(store.waiting_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_published_result() {
        let store = ResultStore::new();
        let id = Uuid::new_v4();
        let rx = store.subscribe(id);
        store.publish(id, result());
        let got = store.wait(id, rx, Duration::from_secs(1)).await;
        assert_eq!(got, Ok(result()));
        assert_eq!(store.ready_count(), 0);
        assert_eq!(store.waiting_count(), 0);
    }

    #[tokio::test]
    async fn timed_out_waiter_leaves_orphan_that_gets_evicted() {
        let store = ResultStore::new();
        let id = Uuid::new_v4();
        let rx = store.subscribe(id);
        let got = store.wait(id, rx, Duration::from_millis(10)).await;
        assert_eq!(got, Err(WaitError::Timeout));
        assert!(store.is_abandoned(&id));

        store.publish(id, result());
        assert_eq!(store.ready_count(), 1);
        assert_eq!(store.evict_expired(Duration::from_secs(60)), 0);
        assert_eq!(store.ready_count(), 1);
        assert_eq!(store.evict_expired(Duration::ZERO), 1);
        assert_eq!(store.try_take(&id), None);
    }

    #[tokio::test]
    async fn abandoned_waiting_slot_is_evicted() {
        let store = ResultStore::new();
        let id = Uuid::new_v4();
        let rx = store.subscribe(id);
        let got = store.wait(id, rx, Duration::from_millis(10)).await;
        assert_eq!(got, Err(WaitError::Timeout));

        assert_eq!(store.evict_expired(Duration::from_secs(60)), 1);
        assert_eq!(store.waiting_count(), 0);
        // 记录被清理后仍然视为已放弃，识别线程会跳过该任务
        assert!(store.is_abandoned(&id));
    }

    #[test]
    fn live_waiting_slot_survives_eviction() {
        let store = ResultStore::new();
        let id = Uuid::new_v4();
        let _rx = store.subscribe(id);
        assert_eq!(store.evict_expired(Duration::ZERO), 0);
        assert!(!store.is_abandoned(&id));
    }

    #[tokio::test]
    async fn close_all_waiting_wakes_waiters() {
        let store = ResultStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rx = store.subscribe(a);
        let _other = store.subscribe(b);
        store.publish(Uuid::new_v4(), result());

        assert_eq!(store.close_all_waiting(), 2);
        let got = store.wait(a, rx, Duration::from_secs(5)).await;
        assert_eq!(got, Err(WaitError::Closed));
        assert_eq!(store.waiting_count(), 0);
        assert_eq!(store.ready_count(), 1);
    }
}
