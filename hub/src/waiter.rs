use common::model::TaskResult;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Async-result to sync-HTTP bridge.
///
/// Maps a trace id to the delivery slots of every HTTP handler currently
/// blocked on it. Requests collapsed onto one trace all wake from a single
/// completion. Each slot is a buffer-1 channel written with a non-blocking
/// send; a handler that already left (timeout, cancel) has unregistered and
/// is simply skipped.
#[derive(Default)]
pub struct ResultWaiter {
    waiters: DashMap<String, Vec<mpsc::Sender<TaskResult>>>,
}

impl ResultWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a delivery slot for `trace_id`. The returned guard
    /// unregisters itself on drop, so every exit path of a waiting handler
    /// cleans up exactly once.
    pub fn register(&self, trace_id: &str) -> WaiterSlot<'_> {
        let (tx, rx) = mpsc::channel(1);
        self.waiters
            .entry(trace_id.to_string())
            .or_default()
            .push(tx.clone());
        WaiterSlot {
            waiter: self,
            trace_id: trace_id.to_string(),
            tx,
            rx,
        }
    }

    /// Delivers `result` to every slot registered for `trace_id` and clears
    /// the entry.
    pub fn notify(&self, trace_id: &str, result: &TaskResult) {
        let slots = match self.waiters.remove(trace_id) {
            Some((_, slots)) => slots,
            None => return,
        };
        for slot in slots {
            // Buffer 1 and a fresh slot list make this effectively
            // infallible; a full or closed slot belongs to a leaver.
            let _ = slot.try_send(result.clone());
        }
    }

    fn unregister(&self, trace_id: &str, tx: &mpsc::Sender<TaskResult>) {
        if let Some(mut slots) = self.waiters.get_mut(trace_id) {
            slots.retain(|s| !s.same_channel(tx));
        }
        self.waiters.remove_if(trace_id, |_, slots| slots.is_empty());
    }

    /// Number of traces with at least one blocked caller.
    pub fn waiting_traces(&self) -> usize {
        self.waiters.len()
    }
}

/// One handler's registration. Dropping it removes the slot.
pub struct WaiterSlot<'a> {
    waiter: &'a ResultWaiter,
    trace_id: String,
    tx: mpsc::Sender<TaskResult>,
    rx: mpsc::Receiver<TaskResult>,
}

impl WaiterSlot<'_> {
    pub async fn recv(&mut self) -> Option<TaskResult> {
        self.rx.recv().await
    }
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        self.waiter.unregister(&self.trace_id, &self.tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_for(trace_id: &str) -> TaskResult {
        TaskResult {
            trace_id: trace_id.to_string(),
            node_id: "n-1".into(),
            success: true,
            actual_gp: 420,
            archive_url: Some("https://a/2.zip".into()),
            error: None,
        }
    }

    #[tokio::test]
    async fn all_collapsed_waiters_wake_together() {
        let waiter = ResultWaiter::new();
        let mut a = waiter.register("t-1");
        let mut b = waiter.register("t-1");

        waiter.notify("t-1", &result_for("t-1"));

        assert_eq!(a.recv().await.unwrap().actual_gp, 420);
        assert_eq!(b.recv().await.unwrap().actual_gp, 420);
    }

    #[tokio::test]
    async fn notify_clears_the_entry() {
        let waiter = ResultWaiter::new();
        let _slot = waiter.register("t-1");
        assert_eq!(waiter.waiting_traces(), 1);

        waiter.notify("t-1", &result_for("t-1"));
        assert_eq!(waiter.waiting_traces(), 0);
    }

    #[tokio::test]
    async fn dropped_slot_unregisters_without_disturbing_others() {
        let waiter = ResultWaiter::new();
        let mut survivor = waiter.register("t-1");
        {
            let _leaver = waiter.register("t-1");
        }

        waiter.notify("t-1", &result_for("t-1"));
        assert!(survivor.recv().await.is_some());
        assert_eq!(waiter.waiting_traces(), 0);
    }

    #[tokio::test]
    async fn last_drop_removes_the_map_entry() {
        let waiter = ResultWaiter::new();
        {
            let _slot = waiter.register("t-1");
        }
        assert_eq!(waiter.waiting_traces(), 0);
    }

    #[tokio::test]
    async fn notify_without_waiters_is_a_noop() {
        let waiter = ResultWaiter::new();
        waiter.notify("t-unknown", &result_for("t-unknown"));
        assert_eq!(waiter.waiting_traces(), 0);
    }
}
