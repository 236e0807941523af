//! Scoped background-execution requests.
//!
//! Before dispatching an inline reply the router asks the host to keep the
//! process alive ([`BackgroundExecution::begin_background_task`]) and
//! releases that request when the send finishes. The host may also expire
//! the request on its own. [`BackgroundTask`] makes sure the host sees
//! exactly one `end_background_task` call for each `begin`, whichever of
//! completion, expiration or drop comes first.

use std::sync::{Arc, Mutex};

/// Host-assigned identifier of a background-execution request.
pub type BackgroundTaskId = u64;

/// Callback the host invokes when it expires a request.
pub type ExpirationHandler = Box<dyn FnOnce() + Send>;

/// Host facility that can postpone process suspension.
pub trait BackgroundExecution: Send + Sync {
    /// Ask the host not to suspend the process until the returned id is ended.
    ///
    /// The host calls `on_expiration` if it runs out of patience first.
    fn begin_background_task(&self, on_expiration: ExpirationHandler) -> BackgroundTaskId;

    /// Release a request previously returned by `begin_background_task`.
    fn end_background_task(&self, id: BackgroundTaskId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    /// `begin` has not returned yet.
    Pending,
    Active(BackgroundTaskId),
    /// Released, or expired before `begin` returned.
    Released,
}

struct Inner {
    host: Arc<dyn BackgroundExecution>,
    state: Mutex<TaskState>,
}

impl Inner {
    fn release(&self) {
        let previous = match self.state.lock() {
            Ok(mut state) => std::mem::replace(&mut *state, TaskState::Released),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), TaskState::Released),
        };
        if let TaskState::Active(id) = previous {
            self.host.end_background_task(id);
            log::debug!("[Background] Released task {id}");
        }
    }
}

/// A live background-execution request. Released on [`BackgroundTask::release`]
/// or on drop, at most once.
pub struct BackgroundTask {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("state", &self.inner.state.lock().map(|s| *s).ok())
            .finish()
    }
}

impl BackgroundTask {
    /// Begin a request on `host`.
    pub fn begin(host: Arc<dyn BackgroundExecution>) -> Self {
        let inner = Arc::new(Inner {
            host: Arc::clone(&host),
            state: Mutex::new(TaskState::Pending),
        });

        let on_expiration = {
            let inner = Arc::clone(&inner);
            Box::new(move || {
                log::debug!("[Background] Host expired task");
                inner.release();
            }) as ExpirationHandler
        };
        let id = host.begin_background_task(on_expiration);

        let expired_early = match inner.state.lock() {
            Ok(mut state) => {
                if *state == TaskState::Pending {
                    *state = TaskState::Active(id);
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        };
        if expired_early {
            // Expiration ran inside `begin`, before the id was known.
            host.end_background_task(id);
        }

        Self { inner }
    }

    /// Release the request now. Later calls, expirations and the drop are no-ops.
    pub fn release(&self) {
        self.inner.release();
    }

    /// Whether the request has been released (or expired).
    pub fn is_released(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| *state == TaskState::Released)
            .unwrap_or(true)
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Host with no suspension model; every request is a no-op.
#[derive(Debug, Default)]
pub struct NoopBackgroundExecution;

impl BackgroundExecution for NoopBackgroundExecution {
    fn begin_background_task(&self, _on_expiration: ExpirationHandler) -> BackgroundTaskId {
        0
    }

    fn end_background_task(&self, _id: BackgroundTaskId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Records begin/end calls and keeps expiration handlers for the test to fire.
    #[derive(Default)]
    struct RecordingHost {
        next_id: AtomicU64,
        ended: Mutex<Vec<BackgroundTaskId>>,
        handlers: Mutex<Vec<ExpirationHandler>>,
        expire_immediately: bool,
    }

    impl RecordingHost {
        fn expire_all(&self) {
            let handlers: Vec<_> = self.handlers.lock().unwrap().drain(..).collect();
            for handler in handlers {
                handler();
            }
        }

        fn ended(&self) -> Vec<BackgroundTaskId> {
            self.ended.lock().unwrap().clone()
        }
    }

    impl BackgroundExecution for RecordingHost {
        fn begin_background_task(&self, on_expiration: ExpirationHandler) -> BackgroundTaskId {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            if self.expire_immediately {
                on_expiration();
            } else {
                self.handlers.lock().unwrap().push(on_expiration);
            }
            id
        }

        fn end_background_task(&self, id: BackgroundTaskId) {
            self.ended.lock().unwrap().push(id);
        }
    }

    #[test]
    fn test_release_twice_ends_once() {
        let host = Arc::new(RecordingHost::default());
        let task = BackgroundTask::begin(Arc::clone(&host) as Arc<dyn BackgroundExecution>);

        task.release();
        task.release();
        drop(task);

        assert_eq!(host.ended(), vec![1]);
    }

    #[test]
    fn test_expiration_then_completion_ends_once() {
        let host = Arc::new(RecordingHost::default());
        let task = BackgroundTask::begin(Arc::clone(&host) as Arc<dyn BackgroundExecution>);

        host.expire_all();
        assert!(task.is_released());
        task.release();
        drop(task);

        assert_eq!(host.ended(), vec![1]);
    }

    #[test]
    fn test_drop_without_completion_ends_once() {
        let host = Arc::new(RecordingHost::default());
        let task = BackgroundTask::begin(Arc::clone(&host) as Arc<dyn BackgroundExecution>);
        assert!(!task.is_released());
        drop(task);
        host.expire_all();

        assert_eq!(host.ended(), vec![1]);
    }

    #[test]
    fn test_expiration_during_begin_ends_once() {
        let host = Arc::new(RecordingHost {
            expire_immediately: true,
            ..RecordingHost::default()
        });
        let task = BackgroundTask::begin(Arc::clone(&host) as Arc<dyn BackgroundExecution>);

        assert!(task.is_released());
        task.release();
        drop(task);

        assert_eq!(host.ended(), vec![1]);
    }

    #[test]
    fn test_independent_tasks() {
        let host = Arc::new(RecordingHost::default());
        let first = BackgroundTask::begin(Arc::clone(&host) as Arc<dyn BackgroundExecution>);
        let second = BackgroundTask::begin(Arc::clone(&host) as Arc<dyn BackgroundExecution>);

        second.release();
        first.release();

        assert_eq!(host.ended(), vec![2, 1]);
    }
}
