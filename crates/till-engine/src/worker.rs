//! # Background Worker
//!
//! Financial operations block on the database and must never run on the
//! caller's interactive thread. The worker runs them as tokio tasks and
//! hands the result back through a ticket or a callback.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Worker Hand-off                                │
//! │                                                                         │
//! │  UI thread                         tokio runtime                        │
//! │  ─────────                         ─────────────                        │
//! │                                                                         │
//! │  worker.submit(op) ──── spawn ───► op(engine).await                     │
//! │        │                                 │                              │
//! │        ▼                                 ▼                              │
//! │  Ticket<T> ◄────── oneshot ────── EngineResult<T>                       │
//! │   • try_take()      non-blocking poll from an event loop                │
//! │   • wait().await    from async code                                     │
//! │   • blocking_wait() from a plain thread                                 │
//! │                                                                         │
//! │  worker.submit_with(op, callback) runs callback(result) on the         │
//! │  runtime instead of returning a ticket.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations are never cancelled mid-flight: dropping a ticket only
//! discards the result, the transaction still commits or rolls back whole.

use std::future::Future;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::Engine;

/// Runs engine operations on a tokio runtime.
#[derive(Debug, Clone)]
pub struct Worker {
    engine: Engine,
    handle: Handle,
}

impl Worker {
    pub fn new(engine: Engine, handle: Handle) -> Self {
        Worker { engine, handle }
    }

    /// A worker on the runtime the caller is running in.
    ///
    /// ## Errors
    /// `Internal` when called outside a tokio runtime.
    pub fn on_current_runtime(engine: Engine) -> EngineResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| EngineError::Internal(format!("no tokio runtime: {}", e)))?;
        Ok(Worker::new(engine, handle))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs `op` in the background and returns a ticket for its result.
    pub fn submit<T, F, Fut>(&self, op: F) -> Ticket<T>
    where
        F: FnOnce(Engine) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let engine = self.engine.clone();

        self.handle.spawn(async move {
            let result = op(engine).await;
            if tx.send(result).is_err() {
                debug!("Ticket dropped before the result arrived");
            }
        });

        Ticket { rx: Some(rx) }
    }

    /// Runs `op` in the background and passes its result to `callback`.
    pub fn submit_with<T, F, Fut, C>(&self, op: F, callback: C)
    where
        F: FnOnce(Engine) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        C: FnOnce(EngineResult<T>) + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        self.handle.spawn(async move {
            callback(op(engine).await);
        });
    }
}

/// The pending result of a submitted operation.
#[derive(Debug)]
pub struct Ticket<T> {
    rx: Option<oneshot::Receiver<EngineResult<T>>>,
}

impl<T> Ticket<T> {
    /// The result if the operation has finished, `None` while it runs (or
    /// once the result has been taken).
    pub fn try_take(&mut self) -> Option<EngineResult<T>> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(result) => {
                self.rx = None;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.rx = None;
                Some(Err(task_lost()))
            }
        }
    }

    /// Waits for the result.
    pub async fn wait(self) -> EngineResult<T> {
        match self.rx {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(task_lost())),
            None => Err(result_taken()),
        }
    }

    /// Blocks the current thread until the result arrives.
    ///
    /// Must not be called from inside an async context.
    pub fn blocking_wait(self) -> EngineResult<T> {
        match self.rx {
            Some(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(task_lost())),
            None => Err(result_taken()),
        }
    }
}

fn task_lost() -> EngineError {
    EngineError::Internal("background task ended without a result".to_string())
}

fn result_taken() -> EngineError {
    EngineError::Internal("result already taken".to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_engine;
    use std::time::Duration;
    use till_core::Money;

    #[tokio::test]
    async fn test_submit_and_wait() {
        let (_dir, engine) = temp_engine().await;
        let worker = Worker::on_current_runtime(engine).unwrap();

        let ticket = worker.submit(|engine| async move {
            engine.sessions().open("U1", Money::from_cents(100)).await
        });
        let session = ticket.wait().await.unwrap();
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_errors_travel_through_ticket() {
        let (_dir, engine) = temp_engine().await;
        let worker = Worker::on_current_runtime(engine).unwrap();

        let ticket = worker.submit(|engine| async move { engine.sessions().close("missing", None).await });
        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_try_take_polls_without_blocking() {
        let (_dir, engine) = temp_engine().await;
        let worker = Worker::on_current_runtime(engine).unwrap();
        let (release, gate) = oneshot::channel::<()>();

        let mut ticket = worker.submit(|_engine| async move {
            let _ = gate.await;
            Ok(42)
        });
        assert!(ticket.try_take().is_none());

        release.send(()).unwrap();
        let result = loop {
            if let Some(result) = ticket.try_take() {
                break result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(result.unwrap(), 42);
        assert!(ticket.try_take().is_none());
    }

    #[tokio::test]
    async fn test_submit_with_callback() {
        let (_dir, engine) = temp_engine().await;
        let worker = Worker::on_current_runtime(engine).unwrap();
        let (tx, rx) = oneshot::channel();

        worker.submit_with(
            |engine| async move { engine.sessions().find_open_session().await },
            move |result| {
                let _ = tx.send(result.map(|s| s.is_none()));
            },
        );

        assert!(rx.await.unwrap().unwrap());
    }

    #[test]
    fn test_blocking_wait_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (_dir, engine) = runtime.block_on(temp_engine());
        let worker = Worker::new(engine, runtime.handle().clone());

        let ticket = worker.submit(|engine| async move {
            engine.sessions().open("U1", Money::from_cents(2500)).await
        });
        let session = ticket.blocking_wait().unwrap();
        assert_eq!(session.opening_balance_cents, 2500);
    }

    #[test]
    fn test_outside_runtime_is_internal_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (_dir, engine) = runtime.block_on(temp_engine());
        let err = Worker::on_current_runtime(engine).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
    }
}
