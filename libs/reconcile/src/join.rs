//! N-of-N asynchronous fan-in.
//!
//! A [`CountingJoin`] is created with the number of reports it expects. Each
//! participant calls [`succeed`](CountingJoin::succeed) or
//! [`fail`](CountingJoin::fail) exactly once, from any thread or task. After
//! the Nth report the completion fires exactly once: failure if any report
//! failed (keeping the first cause), success otherwise.
//!
//! ```text
//!   deploy a ──┐
//!   deploy b ──┼──> CountingJoin(3) ──> completion(Ok | Err(first cause))
//!   deploy c ──┘
//! ```
//!
//! Two ways out of a stuck join exist: [`expire`](CountingJoin::expire)
//! (usually driven by [`arm_deadline`](CountingJoin::arm_deadline)) forces a
//! failed completion, and dropping every handle before the Nth report
//! completes the join with [`JoinAbandoned`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

type Completion<E> = Box<dyn FnOnce(Result<(), E>) + Send>;

/// Reported when every handle of a join is dropped before it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAbandoned {
    pub expected: usize,
    pub reported: usize,
}

/// N-of-N fan-in synchronization primitive.
///
/// Cloning yields another handle to the same join.
pub struct CountingJoin<E: From<JoinAbandoned> + Send + 'static> {
    inner: Arc<Inner<E>>,
}

struct Inner<E: From<JoinAbandoned> + Send + 'static> {
    expected: usize,
    state: Mutex<State<E>>,
}

struct State<E> {
    reported: usize,
    first_failure: Option<E>,
    /// Taken when the join completes.
    on_complete: Option<Completion<E>>,
}

impl<E: From<JoinAbandoned> + Send + 'static> CountingJoin<E> {
    /// Creates a join expecting `expected` reports.
    ///
    /// With `expected == 0` the completion runs immediately with success.
    pub fn new<F>(expected: usize, on_complete: F) -> Self
    where
        F: FnOnce(Result<(), E>) + Send + 'static,
    {
        let pending: Option<Completion<E>> = if expected == 0 {
            on_complete(Ok(()));
            None
        } else {
            Some(Box::new(on_complete))
        };

        Self {
            inner: Arc::new(Inner {
                expected,
                state: Mutex::new(State {
                    reported: 0,
                    first_failure: None,
                    on_complete: pending,
                }),
            }),
        }
    }

    /// Creates a join whose completion is awaited through a future.
    pub fn channel(expected: usize) -> (Self, JoinCompletion<E>) {
        let (tx, rx) = oneshot::channel();
        let join = Self::new(expected, move |result| {
            let _ = tx.send(result);
        });
        (join, JoinCompletion { rx, expected })
    }

    /// Reports one successful participant.
    pub fn succeed(&self) {
        self.report(Ok(()));
    }

    /// Reports one failed participant.
    pub fn fail(&self, cause: E) {
        self.report(Err(cause));
    }

    /// Reports one participant's outcome. Ignored once the join has completed.
    pub fn report(&self, result: Result<(), E>) {
        let fire = {
            let mut state = self.inner.lock();
            if state.on_complete.is_none() {
                debug!(
                    expected = self.inner.expected,
                    "Ignoring report on completed join"
                );
                return;
            }

            state.reported += 1;
            if let Err(cause) = result {
                if state.first_failure.is_none() {
                    state.first_failure = Some(cause);
                }
            }

            if state.reported >= self.inner.expected {
                state.take_completion()
            } else {
                None
            }
        };

        if let Some((on_complete, outcome)) = fire {
            on_complete(outcome);
        }
    }

    /// Completes the join with a failure now, unless it already completed.
    ///
    /// A failure reported earlier takes precedence over `cause`.
    pub fn expire(&self, cause: E) {
        let fire = {
            let mut state = self.inner.lock();
            if state.on_complete.is_none() {
                return;
            }
            if state.first_failure.is_none() {
                state.first_failure = Some(cause);
            }
            state.take_completion()
        };

        if let Some((on_complete, outcome)) = fire {
            on_complete(outcome);
        }
    }

    /// Expires the join after `after` unless it completes first.
    ///
    /// Must be called from within a tokio runtime. The timer holds only a weak
    /// reference, so it never keeps an otherwise abandoned join alive.
    pub fn arm_deadline<F>(&self, after: Duration, cause: F)
    where
        F: FnOnce(Duration) -> E + Send + 'static,
    {
        let weak: Weak<Inner<E>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = weak.upgrade() {
                CountingJoin { inner }.expire(cause(after));
            }
        });
    }

    pub fn reported(&self) -> usize {
        self.inner.lock().reported
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().on_complete.is_none()
    }
}

impl<E: From<JoinAbandoned> + Send + 'static> Clone for CountingJoin<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: From<JoinAbandoned> + Send + 'static> std::fmt::Debug for CountingJoin<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingJoin")
            .field("expected", &self.inner.expected)
            .field("reported", &self.reported())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl<E: From<JoinAbandoned> + Send + 'static> Inner<E> {
    fn lock(&self) -> MutexGuard<'_, State<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> State<E> {
    fn take_completion(&mut self) -> Option<(Completion<E>, Result<(), E>)> {
        let on_complete = self.on_complete.take()?;
        let outcome = match self.first_failure.take() {
            Some(cause) => Err(cause),
            None => Ok(()),
        };
        Some((on_complete, outcome))
    }
}

impl<E: From<JoinAbandoned> + Send + 'static> Drop for Inner<E> {
    fn drop(&mut self) {
        let expected = self.expected;
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(on_complete) = state.on_complete.take() {
            let reported = state.reported;
            let cause = state
                .first_failure
                .take()
                .unwrap_or_else(|| E::from(JoinAbandoned { expected, reported }));
            on_complete(Err(cause));
        }
    }
}

/// Future resolving to a join's outcome.
pub struct JoinCompletion<E> {
    rx: oneshot::Receiver<Result<(), E>>,
    expected: usize,
}

impl<E: From<JoinAbandoned>> Future for JoinCompletion<E> {
    type Output = Result<(), E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let expected = self.expected;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The completion panicked before sending.
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(JoinAbandoned {
                expected,
                reported: 0,
            }))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use proptest::prelude::*;

    use super::*;
    use crate::ReconcileError;

    fn cause(i: usize) -> ReconcileError {
        ReconcileError::Internal(format!("cause-{}", i))
    }

    /// Join whose completions are counted and forwarded to a std channel.
    fn recording_join(
        expected: usize,
    ) -> (
        CountingJoin<ReconcileError>,
        Arc<AtomicUsize>,
        mpsc::Receiver<Result<(), ReconcileError>>,
    ) {
        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = Arc::clone(&fired);
        let join = CountingJoin::new(expected, move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });
        (join, fired, rx)
    }

    #[test]
    fn test_zero_completes_immediately() {
        let (join, fired, rx) = recording_join(0);
        assert!(join.is_complete());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_all_succeed() {
        let (join, fired, rx) = recording_join(3);
        join.succeed();
        join.succeed();
        assert!(!join.is_complete());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        join.succeed();
        assert_eq!(rx.recv().unwrap(), Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_failure_is_kept() {
        let (join, _, rx) = recording_join(3);
        join.succeed();
        join.fail(cause(1));
        join.fail(cause(2));
        assert_eq!(rx.recv().unwrap(), Err(cause(1)));
    }

    #[test]
    fn test_reports_after_completion_are_ignored() {
        let (join, fired, rx) = recording_join(1);
        join.succeed();
        join.fail(cause(9));
        join.succeed();
        assert_eq!(rx.recv().unwrap(), Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(join.reported(), 1);
    }

    #[test]
    fn test_expire_completes_with_cause() {
        let (join, fired, rx) = recording_join(2);
        join.succeed();
        join.expire(cause(7));
        join.succeed();
        assert_eq!(rx.recv().unwrap(), Err(cause(7)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expire_keeps_earlier_failure() {
        let (join, _, rx) = recording_join(3);
        join.fail(cause(1));
        join.expire(cause(7));
        assert_eq!(rx.recv().unwrap(), Err(cause(1)));
    }

    #[test]
    fn test_dropped_join_reports_abandonment() {
        let (join, fired, rx) = recording_join(2);
        join.succeed();
        drop(join);
        assert_eq!(
            rx.recv().unwrap(),
            Err(ReconcileError::Abandoned {
                expected: 2,
                reported: 1
            })
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_completion() {
        let (join, completion) = CountingJoin::<ReconcileError>::channel(2);
        let a = join.clone();
        let b = join.clone();
        drop(join);
        tokio::spawn(async move { a.succeed() });
        tokio::spawn(async move { b.fail(cause(3)) });
        assert_eq!(completion.await, Err(cause(3)));
    }

    #[tokio::test]
    async fn test_deadline_injects_timeout() {
        let (join, completion) = CountingJoin::<ReconcileError>::channel(2);
        join.succeed();
        join.arm_deadline(Duration::from_millis(20), |elapsed| ReconcileError::Timeout {
            stage: "deploying-components".to_string(),
            elapsed,
        });

        let outcome = completion.await;
        assert!(outcome.unwrap_err().is_timeout());

        // Late report from the hung participant is ignored.
        join.succeed();
        assert!(join.is_complete());
    }

    #[tokio::test]
    async fn test_deadline_after_completion_is_noop() {
        let (join, completion) = CountingJoin::<ReconcileError>::channel(1);
        join.arm_deadline(Duration::from_millis(10), |elapsed| ReconcileError::Timeout {
            stage: "test".to_string(),
            elapsed,
        });
        join.succeed();
        assert_eq!(completion.await, Ok(()));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn outcomes_in_order() -> impl Strategy<Value = (Vec<bool>, Vec<usize>)> {
        prop::collection::vec(any::<bool>(), 0..24).prop_flat_map(|outcomes| {
            let order: Vec<usize> = (0..outcomes.len()).collect();
            (Just(outcomes), Just(order).prop_shuffle())
        })
    }

    proptest! {
        #[test]
        fn prop_fires_once_with_first_cause((outcomes, order) in outcomes_in_order()) {
            let (join, fired, rx) = recording_join(outcomes.len());
            for &i in &order {
                if outcomes[i] {
                    join.succeed();
                } else {
                    join.fail(cause(i));
                }
            }

            prop_assert_eq!(fired.load(Ordering::SeqCst), 1);
            let expected = order
                .iter()
                .find(|&&i| !outcomes[i])
                .map_or(Ok(()), |&i| Err(cause(i)));
            prop_assert_eq!(rx.recv().unwrap(), expected);
        }

        #[test]
        fn prop_fires_once_across_threads(outcomes in prop::collection::vec(any::<bool>(), 1..16)) {
            let (join, fired, rx) = recording_join(outcomes.len());
            let handles: Vec<_> = outcomes
                .iter()
                .enumerate()
                .map(|(i, &ok)| {
                    let join = join.clone();
                    std::thread::spawn(move || {
                        if ok { join.succeed() } else { join.fail(cause(i)) }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            prop_assert_eq!(fired.load(Ordering::SeqCst), 1);
            let result = rx.recv().unwrap();
            prop_assert_eq!(result.is_err(), outcomes.iter().any(|ok| !ok));
        }
    }
}
