//! Single-assignment promises.
//!
//! A [`Deferred`] is the producer half: it is settled exactly once, with a
//! value or a [`NetError`]. The matching [`Promise`] is the consumer half and
//! can be consumed one of three ways:
//!
//! - awaited as a [`Future`] (the usual path for callers on a runtime),
//! - chained with [`Promise::when_settled`], which runs the continuation
//!   synchronously if the promise is already settled (the pool and the
//!   handshake controller settle promises from reactor callbacks and need to
//!   chain follow-up work without a runtime in between),
//! - drained non-blockingly with [`Promise::try_take`].
//!
//! Dropping a `Deferred` that was never settled rejects the promise with
//! [`NetError::ConnectionAborted`], so abandoned operations cannot strand
//! their consumers.

use crate::base::neterror::NetError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

type SettleFn<T> = Box<dyn FnOnce(Result<T, NetError>) + Send>;

enum State<T> {
    Pending {
        waker: Option<Waker>,
        callback: Option<SettleFn<T>>,
    },
    /// `None` once the result has been handed to a consumer.
    Settled(Option<Result<T, NetError>>),
}

/// Producer half; settle it once with [`resolve`](Deferred::resolve) or
/// [`reject`](Deferred::reject).
pub struct Deferred<T> {
    state: Arc<Mutex<State<T>>>,
}

/// Consumer half of a [`Deferred`].
pub struct Promise<T> {
    state: Arc<Mutex<State<T>>>,
}

/// Create a linked deferred/promise pair.
pub fn promise<T>() -> (Deferred<T>, Promise<T>) {
    let state = Arc::new(Mutex::new(State::Pending { waker: None, callback: None }));
    (Deferred { state: Arc::clone(&state) }, Promise { state })
}

impl<T> Deferred<T> {
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(self, error: NetError) {
        self.settle(Err(error));
    }

    fn settle(&self, result: Result<T, NetError>) {
        let mut woken = None;
        let mut invoke = None;
        {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Settled(None)) {
                State::Pending { waker, callback } => {
                    woken = waker;
                    match callback {
                        Some(callback) => invoke = Some((callback, result)),
                        None => *state = State::Settled(Some(result)),
                    }
                }
                // A second settle is a no-op; the first result wins.
                settled => *state = settled,
            }
        }
        if let Some(waker) = woken {
            waker.wake();
        }
        if let Some((callback, result)) = invoke {
            callback(result);
        }
    }
}

impl<T> Drop for Deferred<T> {
    fn drop(&mut self) {
        self.settle(Err(NetError::ConnectionAborted));
    }
}

impl<T> Promise<T> {
    /// A promise that is already resolved.
    pub fn resolved(value: T) -> Self {
        Promise { state: Arc::new(Mutex::new(State::Settled(Some(Ok(value))))) }
    }

    /// A promise that is already rejected.
    pub fn rejected(error: NetError) -> Self {
        Promise { state: Arc::new(Mutex::new(State::Settled(Some(Err(error))))) }
    }

    /// Take the result if the promise has settled. Never blocks.
    pub fn try_take(&self) -> Option<Result<T, NetError>> {
        match &mut *self.state.lock().unwrap() {
            State::Settled(result) => result.take(),
            State::Pending { .. } => None,
        }
    }

    /// Run `callback` once the promise settles. If it already has, the
    /// callback runs immediately on the calling thread.
    pub fn when_settled(self, callback: impl FnOnce(Result<T, NetError>) + Send + 'static) {
        let boxed: SettleFn<T> = Box::new(callback);
        let mut invoke = None;
        {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Pending { callback, .. } => *callback = Some(boxed),
                State::Settled(result) => {
                    if let Some(result) = result.take() {
                        invoke = Some((boxed, result));
                    }
                }
            }
        }
        if let Some((callback, result)) = invoke {
            callback(result);
        }
    }
}

impl<T> Future for Promise<T> {
    type Output = Result<T, NetError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Settled(result) => match result.take() {
                Some(result) => Poll::Ready(result),
                // Result was consumed through another path; stay pending.
                None => Poll::Pending,
            },
            State::Pending { waker, .. } => {
                *waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
