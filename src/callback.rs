//! One-shot completion callbacks which cannot be lost.

use futures::FutureExt;
use std::future::Future;

/// Creates a callback and the future it resolves.
///
/// If the callback is dropped without being called, the future resolves to
/// `fallback()`.
pub(crate) fn oneshot<T: Send + 'static>(
    fallback: fn() -> T,
) -> (impl FnOnce(T) + Send + 'static, impl Future<Output = T>) {
    let (tx, rx) = flume::bounded(1);

    (
        move |val| drop(tx.send(val)),
        rx.into_recv_async()
            .map(move |res| res.unwrap_or_else(|_| fallback())),
    )
}

/// A caller-supplied callback which is guaranteed to run exactly once.
///
/// If a `Completion` is dropped before [`complete`] is called (for instance, because
/// the message carrying it could not be delivered, or its owner was torn down), the
/// callback is invoked with the fallback value instead. Callers can therefore never
/// be left waiting on a callback which will not fire.
///
/// [`complete`]: Completion::complete
pub(crate) struct Completion<T> {
    callback: Option<Box<dyn FnOnce(T) + Send>>,
    fallback: fn() -> T,
}

impl<T: 'static> Completion<T> {
    pub(crate) fn new<F>(callback: F, fallback: fn() -> T) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            fallback,
        }
    }

    pub(crate) fn complete(mut self, val: T) {
        if let Some(callback) = self.callback.take() {
            callback(val);
        }
    }

    /// Wraps this completion so that it accepts a value of another type.
    ///
    /// Dropping the returned completion resolves it with `fallback`, which is then
    /// passed through `map` as normal.
    pub(crate) fn adapt<U, F>(mut self, map: F, fallback: fn() -> U) -> Completion<U>
    where
        U: 'static,
        F: FnOnce(U) -> T + Send + 'static,
    {
        let callback = self.callback.take();
        Completion::new(
            move |val| {
                if let Some(callback) = callback {
                    callback(map(val));
                }
            },
            fallback,
        )
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback((self.fallback)());
        }
    }
}
