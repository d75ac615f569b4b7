//! Middleware which applies a timeout to a service call.
//!
//! The error returned on expiry is built from the configured duration, so the
//! caller can report how long it waited.

use std::time::Duration;

/// Layer to apply a timeout to calls, with a custom error type.
pub struct TimeoutLayer<E> {
    error: fn(Duration) -> E,
    timeout: Duration,
}

impl<E> TimeoutLayer<E> {
    /// Create a new `TimeoutLayer` with the provided error constructor and timeout.
    pub fn new(error: fn(Duration) -> E, timeout: Duration) -> Self {
        Self { error, timeout }
    }
}

impl<E> Clone for TimeoutLayer<E> {
    fn clone(&self) -> Self {
        Self {
            error: self.error,
            timeout: self.timeout,
        }
    }
}

impl<E> std::fmt::Debug for TimeoutLayer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutLayer")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S, E> tower::layer::Layer<S> for TimeoutLayer<E> {
    type Service = Timeout<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout::new(inner, self.timeout, self.error)
    }
}

/// Applies a timeout to calls, with a custom error type.
pub struct Timeout<S, E> {
    inner: S,
    timeout: Duration,
    error: fn(Duration) -> E,
}

impl<S, E> Timeout<S, E> {
    /// Create a new `Timeout` with the provided inner service, timeout, and error constructor.
    pub fn new(inner: S, timeout: Duration, error: fn(Duration) -> E) -> Self {
        Self {
            inner,
            timeout,
            error,
        }
    }
}

impl<S, E> Clone for Timeout<S, E>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            timeout: self.timeout,
            error: self.error,
        }
    }
}

impl<S, E> std::fmt::Debug for Timeout<S, E>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeout")
            .field("inner", &self.inner)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S, E, Req> tower::Service<Req> for Timeout<S, E>
where
    S: tower::Service<Req, Error = E>,
{
    type Response = S::Response;
    type Error = E;
    type Future = self::future::TimeoutFuture<S::Future, S::Response, E>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self::future::TimeoutFuture::new(self.inner.call(req), self.error, self.timeout)
    }
}

mod future {

    use std::{future::Future, marker::PhantomData, task::Poll, time::Duration};

    use pin_project::pin_project;

    #[derive(Debug)]
    #[pin_project]
    pub struct TimeoutFuture<F, R, E> {
        #[pin]
        inner: F,
        error: fn(Duration) -> E,
        duration: Duration,
        response: PhantomData<fn() -> R>,

        #[pin]
        timeout: tokio::time::Sleep,
    }

    impl<F, R, E> TimeoutFuture<F, R, E> {
        pub fn new(inner: F, error: fn(Duration) -> E, duration: Duration) -> Self {
            Self {
                inner,
                error,
                duration,
                response: PhantomData,
                timeout: tokio::time::sleep(duration),
            }
        }
    }

    impl<F, R, E> Future for TimeoutFuture<F, R, E>
    where
        F: Future<Output = Result<R, E>>,
    {
        type Output = Result<R, E>;

        fn poll(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> Poll<Self::Output> {
            let this = self.project();

            if let Poll::Ready(response) = this.inner.poll(cx) {
                return Poll::Ready(response);
            }

            match this.timeout.poll(cx) {
                Poll::Ready(()) => {
                    tracing::trace!(timeout = ?this.duration, "call timed out");
                    Poll::Ready(Err((this.error)(*this.duration)))
                }
                Poll::Pending => Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use tower::{service_fn, ServiceBuilder, ServiceExt as _};

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Failure {
        TimedOut(Duration),
    }

    #[tokio::test]
    async fn expires_slow_calls() {
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(Failure::TimedOut, Duration::from_millis(20)))
            .service(service_fn(|_: ()| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Failure>(())
            }));

        let result = service.oneshot(()).await;
        assert_eq!(result, Err(Failure::TimedOut(Duration::from_millis(20))));
    }

    fn never(_: Duration) -> Infallible {
        panic!("fast call timed out")
    }

    #[tokio::test]
    async fn passes_fast_calls() {
        let service = Timeout::new(
            service_fn(|value: u32| async move { Ok::<_, Infallible>(value + 1) }),
            Duration::from_secs(5),
            never,
        );

        assert_eq!(service.oneshot(41).await, Ok(42));
    }
}
