//! Intake middleware.
//!
//! An [`IntakeHandler`] receives one request at a time from the engine, with a
//! cancellation token and a response collection. Handlers compose with
//! [`and_then`](IntakeHandler::and_then) into a [`Chain`]; each one returns a
//! [`Flow`] saying whether the rest of the chain should see the request.

use scout_core::{BoxError, Request, Responses};
use std::{future::Future, pin::Pin, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Everything a middleware sees for one request.
#[derive(Debug, Clone)]
pub struct IntakeContext {
    /// Cancelled when the engine abandons in-flight work.
    pub cancel: CancellationToken,
    /// The request being handled.
    pub request: Request,
    /// Where handlers record what they discovered.
    pub responses: Arc<Responses>,
}

impl IntakeContext {
    /// A context with a fresh response collection.
    pub fn new(request: Request, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            request,
            responses: Arc::new(Responses::new()),
        }
    }
}

/// Whether a request continues down a middleware chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
    /// Hand the request to the next middleware.
    #[default]
    Next,
    /// The request is finished; later middleware is skipped.
    Stop,
}

impl From<()> for Flow {
    fn from((): ()) -> Self {
        Flow::Next
    }
}

/// Middleware the intake engine drives for every request.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot handle intake requests",
    label = "missing `IntakeHandler` implementation",
    note = "Intake handlers must implement `handle(&self, &IntakeContext)`."
)]
pub trait IntakeHandler: Send + Sync + 'static {
    /// Handle one request. Errors are logged by the engine, never propagated.
    fn handle(&self, ctx: &IntakeContext) -> impl Future<Output = Result<Flow, BoxError>> + Send;

    /// Run `next` after this handler, on the same request and responses.
    ///
    /// The chain stops at the first error or [`Flow::Stop`].
    fn and_then<B>(self, next: B) -> Chain<Self, B>
    where
        Self: Sized,
        B: IntakeHandler,
    {
        Chain {
            first: self,
            second: next,
        }
    }
}

/// Dynamic object-safe version of [`IntakeHandler`].
pub trait DynIntakeHandler: Send + Sync + 'static {
    /// Handle one request (dynamic dispatch version).
    fn handle_dyn<'a>(
        &'a self,
        ctx: &'a IntakeContext,
    ) -> Pin<Box<dyn Future<Output = Result<Flow, BoxError>> + Send + 'a>>;
}

impl<T: IntakeHandler> DynIntakeHandler for T {
    fn handle_dyn<'a>(
        &'a self,
        ctx: &'a IntakeContext,
    ) -> Pin<Box<dyn Future<Output = Result<Flow, BoxError>> + Send + 'a>> {
        Box::pin(self.handle(ctx))
    }
}

/// Closures may return `()` (continue) or a [`Flow`].
impl<F, Fut, R> IntakeHandler for F
where
    F: Fn(IntakeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send,
    R: Into<Flow>,
{
    fn handle(&self, ctx: &IntakeContext) -> impl Future<Output = Result<Flow, BoxError>> + Send {
        let fut = (self)(ctx.clone());
        async move { fut.await.map(Into::into) }
    }
}

/// Two handlers run in sequence.
pub struct Chain<A, B> {
    pub(crate) first: A,
    pub(crate) second: B,
}

impl<A: IntakeHandler, B: IntakeHandler> IntakeHandler for Chain<A, B> {
    async fn handle(&self, ctx: &IntakeContext) -> Result<Flow, BoxError> {
        match self.first.handle(ctx).await? {
            Flow::Next => self.second.handle(ctx).await,
            Flow::Stop => Ok(Flow::Stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestAsset;
    use scout_core::SessionId;
    use std::sync::Mutex;

    fn ctx() -> IntakeContext {
        IntakeContext::new(
            Request::new(SessionId::new(), TestAsset::fqdn("a.example")),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let step = |tag: &'static str| {
            let log = log.clone();
            move |ctx: IntakeContext| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((tag, ctx.request.asset.key()));
                    Ok::<(), BoxError>(())
                }
            }
        };

        let flow = step("a").and_then(step("b")).handle(&ctx()).await.unwrap();
        assert_eq!(flow, Flow::Next);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", "a.example".to_string()), ("b", "a.example".to_string())]
        );
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_error() {
        let reached = Arc::new(Mutex::new(false));
        let flag = reached.clone();
        let chain = (|_ctx: IntakeContext| async { Err::<(), BoxError>("stop".into()) }).and_then(
            move |_ctx: IntakeContext| {
                let flag = flag.clone();
                async move {
                    *flag.lock().unwrap() = true;
                    Ok::<(), BoxError>(())
                }
            },
        );

        let err = chain.handle(&ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "stop");
        assert!(!*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn test_chain_stops_without_error() {
        let reached = Arc::new(Mutex::new(false));
        let flag = reached.clone();
        let chain = (|_ctx: IntakeContext| async { Ok::<Flow, BoxError>(Flow::Stop) })
            .and_then(move |_ctx: IntakeContext| {
                let flag = flag.clone();
                async move {
                    *flag.lock().unwrap() = true;
                    Ok::<(), BoxError>(())
                }
            });

        assert_eq!(chain.handle(&ctx()).await.unwrap(), Flow::Stop);
        assert!(!*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn test_dyn_handler_shares_responses() {
        let handler: Arc<dyn DynIntakeHandler> = Arc::new(|ctx: IntakeContext| async move {
            ctx.responses.push(scout_core::Response::new(
                ctx.request.asset.clone(),
                "self",
                ctx.request.asset.clone(),
            ));
            Ok::<(), BoxError>(())
        });
        let ctx = ctx();
        handler.handle_dyn(&ctx).await.unwrap();
        assert_eq!(ctx.responses.len(), 1);
    }
}
