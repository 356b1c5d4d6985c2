use crate::Envelope;

/// Serves one kind of request.
///
/// `response` arrives addressed to the requester with the request's message
/// id already echoed, the handler fills its body and may redirect `to`.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &Envelope, response: &mut Envelope);
}

/// Adapts a plain closure into a `Handler`.
pub(super) struct FnHandler<F>(pub F);

#[async_trait::async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Envelope, &mut Envelope) + Send + Sync + 'static,
{
    async fn handle(&self, request: &Envelope, response: &mut Envelope) {
        (self.0)(request, response)
    }
}
