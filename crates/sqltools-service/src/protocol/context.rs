//! Reply and event handles given to handlers.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::{EventType, Message, RequestId, ServiceError, ServiceResult};

/// Queue feeding the host's output task.
#[derive(Clone, Debug)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl MessageSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    pub fn send(&self, message: Message) -> ServiceResult<()> {
        self.tx.send(message).map_err(|_| ServiceError::HostStopped)
    }

    pub fn send_event<P: Serialize>(&self, event: &EventType<P>, params: P) -> ServiceResult<()> {
        let params = serde_json::to_value(params)?;
        self.send(Message::event(event.method(), params))
    }
}

/// Lets event handlers and lifecycle callbacks emit events.
#[derive(Clone, Debug)]
pub struct EventContext {
    sender: MessageSender,
}

impl EventContext {
    pub(crate) fn new(sender: MessageSender) -> Self {
        Self { sender }
    }

    pub fn send_event<P: Serialize>(&self, event: &EventType<P>, params: P) -> ServiceResult<()> {
        self.sender.send_event(event, params)
    }
}

/// Error message sent when a request finishes without anyone replying.
pub const NO_REPLY_MESSAGE: &str = "request completed without a reply";

#[derive(Debug, Default)]
struct SlotState {
    replied: bool,
    handler_finished: bool,
    context_dropped: bool,
}

/// Reply bookkeeping for one incoming request, shared by its
/// [`RequestContext`] and the dispatch task.
///
/// The request is answered exactly once. If the handler has finished and the
/// context is gone without a reply, whichever side notices last sends a
/// `-32603` ResponseError.
#[derive(Debug)]
pub(crate) struct ReplySlot {
    id: RequestId,
    sender: MessageSender,
    state: Mutex<SlotState>,
}

impl ReplySlot {
    pub(crate) fn new(id: RequestId, sender: MessageSender) -> Arc<Self> {
        Arc::new(Self {
            id,
            sender,
            state: Mutex::new(SlotState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn is_replied(&self) -> bool {
        self.lock().replied
    }

    fn reply(&self, message: Message) -> ServiceResult<()> {
        let mut state = self.lock();
        if state.replied {
            tracing::debug!("Dropping second reply to {}", self.id);
            return Ok(());
        }
        state.replied = true;
        self.sender.send(message)
    }

    /// The handler returned `Ok`.
    pub(crate) fn handler_succeeded(&self) {
        let mut state = self.lock();
        state.handler_finished = true;
        if !state.replied && state.context_dropped {
            self.send_no_reply(&mut state);
        }
    }

    /// The handler failed. Returns false when a reply had already gone out.
    pub(crate) fn handler_failed(&self, error: &ServiceError) -> bool {
        let mut state = self.lock();
        state.handler_finished = true;
        if state.replied {
            return false;
        }
        state.replied = true;
        let _ = self
            .sender
            .send(Message::response_error(self.id.clone(), error.to_error_object()));
        true
    }

    fn context_dropped(&self) {
        let mut state = self.lock();
        state.context_dropped = true;
        if !state.replied && state.handler_finished {
            self.send_no_reply(&mut state);
        }
    }

    fn send_no_reply(&self, state: &mut SlotState) {
        tracing::warn!("Request {} completed without a reply", self.id);
        state.replied = true;
        let error = ServiceError::InternalError(NO_REPLY_MESSAGE.to_string());
        let _ = self
            .sender
            .send(Message::response_error(self.id.clone(), error.to_error_object()));
    }
}

/// The reply handle of one incoming request.
///
/// `send_result` and `send_error` consume the context, so a request gets at
/// most one reply. Events may be sent any number of times before that. A
/// context dropped without replying (after its handler finished) answers
/// the request with a `-32603` error.
pub struct RequestContext<R> {
    slot: Arc<ReplySlot>,
    _result: PhantomData<fn(R)>,
}

impl<R: Serialize> RequestContext<R> {
    pub(crate) fn new(slot: Arc<ReplySlot>) -> Self {
        Self {
            slot,
            _result: PhantomData,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.slot.id
    }

    pub fn send_result(self, result: R) -> ServiceResult<()> {
        let id = self.slot.id.clone();
        let message = match serde_json::to_value(result) {
            Ok(value) => Message::response(id, value),
            Err(e) => {
                let error = ServiceError::InternalError(format!("failed to serialize result: {e}"));
                Message::response_error(id, error.to_error_object())
            }
        };
        self.slot.reply(message)
    }

    pub fn send_error(self, error: ServiceError) -> ServiceResult<()> {
        self.slot.reply(Message::response_error(
            self.slot.id.clone(),
            error.to_error_object(),
        ))
    }

    pub fn send_event<P: Serialize>(&self, event: &EventType<P>, params: P) -> ServiceResult<()> {
        self.slot.sender.send_event(event, params)
    }

    /// An event handle that outlives this context.
    pub fn events(&self) -> EventContext {
        EventContext::new(self.slot.sender.clone())
    }
}

impl<R> Drop for RequestContext<R> {
    fn drop(&mut self) {
        self.slot.context_dropped();
    }
}

impl<R> std::fmt::Debug for RequestContext<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.slot.id)
            .field("replied", &self.slot.is_replied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;
    use serde_json::json;

    const PROGRESS: EventType<u32> = EventType::new("test/progress");

    fn context<R: Serialize>() -> (RequestContext<R>, mpsc::UnboundedReceiver<Message>, Arc<ReplySlot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = ReplySlot::new("r1".into(), MessageSender::new(tx));
        (RequestContext::new(slot.clone()), rx, slot)
    }

    fn assert_no_reply_error(message: &Message) {
        assert_eq!(message.message_type(), MessageType::ResponseError);
        assert_eq!(message.id(), Some(&RequestId::from("r1")));
        let error = message.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert!(error.message.contains(NO_REPLY_MESSAGE));
    }

    #[test]
    fn test_events_then_result() {
        let (ctx, mut rx, slot) = context::<String>();
        ctx.send_event(&PROGRESS, 1).unwrap();
        ctx.events().send_event(&PROGRESS, 2).unwrap();
        ctx.send_result("done".to_string()).unwrap();
        slot.handler_succeeded();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.message_type(), MessageType::Event);
        assert_eq!(first.contents(), &json!(1));
        assert_eq!(rx.try_recv().unwrap().contents(), &json!(2));

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.id(), Some(&RequestId::from("r1")));
        assert_eq!(reply.contents(), &json!("done"));
        assert!(slot.is_replied());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_error() {
        let (ctx, mut rx, slot) = context::<()>();
        ctx.send_error(ServiceError::handler(12, "nope")).unwrap();

        let reply = rx.try_recv().unwrap();
        let error = reply.error_object().unwrap();
        assert_eq!(error.code, 12);
        assert_eq!(error.message, "nope");
        assert!(slot.is_replied());
    }

    #[test]
    fn test_closed_queue_reports_stopped() {
        let (ctx, rx, _) = context::<()>();
        drop(rx);
        assert!(matches!(ctx.send_result(()), Err(ServiceError::HostStopped)));
    }

    #[test]
    fn test_dropped_before_handler_finishes() {
        let (ctx, mut rx, slot) = context::<()>();
        drop(ctx);
        assert!(rx.try_recv().is_err());

        slot.handler_succeeded();
        assert_no_reply_error(&rx.try_recv().unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detached_context_dropped_later() {
        let (ctx, mut rx, slot) = context::<()>();
        slot.handler_succeeded();
        assert!(rx.try_recv().is_err(), "a live context may still reply");

        drop(ctx);
        assert_no_reply_error(&rx.try_recv().unwrap());
    }

    #[test]
    fn test_failed_handler_wins_over_later_reply() {
        let (ctx, mut rx, slot) = context::<u32>();
        assert!(slot.handler_failed(&ServiceError::handler(5, "failed")));
        assert_eq!(rx.try_recv().unwrap().error_object().unwrap().code, 5);

        ctx.send_result(1).unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!slot.handler_failed(&ServiceError::RequestCancelled));
    }
}
