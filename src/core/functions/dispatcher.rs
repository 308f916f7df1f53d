use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ticket::FunctionCallTicket;
use crate::core::link::LinkResult;
use crate::core::protocol::{FunctionCallDescriptor, FunctionCallOutcome, FunctionCallResponse};

/// Sent when a handler finishes without responding or returning a value.
pub const DEFAULT_NO_RESPONSE_ERROR: &str = "Function handler completed without sending a response";

/// Sent when a call arrives and no handler is registered.
pub const NO_HANDLER_ERROR: &str = "No function call handler registered";

/// Future returned by a function call handler.
///
/// `Ok(Some(value))` becomes the result, `Ok(None)` means the handler used
/// (or forgot to use) its [`FunctionResponder`], `Err(message)` becomes an
/// error response.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Option<Value>, String>> + Send>>;

/// Host-side function call handler.
pub type FunctionCallHandler =
    Arc<dyn Fn(FunctionCallRequest, FunctionResponder) -> HandlerFuture + Send + Sync>;

/// Where responses go; the agent link in a running session.
pub trait ResponseSink: Send + Sync {
    fn send_response(&self, response: FunctionCallResponse) -> LinkResult<()>;
}

/// A client-side function call handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    pub id: String,
    pub name: String,
    /// Parsed arguments; `Null` when the server sent invalid JSON
    pub arguments: Value,
    pub raw_arguments: String,
}

impl FunctionCallRequest {
    fn from_descriptor(descriptor: &FunctionCallDescriptor) -> Self {
        let arguments = if descriptor.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&descriptor.arguments).unwrap_or_else(|e| {
                warn!(call_id = %descriptor.id, "Function arguments are not valid JSON: {}", e);
                Value::Null
            })
        };
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            arguments,
            raw_arguments: descriptor.arguments.clone(),
        }
    }
}

/// Lets a handler answer its call explicitly. Only the first response for a
/// ticket is sent, whoever sends it.
#[derive(Clone)]
pub struct FunctionResponder {
    ticket: Arc<FunctionCallTicket>,
    sink: Arc<dyn ResponseSink>,
}

impl FunctionResponder {
    /// Sends `outcome` unless the call was already answered. Returns whether
    /// this call sent it.
    pub fn respond(&self, outcome: FunctionCallOutcome) -> bool {
        if !self.ticket.try_resolve() {
            debug!(call_id = %self.ticket.id(), "Ignoring response for resolved function call");
            return false;
        }

        let response = FunctionCallResponse::new(self.ticket.id(), self.ticket.name(), &outcome);
        match self.sink.send_response(response) {
            Ok(()) => {
                info!(
                    call_id = %self.ticket.id(),
                    function = %self.ticket.name(),
                    error = outcome.is_error(),
                    "Function call response sent"
                );
            }
            Err(e) => {
                warn!(call_id = %self.ticket.id(), "Failed to send function call response: {}", e);
            }
        }
        true
    }

    pub fn respond_ok(&self, result: Value) -> bool {
        self.respond(FunctionCallOutcome::Result(result))
    }

    pub fn respond_err(&self, message: impl Into<String>) -> bool {
        self.respond(FunctionCallOutcome::Error(message.into()))
    }

    pub fn is_responded(&self) -> bool {
        self.ticket.is_responded()
    }

    pub fn call_id(&self) -> &str {
        self.ticket.id()
    }
}

/// What [`FunctionCallDispatcher::dispatch`] did with a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// The server runs this call itself
    ServerSide,
    /// A call with this id is still pending
    Duplicate,
    /// Answered immediately with [`NO_HANDLER_ERROR`]
    NoHandler,
}

/// Routes client-side function calls to the host handler and guarantees a
/// single response per call id.
pub struct FunctionCallDispatcher {
    handler: RwLock<Option<FunctionCallHandler>>,
    tickets: Arc<DashMap<String, Arc<FunctionCallTicket>>>,
    sink: Arc<dyn ResponseSink>,
    timeout: Duration,
}

impl FunctionCallDispatcher {
    pub fn new(sink: Arc<dyn ResponseSink>, timeout: Duration) -> Self {
        Self {
            handler: RwLock::new(None),
            tickets: Arc::new(DashMap::new()),
            sink,
            timeout,
        }
    }

    pub fn set_handler(&self, handler: FunctionCallHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    pub fn pending_count(&self) -> usize {
        self.tickets.len()
    }

    /// Dispatches every call of one `FunctionCallRequest` message.
    pub fn dispatch_all(&self, descriptors: &[FunctionCallDescriptor]) -> Vec<DispatchOutcome> {
        descriptors.iter().map(|d| self.dispatch(d)).collect()
    }

    /// Hands one call to the handler. Must be called from within a tokio
    /// runtime.
    pub fn dispatch(&self, descriptor: &FunctionCallDescriptor) -> DispatchOutcome {
        if !descriptor.client_side {
            debug!(call_id = %descriptor.id, function = %descriptor.name, "Server-side function call, not dispatching");
            return DispatchOutcome::ServerSide;
        }

        let ticket = Arc::new(FunctionCallTicket::new(
            descriptor.id.as_str(),
            descriptor.name.as_str(),
            Instant::now() + self.timeout,
        ));
        match self.tickets.entry(descriptor.id.clone()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_responded() {
                    warn!(call_id = %descriptor.id, "Duplicate function call id while pending, ignoring");
                    return DispatchOutcome::Duplicate;
                }
                existing.insert(ticket.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(ticket.clone());
            }
        }

        let responder = FunctionResponder {
            ticket: ticket.clone(),
            sink: self.sink.clone(),
        };

        let Some(handler) = self.handler.read().clone() else {
            warn!(call_id = %descriptor.id, function = %descriptor.name, "No function call handler registered");
            responder.respond_err(NO_HANDLER_ERROR);
            remove_ticket(&self.tickets, &ticket);
            return DispatchOutcome::NoHandler;
        };

        info!(call_id = %descriptor.id, function = %descriptor.name, "Dispatching function call");
        let request = FunctionCallRequest::from_descriptor(descriptor);

        let future = match catch_unwind(AssertUnwindSafe(|| handler(request, responder.clone()))) {
            Ok(future) => future,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(call_id = %descriptor.id, "Function call handler panicked: {}", message);
                responder.respond_err(message);
                remove_ticket(&self.tickets, &ticket);
                return DispatchOutcome::Dispatched;
            }
        };

        let tickets = self.tickets.clone();
        let task_ticket = ticket.clone();
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            let outcome = tokio::time::timeout_at(
                task_ticket.deadline(),
                AssertUnwindSafe(future).catch_unwind(),
            )
            .await;

            match outcome {
                Ok(Ok(Ok(Some(value)))) => {
                    responder.respond_ok(value);
                }
                Ok(Ok(Ok(None))) => {
                    if !responder.is_responded() {
                        warn!(call_id = %task_ticket.id(), "Function handler finished without responding");
                    }
                    responder.respond_err(DEFAULT_NO_RESPONSE_ERROR);
                }
                Ok(Ok(Err(message))) => {
                    responder.respond_err(message);
                }
                Ok(Err(payload)) => {
                    let message = panic_message(payload.as_ref());
                    warn!(call_id = %task_ticket.id(), "Function call handler panicked: {}", message);
                    responder.respond_err(message);
                }
                Err(_) => {
                    warn!(call_id = %task_ticket.id(), timeout_ms = timeout.as_millis() as u64, "Function call timed out");
                    responder.respond_err(format!(
                        "Function call timed out after {} ms",
                        timeout.as_millis()
                    ));
                }
            }
            remove_ticket(&tickets, &task_ticket);
        });
        ticket.attach_task(task.abort_handle());

        DispatchOutcome::Dispatched
    }

    /// Drops every pending call without responding. Used when the agent
    /// connection that asked for them is gone.
    pub fn cancel_all(&self) {
        let pending: Vec<Arc<FunctionCallTicket>> =
            self.tickets.iter().map(|entry| entry.value().clone()).collect();
        self.tickets.clear();

        let mut cancelled = 0;
        for ticket in pending {
            if ticket.try_resolve() {
                cancelled += 1;
            }
            ticket.abort_task();
        }
        if cancelled > 0 {
            info!(cancelled, "Cancelled pending function calls");
        }
    }
}

fn remove_ticket(
    tickets: &DashMap<String, Arc<FunctionCallTicket>>,
    ticket: &Arc<FunctionCallTicket>,
) {
    tickets.remove_if(ticket.id(), |_, current| Arc::ptr_eq(current, ticket));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Function handler panicked".to_string()
    }
}
