//! Client-side function calls.
//!
//! The agent asks the client to run a function with a `FunctionCallRequest`;
//! every client-side call gets exactly one `FunctionCallResponse`. The
//! response is chosen in priority order: an explicit
//! [`FunctionResponder::respond`], the handler's returned value, a panic while
//! invoking the handler, an `Err` or panic from its future, and finally a
//! default error. Calls that outlive the deadline are answered with a timeout
//! error.
//!
//! ```rust,ignore
//! session.on_function_call(Arc::new(|request, responder| {
//!     Box::pin(async move {
//!         match request.name.as_str() {
//!             "get_time" => Ok(Some(json!({ "time": "12:00" }))),
//!             other => Err(format!("unknown function {other}")),
//!         }
//!     })
//! }));
//! ```

mod dispatcher;
mod ticket;

pub use dispatcher::{
    DEFAULT_NO_RESPONSE_ERROR, DispatchOutcome, FunctionCallDispatcher, FunctionCallHandler,
    FunctionCallRequest, FunctionResponder, HandlerFuture, NO_HANDLER_ERROR, ResponseSink,
};
pub use ticket::FunctionCallTicket;
