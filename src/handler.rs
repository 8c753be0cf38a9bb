//! Controller type erasure.
//!
//! # How controllers are stored
//!
//! The route index maps patterns to *different* controller types, and Rust
//! collections hold one concrete type. So each controller type is hidden
//! behind a trait object (`dyn ErasedController`) and stored uniformly.
//!
//! ```text
//! struct Users; impl Controller for Users { … }    ← user writes this
//!        ↓ app.register_endpoint::<Users>("/users", "")
//! ControllerRef::of::<Users>()                       ← builds the action table once
//!        ↓
//! Arc::new(Entry::<Users> { table })                 ← heap-allocated wrapper
//!        ↓  stored as Arc<dyn ErasedController>
//! entry.dispatch(app, request, rest, method)         ← one vtable call per request
//!        ↓
//! ControllerHost::<Users>::build(..)?.action(method) → Output
//! ```

use std::fmt;
use std::sync::Arc;

use crate::context::AppContext;
use crate::controller::{negotiate_format, ActionContext, ActionTable, Controller, ControllerHost};
use crate::error::Error;
use crate::present::Output;
use crate::request::Request;

/// A failed dispatch. The request comes back so the error can still be
/// rendered for it.
pub(crate) struct Failure {
    pub error: Error,
    pub request: Request,
}

/// Internal dispatch interface. Sealed: only [`Entry`] implements it.
pub(crate) trait ErasedController: Send + Sync {
    fn dispatch(&self, app: &Arc<AppContext>, request: Request, endpoint: &str, method: &str) -> Result<Output, Failure>;

    /// Output format this controller would pick for `request` before any
    /// action ran.
    fn decide_format(&self, app: &Arc<AppContext>, request: Request) -> Result<String, Error>;

    fn name(&self) -> &'static str;
}

struct Entry<C: Controller> {
    table: Arc<ActionTable<C>>,
}

impl<C: Controller> ErasedController for Entry<C> {
    fn dispatch(&self, app: &Arc<AppContext>, request: Request, endpoint: &str, method: &str) -> Result<Output, Failure> {
        let cx = ActionContext::new(Arc::clone(app), request).with_endpoint(endpoint);
        let mut host = ControllerHost::build(cx, Arc::clone(&self.table))
            .map_err(|(error, request)| Failure { error, request })?;

        match host.action(method, None) {
            Ok(output) => Ok(output),
            Err(error) => Err(Failure { error, request: host.into_request() }),
        }
    }

    fn decide_format(&self, app: &Arc<AppContext>, request: Request) -> Result<String, Error> {
        let cx = ActionContext::new(Arc::clone(app), request);
        let host = ControllerHost::build(cx, Arc::clone(&self.table)).map_err(|(error, _)| error)?;
        Ok(host.decide_output_format(None))
    }

    fn name(&self) -> &'static str {
        C::name()
    }
}

/// A type-erased controller, cheap to clone.
#[derive(Clone)]
pub struct ControllerRef(Arc<dyn ErasedController>);

impl ControllerRef {
    /// Erases `C`. Its action table is built here, once.
    pub fn of<C: Controller>() -> Self {
        let mut table = ActionTable::new();
        C::actions(&mut table);
        Self(Arc::new(Entry::<C> { table: Arc::new(table) }))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub(crate) fn dispatch(&self, app: &Arc<AppContext>, request: Request, endpoint: &str, method: &str) -> Result<Output, Failure> {
        self.0.dispatch(app, request, endpoint, method)
    }

    pub(crate) fn decide_format(&self, app: &Arc<AppContext>, request: Request) -> Result<String, Error> {
        self.0.decide_format(app, request)
    }
}

impl fmt::Debug for ControllerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ControllerRef").field(&self.name()).finish()
    }
}

/// Format negotiation without a controller: the context, then the
/// request, then the stock default.
pub(crate) fn decide_format_without_controller(app: &Arc<AppContext>, request: Request) -> String {
    let cx = ActionContext::new(Arc::clone(app), request);
    negotiate_format(&cx, None, || None)
}
