//! Controllers and action dispatch.
//!
//! A controller is a plain struct implementing [`Controller`]. Its actions
//! are registered in an [`ActionTable`] together with the parameters they
//! take; at dispatch time every parameter is pulled from the request with
//! its declared type and default, and handed to the action as [`Args`].
//!
//! ```text
//! ControllerHost::action(name, extra)
//!   ├─ extra args        → request priority data
//!   ├─ lookup(name)      → 404 "Method not found for the endpoint"
//!   ├─ before_action + before_<method>_action
//!   ├─ resolve params    → Args
//!   ├─ call action       → Reply → Response
//!   ├─ any error         → exception_to_response or ErrorResponse
//!   ├─ negotiate format
//!   ├─ complete_error / redirect_on_error (html only)
//!   ├─ before_presenting, cookies, extra headers
//!   └─ Builder::build    → Output
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::method::RequestMethod;
use crate::model::{self, PublicModel};
use crate::present::{HtmlPresenter, Output};
use crate::request::Request;
use crate::response::{Cookie, DataResponse, ErrorResponse, Response};
use crate::session::Session;
use crate::value::{self, ValueType};

// ── Action context ────────────────────────────────────────────────────────────

/// Per-controller output settings. Controllers adjust them in
/// [`Controller::create`] or in any hook.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Output format chosen by the controller. Empty means undecided.
    pub present_format: String,
    /// Used when nothing else picks a format. Starts as the builder's
    /// default format.
    pub default_present_format: String,
    /// Errors become a redirect here when rendering HTML.
    pub redirect_on_error: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub cookies: BTreeMap<String, Cookie>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            present_format: String::new(),
            default_present_format: HtmlPresenter::FORMAT.to_owned(),
            redirect_on_error: None,
            extra_headers: Vec::new(),
            cookies: BTreeMap::new(),
        }
    }
}

/// Everything an action can see: the application context, the request,
/// the session and the controller settings.
pub struct ActionContext {
    app: Arc<AppContext>,
    request: Request,
    session: Box<dyn Session>,
    settings: ControllerSettings,
    endpoint: String,
}

impl ActionContext {
    pub fn new(app: Arc<AppContext>, request: Request) -> Self {
        let session = app.open_session(&request);
        let settings = ControllerSettings {
            default_present_format: app.builder().default_format().to_owned(),
            ..ControllerSettings::default()
        };
        Self {
            app,
            request,
            session,
            settings,
            endpoint: String::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn app(&self) -> &AppContext { &self.app }
    pub fn request(&self) -> &Request { &self.request }
    pub fn request_mut(&mut self) -> &mut Request { &mut self.request }
    pub fn session(&self) -> &dyn Session { self.session.as_ref() }
    pub fn session_mut(&mut self) -> &mut dyn Session { self.session.as_mut() }
    pub fn settings(&self) -> &ControllerSettings { &self.settings }
    pub fn settings_mut(&mut self) -> &mut ControllerSettings { &mut self.settings }

    /// The part of the endpoint left after routing, e.g. `a/b.txt` for
    /// `/files/a/b.txt` matched by `/files/*`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn text(&self, key: &str, group: &str, params: &[String]) -> String {
        self.app.text(key, group, params)
    }

    /// Cookies merged into the final response unless the response sets the
    /// same name itself.
    pub fn append_cookies(&mut self, cookies: impl IntoIterator<Item = (String, Cookie)>) {
        self.settings.cookies.extend(cookies);
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.settings.extra_headers.push((name.into(), value.into()));
    }

    /// Fails with an unauthorized error unless somebody is logged in.
    /// An empty `message` falls back to the localized
    /// `exceptions:user_auth_required_please_login` text.
    pub fn signin_required(&self, message: &str) -> Result<()> {
        if self.session.is_logged_in() {
            return Ok(());
        }
        let message = if message.is_empty() {
            let text = self.text("user_auth_required_please_login", "exceptions", &[]);
            if text.ends_with("user_auth_required_please_login") {
                "User Auth required. Please login".to_owned()
            } else {
                text
            }
        } else {
            message.to_owned()
        };
        Err(Error::unauthorized(message))
    }

    pub(crate) fn into_request(self) -> Request {
        self.request
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("request", &self.request)
            .field("settings", &self.settings)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

/// A declared action parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    name: String,
    ty: ValueType,
    default: Option<Value>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: impl Into<ValueType>) -> Self {
        Self { name: name.into(), ty: ty.into(), default: None }
    }

    pub fn int(name: impl Into<String>) -> Self { Self::new(name, ValueType::Int) }
    pub fn float(name: impl Into<String>) -> Self { Self::new(name, ValueType::Float) }
    pub fn string(name: impl Into<String>) -> Self { Self::new(name, ValueType::String) }
    pub fn bool(name: impl Into<String>) -> Self { Self::new(name, ValueType::Bool) }
    pub fn alpha(name: impl Into<String>) -> Self { Self::new(name, ValueType::Alpha) }
    pub fn array(name: impl Into<String>) -> Self { Self::new(name, ValueType::Array) }
    pub fn object(name: impl Into<String>) -> Self { Self::new(name, ValueType::Object) }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn value_type(&self) -> &ValueType { &self.ty }
}

/// Resolved action arguments, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    values: Vec<(String, Value)>,
}

impl Args {
    pub fn resolve(params: &[Param], request: &mut Request) -> Result<Self> {
        let values = params
            .iter()
            .map(|p| Ok((p.name.clone(), request.get(&p.name, &p.ty, p.default.clone())?)))
            .collect::<Result<_>>()?;
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn int(&self, name: &str) -> i64 {
        self.get(name).map(value::to_int).unwrap_or_default()
    }

    pub fn float(&self, name: &str) -> f64 {
        self.get(name).map(value::to_float).unwrap_or_default()
    }

    pub fn string(&self, name: &str) -> String {
        self.get(name).map(value::to_string).unwrap_or_default()
    }

    pub fn bool(&self, name: &str) -> bool {
        self.get(name).is_some_and(value::to_bool)
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

/// What an action may return.
pub enum Reply {
    Response(Response),
    /// A mapping or a list, rendered as data.
    Data(Value),
    /// A pre-rendered body.
    Text(String),
    Model(Box<dyn PublicModel>),
    /// Nothing to say: 204.
    Empty,
    /// Anything else. Rejected unless the controller overrides
    /// [`Controller::wrap_reply`].
    Scalar(Value),
}

impl Reply {
    pub fn model(model: impl PublicModel + 'static) -> Self {
        Self::Model(Box::new(model))
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self { Self::Response(r) }
}

impl From<DataResponse> for Reply {
    fn from(d: DataResponse) -> Self { Self::Response(d.into()) }
}

impl From<Map<String, Value>> for Reply {
    fn from(m: Map<String, Value>) -> Self { Self::Data(Value::Object(m)) }
}

impl From<String> for Reply {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<()> for Reply {
    fn from((): ()) -> Self { Self::Empty }
}

impl From<Value> for Reply {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Self::Empty,
            Value::String(s) => Self::Text(s),
            v @ (Value::Array(_) | Value::Object(_)) => Self::Data(v),
            v => Self::Scalar(v),
        }
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Empty, Into::into)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(r) => f.debug_tuple("Response").field(r).finish(),
            Self::Data(v)     => f.debug_tuple("Data").field(v).finish(),
            Self::Text(s)     => f.debug_tuple("Text").field(s).finish(),
            Self::Model(_)    => f.write_str("Model(..)"),
            Self::Empty       => f.write_str("Empty"),
            Self::Scalar(v)   => f.debug_tuple("Scalar").field(v).finish(),
        }
    }
}

/// The stock reply normalization.
pub fn wrap_reply(reply: Reply) -> Result<Response> {
    match reply {
        Reply::Response(r) => Ok(r),
        Reply::Data(data)  => Ok(Response::data(data)),
        Reply::Text(body)  => Ok(Response::complete(body)),
        Reply::Model(m)    => {
            let mut data = DataResponse::new(Value::Object(m.fields()?));
            if let Some(template) = m.template() {
                data.set_template(template);
            }
            Ok(data.into())
        }
        Reply::Empty       => Ok(Response::no_content()),
        Reply::Scalar(v)   => Err(Error::internal(format!(
            "Unsupported return type from action: {}",
            model::kind_name(&v)
        ))),
    }
}

type BoxedAction<C> = Box<dyn Fn(&mut C, &mut ActionContext, Args) -> Result<Reply> + Send + Sync>;

struct Action<C> {
    params: Vec<Param>,
    handler: BoxedAction<C>,
}

/// Action name → parameters + handler. Names are matched
/// case-insensitively.
pub struct ActionTable<C> {
    actions: HashMap<String, Action<C>>,
}

impl<C: 'static> ActionTable<C> {
    pub fn new() -> Self {
        Self { actions: HashMap::new() }
    }

    /// Registers an action. Returns `self` for chaining.
    ///
    /// ```rust,ignore
    /// table
    ///     .on("getIndex", [], Self::index)
    ///     .on("postLogin", [Param::string("user"), Param::bool("remember")], Self::login);
    /// ```
    pub fn on<F, R>(&mut self, name: &str, params: impl IntoIterator<Item = Param>, handler: F) -> &mut Self
    where
        F: Fn(&mut C, &mut ActionContext, Args) -> Result<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        let handler: BoxedAction<C> = Box::new(move |c: &mut C, cx: &mut ActionContext, args: Args| {
            handler(c, cx, args).map(Into::into)
        });
        self.actions.insert(
            name.to_lowercase(),
            Action { params: params.into_iter().collect(), handler },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(&name.to_lowercase())
    }

    fn get(&self, name: &str) -> Option<&Action<C>> {
        self.actions.get(&name.to_lowercase())
    }
}

impl<C: 'static> Default for ActionTable<C> {
    fn default() -> Self { Self::new() }
}

// ── Controller trait ──────────────────────────────────────────────────────────

/// An application controller.
///
/// Only [`create`](Controller::create) and [`actions`](Controller::actions)
/// are required; every hook has a do-nothing default.
pub trait Controller: Sized + Send + 'static {
    fn create(cx: &mut ActionContext) -> Result<Self>;

    fn actions(table: &mut ActionTable<Self>);

    /// Short name used in diagnostics.
    fn name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn after_construct(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }

    /// Runs before every action, e.g. for permission checks.
    fn before_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }

    fn before_get_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }
    fn before_post_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }
    fn before_put_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }
    fn before_delete_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }
    fn before_head_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }
    fn before_options_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }
    fn before_patch_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }
    /// Non-web invocations.
    fn before_do_action(&mut self, _cx: &mut ActionContext) -> Result<()> { Ok(()) }

    /// Turns a non-[`Response`] reply into a response.
    fn wrap_reply(&mut self, _cx: &mut ActionContext, reply: Reply) -> Result<Response> {
        wrap_reply(reply)
    }

    /// Chance to turn an action error into something other than an error
    /// page, e.g. a redirect back to a form.
    fn exception_to_response(&mut self, _cx: &mut ActionContext, _err: &Error) -> Option<Response> {
        None
    }

    /// Adjusts an error response that has no explicit status yet.
    fn complete_error(&mut self, _cx: &mut ActionContext, response: Response) -> Response {
        response
    }

    fn before_presenting(&mut self, _cx: &mut ActionContext, response: Response, _format: &str) -> Response {
        response
    }

    /// Format guess from the input, e.g. an `Accept` header. Consulted only
    /// when neither the context, the controller, the response nor the
    /// request picked a format.
    fn decide_output_format_from_input(&self, _cx: &ActionContext) -> Option<String> {
        None
    }
}

/// Output format negotiation. The first one set wins: forced by the
/// context, chosen by the controller, carried by the response, asked for
/// by the request, guessed from the input, the controller default.
pub fn negotiate_format(
    cx: &ActionContext,
    response: Option<&Response>,
    from_input: impl FnOnce() -> Option<String>,
) -> String {
    if let Some(forced) = cx.app.present_format() {
        return forced.to_owned();
    }
    if !cx.settings.present_format.is_empty() {
        return cx.settings.present_format.clone();
    }
    if let Some(format) = response.and_then(Response::presenter).filter(|f| !f.is_empty()) {
        return format.to_owned();
    }
    if let Some(format) = cx.request.present_format() {
        return format.to_owned();
    }
    if let Some(format) = from_input().filter(|f| !f.is_empty()) {
        return format;
    }
    cx.settings.default_present_format.clone()
}

// ── Host ──────────────────────────────────────────────────────────────────────

/// A controller bound to one request.
pub struct ControllerHost<C: Controller> {
    controller: C,
    cx: ActionContext,
    table: Arc<ActionTable<C>>,
}

impl<C: Controller> ControllerHost<C> {
    /// Creates the controller for `request`.
    pub fn new(app: Arc<AppContext>, request: Request) -> Result<Self> {
        let mut table = ActionTable::new();
        C::actions(&mut table);
        Self::build(ActionContext::new(app, request), Arc::new(table)).map_err(|(err, _)| err)
    }

    /// Like [`new`](Self::new) with a prepared table. On failure the
    /// request is handed back so the caller can still render the error.
    pub(crate) fn build(mut cx: ActionContext, table: Arc<ActionTable<C>>) -> Result<Self, (Error, Request)> {
        let mut controller = match C::create(&mut cx) {
            Ok(c) => c,
            Err(err) => return Err((err, cx.into_request())),
        };
        if let Err(err) = controller.after_construct(&mut cx) {
            return Err((err, cx.into_request()));
        }
        Ok(Self { controller, cx, table })
    }

    pub fn context(&self) -> &ActionContext { &self.cx }
    pub fn context_mut(&mut self) -> &mut ActionContext { &mut self.cx }
    pub fn controller(&self) -> &C { &self.controller }

    pub fn into_request(self) -> Request {
        self.cx.into_request()
    }

    pub fn decide_output_format(&self, response: Option<&Response>) -> String {
        negotiate_format(&self.cx, response, || self.controller.decide_output_format_from_input(&self.cx))
    }

    /// Runs `method_name` and renders the outcome.
    ///
    /// Controller failures become error responses; only a rendering failure
    /// (for instance an unknown output format) is returned as `Err`.
    pub fn action(&mut self, method_name: &str, extra: Option<Map<String, Value>>) -> Result<Output> {
        let mut response = match self.run(method_name, extra) {
            Ok(response) => response,
            Err(err) => {
                debug!(controller = C::name(), action = method_name, error = %err, "action failed");
                match self.controller.exception_to_response(&mut self.cx, &err) {
                    Some(custom) => custom,
                    None => ErrorResponse::from(err).into(),
                }
            }
        };

        let format = self.decide_output_format(Some(&response));

        if response.is_error() {
            let has_error = response.error_ref().is_some_and(|e| e.error().is_some());
            if has_error && response.explicit_http_code() == 0 {
                response = self.controller.complete_error(&mut self.cx, response);
                if response.explicit_http_code() == 0 {
                    let code = response.http_code();
                    response.set_http_code(code);
                }
            }

            if let Some(url) = self.cx.settings.redirect_on_error.as_deref().filter(|u| !u.is_empty()) {
                if format == HtmlPresenter::FORMAT {
                    let message = response.error_ref().map(|e| e.message().to_owned()).unwrap_or_default();
                    response = Response::redirect(url).with_message(message);
                }
            }
        }

        let mut response = self.controller.before_presenting(&mut self.cx, response, &format);

        response.merge_cookies(&self.cx.settings.cookies);
        for (name, value) in &self.cx.settings.extra_headers {
            response.add_header(name.clone(), value.clone());
        }

        self.cx.app.builder().build(&self.cx.app, response, &format)
    }

    fn run(&mut self, method_name: &str, extra: Option<Map<String, Value>>) -> Result<Response> {
        if let Some(extra) = extra.filter(|m| !m.is_empty()) {
            self.cx.request.set_priority_data(extra);
        }

        let Some(action) = self.table.get(method_name) else {
            error!(controller = C::name(), action = method_name, "method not found for the endpoint");
            if self.cx.app.trace_errors() {
                return Err(Error::not_found(format!(
                    "Method not found for the endpoint. {}::{method_name}",
                    C::name()
                )));
            }
            return Err(Error::not_found("Method not found for the endpoint"));
        };

        self.controller.before_action(&mut self.cx)?;

        let method = self.cx.request.method().clone();
        match method {
            RequestMethod::Get      => self.controller.before_get_action(&mut self.cx)?,
            RequestMethod::Post     => self.controller.before_post_action(&mut self.cx)?,
            RequestMethod::Put      => self.controller.before_put_action(&mut self.cx)?,
            RequestMethod::Delete   => self.controller.before_delete_action(&mut self.cx)?,
            RequestMethod::Head     => self.controller.before_head_action(&mut self.cx)?,
            RequestMethod::Options  => self.controller.before_options_action(&mut self.cx)?,
            RequestMethod::Patch    => self.controller.before_patch_action(&mut self.cx)?,
            RequestMethod::Do       => self.controller.before_do_action(&mut self.cx)?,
            RequestMethod::Other(_) => {}
        }

        let args = Args::resolve(&action.params, &mut self.cx.request)?;
        match (action.handler)(&mut self.controller, &mut self.cx, args)? {
            Reply::Response(response) => Ok(response),
            reply => self.controller.wrap_reply(&mut self.cx, reply),
        }
    }
}

impl<C: Controller> fmt::Debug for ControllerHost<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHost")
            .field("controller", &C::name())
            .field("cx", &self.cx)
            .finish_non_exhaustive()
    }
}
