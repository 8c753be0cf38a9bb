//! Top-level entry: endpoint → controller → output.
//!
//! [`App::handle`] never fails. Whatever happens while resolving the route,
//! building the controller or running the action ends up as an error
//! response in the negotiated format, and if even rendering that fails the
//! raw presenter gets the last word.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::AppContext;
use crate::controller::Controller;
use crate::error::Error;
use crate::handler::{decide_format_without_controller, ControllerRef};
use crate::present::{Output, RawPresenter};
use crate::request::Request;
use crate::response::{ErrorResponse, Response};
use crate::router::{build_method_name, normalize_endpoint, IntoEndpoints, RouteIndex};

/// A controller picked outside the route index.
#[derive(Clone, Debug)]
pub struct RouteTarget {
    pub controller: ControllerRef,
    /// Method-name hint, combined with the request method.
    pub hint: String,
    /// Leftover endpoint handed to the controller.
    pub endpoint: String,
}

impl RouteTarget {
    pub fn new<C: Controller>(hint: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { controller: ControllerRef::of::<C>(), hint: hint.into(), endpoint: endpoint.into() }
    }
}

type InputDetector = Box<dyn Fn(&Request) -> Option<RouteTarget> + Send + Sync>;
type ErrorMapper = Box<dyn Fn(&Error, &str) -> Option<Response> + Send + Sync>;

/// The application. Build it once at startup; share it across requests.
pub struct App {
    context: Arc<AppContext>,
    routes: RouteIndex<ControllerRef>,
    default_controller: Option<ControllerRef>,
    detect_from_input: Option<InputDetector>,
    exception_to_response: Option<ErrorMapper>,
}

impl App {
    pub fn new(context: AppContext) -> Self {
        Self {
            context: Arc::new(context),
            routes: RouteIndex::new(),
            default_controller: None,
            detect_from_input: None,
            exception_to_response: None,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// Routes `endpoints` to `C`. Returns `self` for chaining.
    ///
    /// ```rust,ignore
    /// App::new(cx)
    ///     .register_endpoint::<Auth>(["/login", "/logout"], "")
    ///     .register_endpoint::<Files>("/files/*", "download");
    /// ```
    pub fn register_endpoint<C: Controller>(mut self, endpoints: impl IntoEndpoints, hint: &str) -> Self {
        let controller = ControllerRef::of::<C>();
        for endpoint in endpoints.into_endpoints() {
            self.routes.insert(endpoint, controller.clone(), hint);
        }
        self
    }

    /// Handles everything the index does not, using the request's action
    /// method as the hint.
    pub fn with_default_controller<C: Controller>(mut self) -> Self {
        self.default_controller = Some(ControllerRef::of::<C>());
        self
    }

    /// Consulted when the index has no match, before the default controller.
    pub fn with_input_detector<F>(mut self, detect: F) -> Self
    where
        F: Fn(&Request) -> Option<RouteTarget> + Send + Sync + 'static,
    {
        self.detect_from_input = Some(Box::new(detect));
        self
    }

    /// Turns errors raised outside actions into custom responses. Receives
    /// the error and the negotiated format.
    pub fn with_exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error, &str) -> Option<Response> + Send + Sync + 'static,
    {
        self.exception_to_response = Some(Box::new(handler));
        self
    }

    /// Runs one request through the pipeline.
    pub fn handle(&self, request: Request) -> Output {
        let Some(target) = self.resolve(&request) else {
            return self.no_controller(request);
        };
        let method = build_method_name(request.method(), &target.hint);

        let failure = match target.controller.dispatch(&self.context, request, &target.endpoint, &method) {
            Ok(output) => return output,
            Err(failure) => failure,
        };

        let err = failure.error;
        error!(
            controller = target.controller.name(),
            action = %method,
            location = %err.location(),
            traceback = ?err.traceback(),
            "in app action: {err}"
        );

        let format = self.fallback_format(&failure.request);
        let custom = self.exception_to_response.as_ref().and_then(|map| map(&err, &format));
        let response = custom.unwrap_or_else(|| ErrorResponse::from(err).into());
        self.render(response, &format)
    }

    fn resolve(&self, request: &Request) -> Option<RouteTarget> {
        let prefix = &self.context.config().application_endpoint_prefix;
        let endpoint = normalize_endpoint(request.raw_endpoint(), prefix);

        if let Some(m) = self.routes.lookup(&endpoint) {
            return Some(RouteTarget {
                controller: m.target.clone(),
                hint: m.hint.to_owned(),
                endpoint: m.rest.to_owned(),
            });
        }
        debug!(endpoint = %endpoint, "no route in the index");

        if let Some(target) = self.detect_from_input.as_ref().and_then(|detect| detect(request)) {
            return Some(target);
        }

        self.default_controller.as_ref().map(|controller| RouteTarget {
            controller: controller.clone(),
            hint: request.action_method().unwrap_or_default().to_owned(),
            endpoint: String::new(),
        })
    }

    fn no_controller(&self, request: Request) -> Output {
        let format = self.fallback_format(&request);
        let response = Response::from(ErrorResponse::new("No controller found for this endpoint")).with_http_code(404);
        self.render(response, &format)
    }

    /// Format for output produced outside a controller: what the default
    /// controller would pick, else plain negotiation. `json` when the
    /// default controller cannot even be built.
    fn fallback_format(&self, request: &Request) -> String {
        match &self.default_controller {
            Some(controller) => controller
                .decide_format(&self.context, request.detached())
                .unwrap_or_else(|err| {
                    error!(location = %err.location(), "in app decide output format: {err}");
                    "json".to_owned()
                }),
            None => decide_format_without_controller(&self.context, request.detached()),
        }
    }

    fn render(&self, response: Response, format: &str) -> Output {
        let code = response.http_code();
        let message = response.error_ref().map(|e| e.message().to_owned()).unwrap_or_default();

        let err = match self.context.builder().build(&self.context, response, format) {
            Ok(output) => return output,
            Err(err) => err,
        };
        warn!(format = %format, "rendering failed, falling back to raw: {err}");

        let fallback = Response::error(message).with_http_code(code);
        match self.context.builder().build(&self.context, fallback, RawPresenter::FORMAT) {
            Ok(output) => output,
            Err(err) => {
                error!("raw rendering failed: {err}");
                let mut out = Output::new(RawPresenter::FORMAT);
                out.set_status(500, "500 Internal Server Error");
                out.append_header("Content-Type", Some("text/plain"), true);
                out.set_text("Error: internal error\n");
                out
            }
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("context", &self.context)
            .field("routes", &self.routes.len())
            .field("default_controller", &self.default_controller)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ActionContext, ActionTable, Args, Param};
    use crate::error::Result;
    use serde_json::json;

    struct Files;

    impl Controller for Files {
        fn create(cx: &mut ActionContext) -> Result<Self> {
            cx.settings_mut().present_format = "raw".into();
            Ok(Self)
        }

        fn actions(table: &mut ActionTable<Self>) {
            table
                .on("getDownload", [], |_, cx: &mut ActionContext, _| Ok(format!("file:{}", cx.endpoint())))
                .on("postLogin", [Param::string("user")], |_, _, args: Args| Ok(json!({"user": args.string("user")})));
        }
    }

    struct Broken;

    impl Controller for Broken {
        fn create(_cx: &mut ActionContext) -> Result<Self> {
            Err(Error::integration("database is down"))
        }

        fn actions(_table: &mut ActionTable<Self>) {}
    }

    fn app() -> App {
        App::new(AppContext::default())
            .register_endpoint::<Files>("/files/*", "download")
            .register_endpoint::<Files>("/login", "login")
            .register_endpoint::<Broken>("/broken", "")
    }

    #[test]
    fn routes_to_the_controller_with_the_rest() {
        let mut out = app().handle(Request::new().with_endpoint("/files/a/b.txt"));
        assert_eq!(out.status(), 200);
        assert_eq!(out.materialize().unwrap(), "file:a/b.txt");
    }

    #[test]
    fn method_prefix_selects_the_action() {
        let mut request = Request::new().with_endpoint("/login").with_method("POST");
        request.set_priority_data(json!({"user": "ann"}).as_object().cloned().unwrap());
        let mut out = app().handle(request);
        assert_eq!(out.materialize().unwrap(), "user = ann\n");
    }

    #[test]
    fn unknown_endpoint_is_404() {
        let mut out = app().handle(Request::new().with_endpoint("/nowhere").with_present_format("json"));
        assert_eq!(out.status(), 404);
        assert_eq!(out.materialize().unwrap(), r#"{"error":"No controller found for this endpoint"}"#);
    }

    #[test]
    fn construction_errors_are_rendered() {
        let mut out = app().handle(Request::new().with_endpoint("/broken").with_present_format("json"));
        assert_eq!(out.status(), 503);
        assert_eq!(out.materialize().unwrap(), r#"{"error":"database is down"}"#);
    }

    #[test]
    fn exception_handler_can_replace_the_error() {
        let app = app().with_exception_handler(|err, format| {
            assert_eq!(format, "html");
            Some(Response::redirect(format!("/status?kind={}", err.default_status())))
        });
        let out = app.handle(Request::new().with_endpoint("/broken"));
        assert_eq!(out.status(), 302);
        assert_eq!(out.header("Location"), Some("/status?kind=503"));
    }

    #[test]
    fn unknown_format_falls_back_to_raw() {
        let mut out = app().handle(Request::new().with_endpoint("/nowhere").with_present_format("yaml"));
        assert_eq!(out.format(), "raw");
        assert_eq!(out.status(), 404);
        assert_eq!(out.materialize().unwrap(), "Error: No controller found for this endpoint\n");
    }

    #[test]
    fn default_controller_and_input_detector() {
        let app = app()
            .with_input_detector(|req| {
                req.header("X-Files").map(|rest| RouteTarget::new::<Files>("download", rest))
            })
            .with_default_controller::<Files>();

        let mut out = app.handle(Request::new().with_endpoint("/x").with_header("X-Files", "c.txt"));
        assert_eq!(out.materialize().unwrap(), "file:c.txt");

        let mut out = app.handle(Request::new().with_endpoint("/x").with_action_method("download"));
        assert_eq!(out.materialize().unwrap(), "file:");
    }

    #[test]
    fn app_prefix_is_stripped() {
        let config = crate::config::Config {
            application_endpoint_prefix: "/shop".into(),
            ..Default::default()
        };
        let app = App::new(AppContext::new(config)).register_endpoint::<Files>("/files/*", "download");
        let mut out = app.handle(Request::new().with_endpoint("/shop/files/z"));
        assert_eq!(out.materialize().unwrap(), "file:z");
    }
}
