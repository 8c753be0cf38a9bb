//! JSON bodies.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{trace_frames, Output, Presenter};
use crate::context::AppContext;
use crate::error::Result;
use crate::response::{DataResponse, ErrorResponse, RedirectResponse};

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonPresenter;

impl JsonPresenter {
    pub const FORMAT: &'static str = "json";
}

fn encode(cx: &AppContext, value: &impl Serialize) -> serde_json::Result<String> {
    if cx.json_pretty() {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}

fn set_json(out: &mut Output, body: String) {
    out.append_header("Content-Length", Some(&body.len().to_string()), true);
    out.set_text(body);
}

impl Presenter for JsonPresenter {
    fn format(&self) -> &str {
        Self::FORMAT
    }

    /// JSON clients get the target instead of a redirect.
    fn redirect(&self, cx: &AppContext, out: &mut Output, _code: u16, redirect: RedirectResponse) -> Result<()> {
        out.append_header("Content-Type", Some("application/json"), true);
        let body = encode(cx, &json!({ "redirect_url": redirect.url() }))?;
        set_json(out, body);
        Ok(())
    }

    fn data(&self, cx: &AppContext, out: &mut Output, code: u16, data: DataResponse) -> Result<()> {
        out.set_status(if code == 0 { 200 } else { code }, "200 OK");
        out.append_header("Content-Type", Some("application/json"), true);

        if let Some(complete) = data.complete() {
            out.set_text(complete);
            return Ok(());
        }

        let body = if data.is_empty() {
            "{}".to_owned()
        } else {
            encode(cx, data.data()).unwrap_or_else(|e| {
                json!({ "error": "Error encoding data to JSON", "message": e.to_string() }).to_string()
            })
        };
        set_json(out, body);
        Ok(())
    }

    fn error(&self, cx: &AppContext, out: &mut Output, code: u16, error: ErrorResponse) -> Result<()> {
        out.set_status(if code == 0 { 500 } else { code }, "500 Internal Server Error");
        out.append_header("Content-Type", Some("application/json"), true);

        let mut payload = Map::new();
        payload.insert("error".into(), Value::String(error.message().to_owned()));
        if cx.trace_errors() && error.error().is_some() {
            payload.insert("traceback".into(), json!(trace_frames(cx, &error)));
        }

        let body = encode(cx, &payload)?;
        debug!(body = %body, "json error response");
        set_json(out, body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::response::Response;

    fn render(cx: &AppContext, response: Response) -> Output {
        cx.builder().build(cx, response, "json").unwrap()
    }

    #[test]
    fn empty_data_is_an_empty_object() {
        let cx = AppContext::default();
        let mut out = render(&cx, Response::data(json!({})));
        assert_eq!(out.materialize().unwrap(), "{}");
        let mut out = render(&cx, Response::data(json!([])));
        assert_eq!(out.materialize().unwrap(), "{}");
    }

    #[test]
    fn data_is_encoded_compactly_by_default() {
        let cx = AppContext::default();
        let mut out = render(&cx, Response::data(json!({"a": 1})));
        assert_eq!(out.status(), 200);
        assert_eq!(out.header("Content-Type"), Some("application/json"));
        assert_eq!(out.header("Content-Length"), Some("7"));
        assert_eq!(out.materialize().unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn pretty_printing_is_configurable() {
        let cx = AppContext::default().with_json_pretty(true);
        let mut out = render(&cx, Response::data(json!({"a": 1})));
        assert_eq!(out.materialize().unwrap(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn redirect_becomes_url_payload() {
        let cx = AppContext::default();
        let mut out = render(&cx, Response::redirect("/login"));
        assert_eq!(out.status(), 200);
        assert_eq!(out.materialize().unwrap(), r#"{"redirect_url":"/login"}"#);

        let mut out = render(&cx, Response::redirect_or_data("/x", json!({"k": "v"})));
        assert_eq!(out.materialize().unwrap(), r#"{"k":"v"}"#);
    }

    #[test]
    fn errors_default_to_500_and_hide_traceback() {
        let cx = AppContext::default();
        let mut out = render(&cx, Response::error("broken"));
        assert_eq!(out.status(), 500);
        assert_eq!(out.materialize().unwrap(), r#"{"error":"broken"}"#);

        let mut out = render(&cx, Response::from_error(Error::unauthorized("login first")));
        assert_eq!(out.status(), 401);
        assert_eq!(out.materialize().unwrap(), r#"{"error":"login first"}"#);
    }

    #[test]
    fn trace_mode_adds_traceback() {
        let cx = AppContext::new(Config { trace_errors: true, ..Config::default() });
        let mut out = render(&cx, Response::from_error(Error::conflict("taken")));
        let body: Value = serde_json::from_str(&out.materialize().unwrap()).unwrap();
        assert_eq!(body["error"], "taken");
        assert!(body["traceback"][0].as_str().unwrap().starts_with(file!()));
    }
}
