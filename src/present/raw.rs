//! Plain-text bodies, mostly for command-line runs and as the format of
//! last resort.

use std::fmt::Write as _;

use serde_json::Value;

use super::{trace_frames, Output, Presenter};
use crate::context::AppContext;
use crate::error::Result;
use crate::response::{DataResponse, ErrorResponse, RedirectResponse};
use crate::value;

#[derive(Clone, Copy, Debug, Default)]
pub struct RawPresenter;

impl RawPresenter {
    pub const FORMAT: &'static str = "raw";
}

/// Nested collections are written as inline JSON.
fn plain(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => value.to_string(),
        scalar => value::to_string(scalar),
    }
}

impl Presenter for RawPresenter {
    fn format(&self) -> &str {
        Self::FORMAT
    }

    fn redirect(&self, _cx: &AppContext, out: &mut Output, _code: u16, redirect: RedirectResponse) -> Result<()> {
        out.append_header("Content-Type", Some("text/plain"), false);
        out.set_text(format!("Redirect: {}", redirect.url()));
        Ok(())
    }

    fn data(&self, _cx: &AppContext, out: &mut Output, code: u16, data: DataResponse) -> Result<()> {
        out.set_status(if code == 0 { 200 } else { code }, "200 OK");
        out.append_header("Content-Type", Some("text/plain"), false);

        if let Some(complete) = data.complete() {
            out.set_text(complete);
            return Ok(());
        }

        let mut body = String::new();
        match data.data() {
            Value::Array(items) => {
                for item in items {
                    let _ = writeln!(body, "{}", plain(item));
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    let _ = writeln!(body, "{key} = {}", plain(item));
                }
            }
            other => {
                let _ = writeln!(body, "{}", plain(other));
            }
        }
        if let Some(template) = data.template() {
            let _ = write!(body, "Data template: {template}");
        }

        out.set_text(body);
        Ok(())
    }

    fn error(&self, cx: &AppContext, out: &mut Output, code: u16, error: ErrorResponse) -> Result<()> {
        out.set_status(if code == 0 { 500 } else { code }, "500 Internal Server Error");
        out.append_header("Content-Type", Some("text/plain"), false);

        let mut body = format!("Error: {}\n", error.message());
        for frame in trace_frames(cx, &error) {
            body.push_str(&frame);
            body.push('\n');
        }
        out.set_text(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::response::Response;
    use serde_json::json;

    fn body(response: Response) -> (u16, String) {
        let cx = AppContext::default();
        let mut out = cx.builder().build(&cx, response, "raw").unwrap();
        (out.status(), out.materialize().unwrap())
    }

    #[test]
    fn lists_print_one_value_per_line() {
        assert_eq!(body(Response::data(json!(["x", "y"]))).1, "x\ny\n");
    }

    #[test]
    fn mappings_print_key_value_lines() {
        assert_eq!(body(Response::data(json!({"a": "1"}))).1, "a = 1\n");
        assert_eq!(
            body(Response::data(json!({"n": 2, "list": [1, 2], "ok": true}))).1,
            "n = 2\nlist = [1,2]\nok = 1\n"
        );
    }

    #[test]
    fn template_name_is_appended() {
        let (_, text) = body(Response::data(json!({"a": "b"})).with_template("home"));
        assert_eq!(text, "a = b\nData template: home");
    }

    #[test]
    fn redirects_and_errors() {
        assert_eq!(body(Response::redirect("/x")), (200, "Redirect: /x".to_owned()));
        assert_eq!(body(Response::error("bad")), (500, "Error: bad\n".to_owned()));
        assert_eq!(
            body(Response::from_error(Error::not_found("gone"))),
            (404, "Error: gone\n".to_owned())
        );
    }

    #[test]
    fn content_type_set_by_response_is_kept() {
        let cx = AppContext::default();
        let response = Response::data(json!([])).with_header("Content-Type", "text/csv");
        let out = cx.builder().build(&cx, response, "raw").unwrap();
        assert_eq!(out.header("content-type"), Some("text/csv"));
    }
}
