//! HTML pages rendered through the template engine.

use serde_json::Value;

use super::{trace_frames, Output, Presenter};
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::response::{DataResponse, ErrorResponse, RedirectResponse, Response, ResponseKind};
use crate::value;

/// Renders data through templates and turns every redirect-capable
/// response into a real redirect.
#[derive(Clone, Copy, Debug, Default)]
pub struct HtmlPresenter;

impl HtmlPresenter {
    pub const FORMAT: &'static str = "html";
}

impl Presenter for HtmlPresenter {
    fn format(&self) -> &str {
        Self::FORMAT
    }

    fn present(&self, cx: &AppContext, out: &mut Output, response: Response) -> Result<()> {
        let code = response.http_code();
        let (_, kind) = response.into_parts();
        match kind {
            // Browsers get the redirect whatever the other half carries.
            ResponseKind::RedirectOrData(r, _) | ResponseKind::RedirectOrError(r, _) => {
                self.redirect(cx, out, 302, r)
            }
            ResponseKind::Data(d)     => self.data(cx, out, code, d),
            ResponseKind::Error(e)    => self.error(cx, out, code, e),
            ResponseKind::Redirect(r) => self.redirect(cx, out, code, r),
            ResponseKind::NoContent   => self.no_content(cx, out, code),
            ResponseKind::Stream(s)   => self.stream(cx, out, code, s),
        }
    }

    fn redirect(&self, _cx: &AppContext, out: &mut Output, code: u16, redirect: RedirectResponse) -> Result<()> {
        out.set_status(if code == 0 { 302 } else { code }, "302 Found");
        out.append_header("Location", Some(redirect.url()), true);
        Ok(())
    }

    fn data(&self, cx: &AppContext, out: &mut Output, code: u16, data: DataResponse) -> Result<()> {
        out.set_status(if code == 0 { 200 } else { code }, "200 OK");
        out.append_header("Content-Type", Some("text/html"), true);

        if let (Some(complete), false) = (data.complete(), data.has_base_template()) {
            out.set_text(complete);
            return Ok(());
        }

        let engine = cx
            .templates()
            .ok_or_else(|| Error::internal("Template engine is not configured"))?;

        let content = match data.complete() {
            Some(complete) => complete.to_owned(),
            None => {
                let template = data
                    .template()
                    .ok_or_else(|| Error::internal("Template is not set in the response object"))?;
                engine.render(template, data.data())?
            }
        };

        let html = match (cx.base_template_var(), data.base_template()) {
            (Some(var), Some(base)) => {
                let mut vars = value::into_map(data.data().clone());
                vars.insert(var.to_owned(), Value::String(content));
                engine.render(base, &Value::Object(vars))?
            }
            _ => content,
        };

        out.set_text(html);
        Ok(())
    }

    fn error(&self, cx: &AppContext, out: &mut Output, code: u16, error: ErrorResponse) -> Result<()> {
        out.set_status(if code == 0 { 500 } else { code }, "500 Internal Server Error");
        out.append_header("Content-Type", Some("text/html"), true);

        let mut page = format!("<html>Error: {}\n", handlebars::html_escape(error.message()));
        let frames = trace_frames(cx, &error);
        if !frames.is_empty() {
            page.push_str("<pre>");
            for frame in &frames {
                page.push_str(&handlebars::html_escape(frame));
                page.push('\n');
            }
            page.push_str("</pre>");
        }
        page.push_str("</html>");

        out.set_text(page);
        Ok(())
    }
}
