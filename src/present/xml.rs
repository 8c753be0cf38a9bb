//! XML bodies.
//!
//! The payload shapes mirror the JSON presenter, wrapped in a `<response>`
//! root. Mapping keys become element names; list items, and keys that are
//! not valid element names, become `<item>` elements (the latter with the
//! original key in a `key` attribute).

use std::fmt::Display;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde_json::{json, Value};

use super::{trace_frames, Output, Presenter};
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::response::{DataResponse, ErrorResponse, RedirectResponse};
use crate::value;

#[derive(Clone, Copy, Debug, Default)]
pub struct XmlPresenter;

impl XmlPresenter {
    pub const FORMAT: &'static str = "xml";
}

const ROOT: &str = "response";
const ITEM: &str = "item";

fn xml_error(e: impl Display) -> Error {
    Error::internal(format!("xml: {e}"))
}

/// Element names: a letter or underscore, then letters, digits, `-`, `_`
/// or `.`, and no reserved `xml` prefix.
fn is_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("xml"))
}

fn write_value(writer: &mut Writer<Vec<u8>>, start: BytesStart<'_>, value: &Value) -> Result<()> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    match value {
        Value::Null => writer.write_event(Event::Empty(start)).map_err(xml_error)?,
        Value::Array(items) => {
            writer.write_event(Event::Start(start)).map_err(xml_error)?;
            for item in items {
                write_value(writer, BytesStart::new(ITEM), item)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_error)?;
        }
        Value::Object(map) => {
            writer.write_event(Event::Start(start)).map_err(xml_error)?;
            for (key, item) in map {
                let child = if is_element_name(key) {
                    BytesStart::new(key.as_str())
                } else {
                    BytesStart::new(ITEM).with_attributes([("key", key.as_str())])
                };
                write_value(writer, child, item)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_error)?;
        }
        scalar => {
            let text = value::to_string(scalar);
            writer.write_event(Event::Start(start)).map_err(xml_error)?;
            writer.write_event(Event::Text(BytesText::new(&text))).map_err(xml_error)?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_error)?;
        }
    }
    Ok(())
}

/// Serializes `payload` as a complete XML document.
pub(crate) fn to_document(payload: &Value) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    write_value(&mut writer, BytesStart::new(ROOT), payload)?;
    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

fn set_xml(out: &mut Output, body: String) {
    out.append_header("Content-Length", Some(&body.len().to_string()), true);
    out.set_text(body);
}

impl Presenter for XmlPresenter {
    fn format(&self) -> &str {
        Self::FORMAT
    }

    fn redirect(&self, _cx: &AppContext, out: &mut Output, _code: u16, redirect: RedirectResponse) -> Result<()> {
        out.append_header("Content-Type", Some("application/xml"), true);
        set_xml(out, to_document(&json!({ "redirect_url": redirect.url() }))?);
        Ok(())
    }

    fn data(&self, _cx: &AppContext, out: &mut Output, code: u16, data: DataResponse) -> Result<()> {
        out.set_status(if code == 0 { 200 } else { code }, "200 OK");
        out.append_header("Content-Type", Some("application/xml"), true);

        if let Some(complete) = data.complete() {
            out.set_text(complete);
            return Ok(());
        }

        let payload = if data.is_empty() { json!({}) } else { data.data().clone() };
        set_xml(out, to_document(&payload)?);
        Ok(())
    }

    fn error(&self, cx: &AppContext, out: &mut Output, code: u16, error: ErrorResponse) -> Result<()> {
        out.set_status(if code == 0 { 500 } else { code }, "500 Internal Server Error");
        out.append_header("Content-Type", Some("application/xml"), true);

        let mut payload = json!({ "error": error.message() });
        let frames = trace_frames(cx, &error);
        if !frames.is_empty() {
            payload["traceback"] = json!(frames);
        }
        set_xml(out, to_document(&payload)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    const DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

    #[test]
    fn element_names() {
        assert!(is_element_name("user_id"));
        assert!(is_element_name("a.b-c"));
        assert!(!is_element_name("1st"));
        assert!(!is_element_name("has space"));
        assert!(!is_element_name("xmlns"));
        assert!(!is_element_name(""));
    }

    #[test]
    fn mappings_lists_and_scalars() {
        let doc = to_document(&json!({
            "name": "a & b",
            "tags": ["x", "y"],
            "ok": true,
            "none": null,
            "2nd": 2
        }))
        .unwrap();
        assert_eq!(
            doc,
            format!(
                "{DECL}<response><name>a &amp; b</name><tags><item>x</item><item>y</item></tags>\
                 <ok>1</ok><none/><item key=\"2nd\">2</item></response>"
            )
        );
    }

    #[test]
    fn presenter_shapes() {
        let cx = AppContext::default();

        let mut out = cx.builder().build(&cx, Response::data(json!({})), "xml").unwrap();
        assert_eq!(out.header("Content-Type"), Some("application/xml"));
        assert_eq!(out.materialize().unwrap(), format!("{DECL}<response></response>"));

        let mut out = cx.builder().build(&cx, Response::redirect("/go"), "xml").unwrap();
        assert_eq!(
            out.materialize().unwrap(),
            format!("{DECL}<response><redirect_url>/go</redirect_url></response>")
        );

        let mut out = cx.builder().build(&cx, Response::error("nope"), "xml").unwrap();
        assert_eq!(out.status(), 500);
        assert_eq!(
            out.materialize().unwrap(),
            format!("{DECL}<response><error>nope</error></response>")
        );
    }
}
