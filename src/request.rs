//! Transport-independent request.
//!
//! A [`Request`] is what a controller sees, whether the call came in over
//! HTTP or from the command line. Field values live in a JSON mapping; a
//! JSON body is merged into it the first time a POST/PUT field is read.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::debug;

use crate::error::{Error, Result};
use crate::method::RequestMethod;
use crate::value::{self, ValueType, ValueTypes};

/// An uploaded file, already stored on local disk by the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedFile {
    pub local_path: PathBuf,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// A request as seen by controllers.
pub struct Request {
    pub(crate) data: Map<String, Value>,
    pub(crate) priority: Map<String, Value>,
    pub(crate) headers: Vec<(String, String)>,
    cookies: OnceCell<HashMap<String, String>>,
    files: HashMap<String, UploadedFile>,
    upload_dir: Option<Arc<TempDir>>,
    body: Vec<u8>,
    body_parsed: bool,
    stream: Option<Box<dyn Read + Send>>,
    stream_size: u64,
    endpoint: String,
    method: RequestMethod,
    present_format: Option<String>,
    action_method: Option<String>,
    host: String,
    value_types: ValueTypes,
}

impl Request {
    pub fn new() -> Self {
        Self {
            data: Map::new(),
            priority: Map::new(),
            headers: Vec::new(),
            cookies: OnceCell::new(),
            files: HashMap::new(),
            upload_dir: None,
            body: Vec::new(),
            body_parsed: false,
            stream: None,
            stream_size: 0,
            endpoint: String::new(),
            method: RequestMethod::Get,
            present_format: None,
            action_method: None,
            host: String::new(),
            value_types: ValueTypes::new(),
        }
    }

    /// Builds a request from command-line arguments.
    ///
    /// `--method=`, `--endpoint=`, `--action=` and `--format=` set request
    /// metadata, `--header=Name: value` adds a header, and any other
    /// `--key=value` becomes a field.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut req = Self::new();
        for arg in args {
            let Some((key, value)) = arg.as_ref().strip_prefix("--").and_then(|a| a.split_once('=')) else {
                continue;
            };
            match key {
                "method"   => req.method = RequestMethod::from(value),
                "endpoint" => req.endpoint = value.to_owned(),
                "action"   => req.action_method = Some(value.to_owned()),
                "format"   => req.present_format = Some(value.to_owned()),
                "header"   => {
                    if let Some((name, val)) = value.split_once(':') {
                        req.set_header(name.trim(), val.trim());
                    }
                }
                _ if !key.is_empty() => {
                    req.data.insert(key.to_owned(), Value::String(value.to_owned()));
                }
                _ => {}
            }
        }
        req
    }

    // ── Builders ──────────────────────────────────────────────────────────────

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Raw request body. Parsed lazily, only for POST/PUT.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.body_parsed = false;
        self
    }

    /// A body the transport has already turned into fields. It stays
    /// readable through [`input_stream`](Request::input_stream) but is never
    /// parsed again.
    pub(crate) fn with_decoded_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.body_parsed = true;
        self
    }

    pub fn with_stream(mut self, stream: impl Read + Send + 'static, size: u64) -> Self {
        self.stream = Some(Box::new(stream));
        self.stream_size = size;
        self
    }

    /// Attaches a file the host has already stored, e.g. when the request
    /// does not come from the HTTP adapter.
    pub fn with_file(mut self, key: impl Into<String>, file: UploadedFile) -> Self {
        self.add_file(key, file);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<RequestMethod>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_present_format(mut self, format: impl Into<String>) -> Self {
        self.present_format = Some(format.into());
        self
    }

    /// Action hint used when the request falls through to the default controller.
    pub fn with_action_method(mut self, action: impl Into<String>) -> Self {
        self.action_method = Some(action.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    // ── Mutation ──────────────────────────────────────────────────────────────

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replaces a header, matching the name case-insensitively.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.to_owned()));
        if name.eq_ignore_ascii_case("cookie") {
            self.cookies = OnceCell::new();
        }
        self
    }

    pub fn add_file(&mut self, key: impl Into<String>, file: UploadedFile) -> &mut Self {
        self.files.insert(key.into(), file);
        self
    }

    /// Keeps spooled uploads on disk for as long as this request, or a
    /// detached copy of it, is alive.
    pub(crate) fn keep_upload_dir(&mut self, dir: Arc<TempDir>) {
        self.upload_dir = Some(dir);
    }

    /// Fields that win over query and body values, e.g. arguments derived
    /// from the path.
    pub fn set_priority_data(&mut self, data: Map<String, Value>) -> &mut Self {
        self.priority = data;
        self
    }

    pub fn register_value_type<F>(&mut self, name: impl Into<String>, converter: F) -> &mut Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.value_types.register(name, converter);
        self
    }

    // ── Field access ──────────────────────────────────────────────────────────

    /// Reads field `key` as `ty`.
    ///
    /// Priority data is consulted first, then the request fields (with the
    /// body merged in for POST/PUT). An absent field yields `default`, or the
    /// type's zero value when no default is given.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotImplemented`](crate::ErrorKind::NotImplemented) when a
    /// POST/PUT body is not JSON.
    pub fn get(&mut self, key: &str, ty: &ValueType, default: Option<Value>) -> Result<Value> {
        let value = self.get_or_none(key, ty)?;
        Ok(value.unwrap_or_else(|| default.filter(|d| !d.is_null()).unwrap_or_else(|| ty.zero())))
    }

    /// Like [`get`](Request::get) but `None` when the field is absent.
    pub fn get_or_none(&mut self, key: &str, ty: &ValueType) -> Result<Option<Value>> {
        let in_priority = self.priority.get(key).is_some_and(|v| !v.is_null());
        if !in_priority && self.method.has_body_fields() {
            self.parse_body()?;
        }

        let raw = self
            .priority
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| self.data.get(key).filter(|v| !v.is_null()));
        Ok(raw.map(|v| self.value_types.coerce(v, ty)))
    }

    pub fn get_int(&mut self, key: &str) -> Result<i64> {
        self.get(key, &ValueType::Int, None).map(|v| value::to_int(&v))
    }

    pub fn get_float(&mut self, key: &str) -> Result<f64> {
        self.get(key, &ValueType::Float, None).map(|v| value::to_float(&v))
    }

    pub fn get_string(&mut self, key: &str) -> Result<String> {
        self.get(key, &ValueType::String, None).map(|v| value::to_string(&v))
    }

    pub fn get_bool(&mut self, key: &str) -> Result<bool> {
        self.get(key, &ValueType::Bool, None).map(|v| value::to_bool(&v))
    }

    pub fn get_alpha(&mut self, key: &str) -> Result<String> {
        self.get(key, &ValueType::Alpha, None).map(|v| value::to_string(&v))
    }

    pub fn get_array(&mut self, key: &str) -> Result<Vec<Value>> {
        self.get(key, &ValueType::Array, None).map(|v| match v {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        })
    }

    pub fn get_object(&mut self, key: &str) -> Result<Value> {
        self.get(key, &ValueType::Object, None)
    }

    fn parse_body(&mut self) -> Result<()> {
        if self.body_parsed || self.body.is_empty() {
            return Ok(());
        }

        let is_json = self
            .header("Content-Type")
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"));
        if !is_json {
            return Err(Error::not_implemented("only JSON request bodies are supported"));
        }

        let parsed = match serde_json::from_slice::<Value>(&self.body) {
            Ok(value) => value::into_map(value),
            Err(e) => {
                debug!(error = %e, "ignoring malformed JSON body");
                Map::new()
            }
        };
        self.data.extend(parsed);
        self.body_parsed = true;
        Ok(())
    }

    // ── Metadata ──────────────────────────────────────────────────────────────

    /// The endpoint, `None` when empty or `/`.
    pub fn endpoint(&self) -> Option<&str> {
        match self.endpoint.as_str() {
            "" | "/" => None,
            e => Some(e),
        }
    }

    pub fn method(&self) -> &RequestMethod { &self.method }
    pub fn present_format(&self) -> Option<&str> { self.present_format.as_deref() }
    pub fn action_method(&self) -> Option<&str> { self.action_method.as_deref() }
    pub fn host(&self) -> &str { &self.host }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Cookie value from the `Cookie` header, URL-decoded. The header is
    /// parsed once.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get_or_init(|| self.header("Cookie").map(parse_cookie_header).unwrap_or_default())
            .get(name)
            .map(String::as_str)
    }

    /// `X-Forwarded-For` if present, else `REMOTE_ADDR`.
    pub fn client_ip(&self) -> Option<&str> {
        self.header("X-Forwarded-For")
            .filter(|ip| !ip.is_empty())
            .or_else(|| self.header("REMOTE_ADDR"))
    }

    pub fn user_agent(&self) -> &str {
        self.header("User-Agent").unwrap_or_default()
    }

    pub fn file(&self, key: &str) -> Option<&UploadedFile> {
        self.files.get(key)
    }

    /// Opens an uploaded file for reading.
    pub fn file_stream(&self, key: &str) -> Result<Option<File>> {
        match self.files.get(key) {
            Some(file) => Ok(Some(File::open(&file.local_path)?)),
            None => Ok(None),
        }
    }

    /// Takes the raw input stream. Without an explicit stream the body bytes
    /// are served instead.
    pub fn input_stream(&mut self) -> Box<dyn Read + Send> {
        match self.stream.take() {
            Some(stream) => stream,
            None => Box::new(Cursor::new(self.body.clone())),
        }
    }

    pub fn input_stream_size(&self) -> u64 {
        if self.stream_size > 0 {
            self.stream_size
        } else {
            self.body.len() as u64
        }
    }

    /// A copy of everything but the input stream.
    pub(crate) fn detached(&self) -> Self {
        Self {
            data: self.data.clone(),
            priority: self.priority.clone(),
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            files: self.files.clone(),
            upload_dir: self.upload_dir.clone(),
            body: self.body.clone(),
            body_parsed: self.body_parsed,
            stream: None,
            stream_size: self.stream_size,
            endpoint: self.endpoint.clone(),
            method: self.method.clone(),
            present_format: self.present_format.clone(),
            action_method: self.action_method.clone(),
            host: self.host.clone(),
            value_types: self.value_types.clone(),
        }
    }

    pub(crate) fn raw_endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Default for Request {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("data", &self.data)
            .field("priority", &self.priority)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("has_stream", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| {
            let value = urlencoding::decode(v).map_or_else(|_| v.to_owned(), |d| d.into_owned());
            (k.to_owned(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn json_post(body: &str) -> Request {
        Request::new()
            .with_method("POST")
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    #[test]
    fn absent_fields_fall_back_to_default_then_zero() {
        let mut req = Request::new();
        assert_eq!(req.get("n", &ValueType::Int, Some(json!(7))).unwrap(), json!(7));
        assert_eq!(req.get("n", &ValueType::Int, None).unwrap(), json!(0));
        assert_eq!(req.get("s", &ValueType::String, None).unwrap(), json!(""));
        assert_eq!(req.get_or_none("s", &ValueType::String).unwrap(), None);
    }

    #[test]
    fn priority_data_wins_over_fields() {
        let mut req = Request::new();
        req.set("id", "1");
        req.set_priority_data(Map::from_iter([("id".to_owned(), json!("42"))]));
        assert_eq!(req.get_int("id").unwrap(), 42);
    }

    #[test]
    fn json_body_is_merged_once() {
        let mut req = json_post(r#"{"a": 1, "b": "x"}"#);
        assert_eq!(req.get_int("a").unwrap(), 1);

        req.set("a", 2);
        assert_eq!(req.get_int("a").unwrap(), 2);
        assert_eq!(req.get_string("b").unwrap(), "x");
    }

    #[test]
    fn json_body_is_ignored_for_get() {
        let mut req = json_post(r#"{"a": 1}"#).with_method("GET");
        assert_eq!(req.get_or_none("a", &ValueType::Int).unwrap(), None);
    }

    #[test]
    fn malformed_json_body_contributes_nothing() {
        let mut req = json_post("{not json");
        req.set("a", "5");
        assert_eq!(req.get_int("a").unwrap(), 5);
        assert_eq!(req.get_int("b").unwrap(), 0);
    }

    #[test]
    fn json_content_type_parameters_are_ignored() {
        let mut req = json_post(r#"{"a": true}"#).with_header("content-type", "application/json; charset=utf-8");
        assert!(req.get_bool("a").unwrap());
    }

    #[test]
    fn form_body_is_not_implemented() {
        let mut req = Request::new()
            .with_method("PUT")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("a=1");
        let err = req.get_int("a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert!(req.get_int("a").is_err());
    }

    #[test]
    fn headers_and_cookies_are_case_insensitive_and_decoded() {
        let req = Request::new().with_header("cookie", "sid=a%20b; theme=dark");
        assert_eq!(req.header("COOKIE"), Some("sid=a%20b; theme=dark"));
        assert_eq!(req.cookie("sid"), Some("a b"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn replacing_cookie_header_resets_parsed_cookies() {
        let mut req = Request::new().with_header("Cookie", "a=1");
        assert_eq!(req.cookie("a"), Some("1"));
        req.set_header("Cookie", "a=2");
        assert_eq!(req.cookie("a"), Some("2"));
    }

    #[test]
    fn root_endpoint_is_none() {
        assert_eq!(Request::new().endpoint(), None);
        assert_eq!(Request::new().with_endpoint("/").endpoint(), None);
        assert_eq!(Request::new().with_endpoint("/a").endpoint(), Some("/a"));
    }

    #[test]
    fn command_line_arguments() {
        let mut req = Request::from_args([
            "app",
            "--method=do",
            "--endpoint=/jobs/run",
            "--header=X-Token: abc",
            "--limit=10",
        ]);
        assert_eq!(req.method(), &RequestMethod::Do);
        assert_eq!(req.endpoint(), Some("/jobs/run"));
        assert_eq!(req.header("x-token"), Some("abc"));
        assert_eq!(req.get_int("limit").unwrap(), 10);
    }

    #[test]
    fn input_stream_falls_back_to_body() {
        let mut req = Request::new().with_body("hello");
        assert_eq!(req.input_stream_size(), 5);
        let mut out = String::new();
        req.input_stream().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");

        let mut req = Request::new().with_stream(Cursor::new(b"xyz".to_vec()), 3);
        let mut out = Vec::new();
        req.input_stream().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"xyz");
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let req = Request::new().with_header("REMOTE_ADDR", "10.0.0.1");
        assert_eq!(req.client_ip(), Some("10.0.0.1"));
        let req = req.with_header("X-Forwarded-For", "1.2.3.4");
        assert_eq!(req.client_ip(), Some("1.2.3.4"));
    }

    #[test]
    fn custom_value_types_apply_to_fields() {
        let mut req = Request::new();
        req.set("tags", "a,b");
        req.register_value_type("csv", |v: &Value| {
            json!(value::to_string(v).split(',').collect::<Vec<_>>())
        });
        assert_eq!(req.get("tags", &ValueType::from("csv"), None).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn injected_files_can_be_streamed() {
        let dir = tempfile::tempdir().unwrap();
        let local_path = dir.path().join("upload");
        std::fs::write(&local_path, "a,b\n").unwrap();
        let upload = UploadedFile {
            local_path,
            original_name: "list.csv".into(),
            mime_type: "text/csv".into(),
            size: 4,
        };

        let req = Request::new().with_file("list", upload.clone());
        assert_eq!(req.file("list"), Some(&upload));
        assert!(req.file("other").is_none());
        assert!(req.file_stream("other").unwrap().is_none());

        let mut out = String::new();
        req.file_stream("list").unwrap().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "a,b\n");
    }

    #[test]
    fn decoded_bodies_are_not_parsed_again() {
        let mut req = Request::new()
            .with_method("POST")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_decoded_body("a=1");
        req.set("a", "1");
        assert_eq!(req.get_int("a").unwrap(), 1);
        assert_eq!(req.input_stream_size(), 3);
    }
}
