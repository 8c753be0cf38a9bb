//! Typed controller responses.
//!
//! A [`Response`] is the outcome of an action before any format has been
//! chosen. The common record (status, presenter override, headers, cookies)
//! wraps exactly one [`ResponseKind`]; presenters decide how each kind looks
//! on the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::value;

/// A lazily produced sequence of body chunks.
pub type ChunkIter = Box<dyn Iterator<Item = io::Result<Bytes>> + Send>;

// ── Response ─────────────────────────────────────────────────────────────────

/// An action outcome plus the metadata every variant shares.
///
/// ```rust
/// use serde_json::json;
/// use tessera::Response;
///
/// let page = Response::data(json!({"title": "Home"})).with_template("home");
/// let gone = Response::redirect("/login").with_http_code(303);
/// assert_eq!(page.http_code(), 0);
/// assert_eq!(gone.http_code(), 303);
/// ```
#[derive(Debug)]
pub struct Response {
    http_code: u16,
    presenter: Option<String>,
    headers: Vec<(String, String)>,
    cookies: BTreeMap<String, Cookie>,
    kind: ResponseKind,
}

/// The variant a [`Response`] carries. Exactly one is active.
#[derive(Debug)]
pub enum ResponseKind {
    Data(DataResponse),
    Error(ErrorResponse),
    Redirect(RedirectResponse),
    NoContent,
    Stream(StreamResponse),
    /// HTML presenters redirect, every other format renders the data.
    RedirectOrData(RedirectResponse, DataResponse),
    /// HTML presenters redirect, every other format renders the error.
    RedirectOrError(RedirectResponse, ErrorResponse),
}

impl Response {
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            http_code: 0,
            presenter: None,
            headers: Vec::new(),
            cookies: BTreeMap::new(),
            kind,
        }
    }

    /// Data for a template or a serializer. Lists and mappings are both kept
    /// as given.
    pub fn data(data: impl Into<Value>) -> Self {
        Self::new(ResponseKind::Data(DataResponse::new(data)))
    }

    /// A pre-rendered body that skips templating.
    pub fn complete(body: impl Into<String>) -> Self {
        Self::new(ResponseKind::Data(DataResponse::default().with_complete(body)))
    }

    /// An error with a message and no underlying error.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseKind::Error(ErrorResponse::new(message)))
    }

    /// An error response carrying `err`. The error's explicit status, if any,
    /// becomes the response code.
    pub fn from_error(err: Error) -> Self {
        let code = err.status();
        Self::new(ResponseKind::Error(ErrorResponse::from(err))).with_http_code(code)
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Self::new(ResponseKind::Redirect(RedirectResponse::new(url)))
    }

    pub fn no_content() -> Self {
        Self::new(ResponseKind::NoContent)
    }

    /// Streams `reader` as the body.
    pub fn stream(reader: impl Read + Send + 'static, content_type: impl Into<String>) -> Self {
        Self::from(StreamResponse::new(StreamSource::Reader(Box::new(reader)), content_type))
    }

    /// Streams a file from disk. The size comes from the file metadata; the
    /// file itself is opened only when the body is rendered.
    pub fn local_file(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let size = fs::metadata(&path)?.len();
        Ok(Self::from(
            StreamResponse::new(StreamSource::File(path), content_type).with_size(size),
        ))
    }

    /// A body produced chunk by chunk, flushed after each chunk.
    pub fn chunks<I>(chunks: I, content_type: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = io::Result<Bytes>>,
        I::IntoIter: Send + 'static,
    {
        Self::from(StreamResponse::new(
            StreamSource::Chunks(Box::new(chunks.into_iter())),
            content_type,
        ))
    }

    pub fn redirect_or_data(url: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(ResponseKind::RedirectOrData(
            RedirectResponse::new(url),
            DataResponse::new(data),
        ))
    }

    pub fn redirect_or_error(url: impl Into<String>, error: ErrorResponse) -> Self {
        Self::new(ResponseKind::RedirectOrError(RedirectResponse::new(url), error))
    }

    // ── Builders ──────────────────────────────────────────────────────────────

    pub fn with_http_code(mut self, code: u16) -> Self {
        self.http_code = code;
        self
    }

    /// Forces the output format for this response.
    pub fn with_presenter(mut self, format: impl Into<String>) -> Self {
        self.presenter = Some(format.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, cookie: Cookie) -> Self {
        self.cookies.insert(name.into(), cookie);
        self
    }

    /// Sets the template of a data-carrying response. No effect otherwise.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        if let Some(data) = self.data_mut() {
            data.template = Some(template.into());
        }
        self
    }

    /// Sets the layout template of a data-carrying response.
    pub fn with_base_template(mut self, template: impl Into<String>) -> Self {
        if let Some(data) = self.data_mut() {
            data.base_template = Some(template.into());
        }
        self
    }

    /// Sets the redirect message of a redirect-carrying response.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        match &mut self.kind {
            ResponseKind::Redirect(r)
            | ResponseKind::RedirectOrData(r, _)
            | ResponseKind::RedirectOrError(r, _) => r.message = message.into(),
            _ => {}
        }
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// The status to send: the explicit code, else the variant's own default
    /// (302 redirect, 204 no content, the error kind's status for errors),
    /// else 0 meaning the presenter decides.
    pub fn http_code(&self) -> u16 {
        if self.http_code > 0 {
            return self.http_code;
        }
        match &self.kind {
            ResponseKind::Redirect(_) => 302,
            ResponseKind::NoContent => 204,
            ResponseKind::Error(e) | ResponseKind::RedirectOrError(_, e) => e.derived_code(),
            _ => 0,
        }
    }

    /// The code set explicitly, 0 when none was.
    pub fn explicit_http_code(&self) -> u16 {
        self.http_code
    }

    pub fn set_http_code(&mut self, code: u16) {
        self.http_code = code;
    }

    pub fn presenter(&self) -> Option<&str> {
        self.presenter.as_deref().filter(|p| !p.is_empty())
    }

    pub fn has_presenter(&self) -> bool {
        self.presenter().is_some()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn cookies(&self) -> &BTreeMap<String, Cookie> {
        &self.cookies
    }

    /// Adds cookies the response does not already set.
    pub fn merge_cookies<'a>(&mut self, cookies: impl IntoIterator<Item = (&'a String, &'a Cookie)>) {
        for (name, cookie) in cookies {
            self.cookies.entry(name.clone()).or_insert_with(|| cookie.clone());
        }
    }

    pub fn kind(&self) -> &ResponseKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ResponseKind {
        &mut self.kind
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ResponseKind::Error(_) | ResponseKind::RedirectOrError(..))
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.kind, ResponseKind::Redirect(_))
    }

    /// The data part of a `Data` or `RedirectOrData` response.
    pub fn data_ref(&self) -> Option<&DataResponse> {
        match &self.kind {
            ResponseKind::Data(d) | ResponseKind::RedirectOrData(_, d) => Some(d),
            _ => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut DataResponse> {
        match &mut self.kind {
            ResponseKind::Data(d) | ResponseKind::RedirectOrData(_, d) => Some(d),
            _ => None,
        }
    }

    pub fn error_ref(&self) -> Option<&ErrorResponse> {
        match &self.kind {
            ResponseKind::Error(e) | ResponseKind::RedirectOrError(_, e) => Some(e),
            _ => None,
        }
    }

    /// Splits into the shared record and the variant.
    pub fn into_parts(self) -> (ResponseParts, ResponseKind) {
        let parts = ResponseParts {
            http_code: self.http_code,
            headers: self.headers,
            cookies: self.cookies,
        };
        (parts, self.kind)
    }

    /// Replaces the variant, keeping status, headers and cookies.
    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }
}

/// The shared part of a [`Response`] once the variant has been taken out.
#[derive(Debug, Default)]
pub struct ResponseParts {
    pub http_code: u16,
    pub headers: Vec<(String, String)>,
    pub cookies: BTreeMap<String, Cookie>,
}

impl From<DataResponse> for Response {
    fn from(d: DataResponse) -> Self { Self::new(ResponseKind::Data(d)) }
}

impl From<ErrorResponse> for Response {
    fn from(e: ErrorResponse) -> Self {
        let code = e.error.as_ref().map_or(0, Error::status);
        Self::new(ResponseKind::Error(e)).with_http_code(code)
    }
}

impl From<RedirectResponse> for Response {
    fn from(r: RedirectResponse) -> Self { Self::new(ResponseKind::Redirect(r)) }
}

impl From<StreamResponse> for Response {
    fn from(s: StreamResponse) -> Self { Self::new(ResponseKind::Stream(s)) }
}

impl From<Error> for Response {
    fn from(e: Error) -> Self { Self::from_error(e) }
}

// ── Variants ──────────────────────────────────────────────────────────────────

/// Payload for templates and serializers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataResponse {
    data: Value,
    template: Option<String>,
    base_template: Option<String>,
    complete: Option<String>,
}

impl DataResponse {
    /// `null` is stored as an empty mapping.
    pub fn new(data: impl Into<Value>) -> Self {
        let data = match data.into() {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self { data, ..Self::default() }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_base_template(mut self, template: impl Into<String>) -> Self {
        self.base_template = Some(template.into());
        self
    }

    pub fn with_complete(mut self, body: impl Into<String>) -> Self {
        self.complete = Some(body.into());
        self
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// True for `null`, an empty list or an empty mapping.
    pub fn is_empty(&self) -> bool {
        match &self.data {
            Value::Null => true,
            Value::Array(a) => a.is_empty(),
            Value::Object(m) => m.is_empty(),
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Sets a key. List-shaped data is turned into a mapping first.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if !self.data.is_object() {
            self.data = Value::Object(value::into_map(self.data.take()));
        }
        if let Value::Object(map) = &mut self.data {
            map.insert(key.into(), value.into());
        }
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref().filter(|t| !t.is_empty())
    }

    pub fn set_template(&mut self, template: impl Into<String>) {
        self.template = Some(template.into());
    }

    pub fn base_template(&self) -> Option<&str> {
        self.base_template.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_base_template(&self) -> bool {
        self.base_template().is_some()
    }

    pub fn complete(&self) -> Option<&str> {
        self.complete.as_deref()
    }

    pub fn has_complete(&self) -> bool {
        self.complete.is_some()
    }
}

/// An error outcome.
#[derive(Debug)]
pub struct ErrorResponse {
    message: String,
    error: Option<Error>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), error: None }
    }

    /// Attaches the underlying error. An empty message takes the error's.
    pub fn with_error(mut self, error: Error) -> Self {
        if self.message.is_empty() {
            self.message = error.message().to_owned();
        }
        self.error = Some(error);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn derived_code(&self) -> u16 {
        self.error.as_ref().map_or(0, Error::default_status)
    }
}

impl From<Error> for ErrorResponse {
    fn from(e: Error) -> Self {
        Self::new("").with_error(e)
    }
}

/// A redirect to `url`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RedirectResponse {
    url: String,
    message: String,
}

impl RedirectResponse {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), message: String::new() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Where a stream body comes from.
pub enum StreamSource {
    Reader(Box<dyn Read + Send>),
    /// Opened at render time.
    File(PathBuf),
    Chunks(ChunkIter),
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reader(_)  => f.write_str("Reader(..)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Chunks(_)  => f.write_str("Chunks(..)"),
        }
    }
}

/// A byte stream sent as-is.
#[derive(Debug)]
pub struct StreamResponse {
    source: StreamSource,
    content_type: String,
    filename: Option<String>,
    size: Option<u64>,
}

impl StreamResponse {
    pub fn new(source: StreamSource, content_type: impl Into<String>) -> Self {
        Self {
            source,
            content_type: content_type.into(),
            filename: None,
            size: None,
        }
    }

    /// Offers the body as a download named `filename`.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Declared size. Sent as `Content-Length`, and the body stops there.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn content_type(&self) -> &str { &self.content_type }
    pub fn filename(&self) -> Option<&str> { self.filename.as_deref() }
    pub fn size(&self) -> Option<u64> { self.size }

    pub fn into_source(self) -> StreamSource {
        self.source
    }
}

// ── Cookies ───────────────────────────────────────────────────────────────────

/// Attributes of a cookie to set on the client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cookie {
    pub value: String,
    pub expire: Option<DateTime<Utc>>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), ..Self::default() }
    }

    pub fn with_expire(mut self, expire: DateTime<Utc>) -> Self {
        self.expire = Some(expire);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// `Set-Cookie` header value for this cookie under `name`.
    pub fn to_header_value(&self, name: &str) -> String {
        let mut out = format!("{name}={}", urlencoding::encode(&self.value));
        if let Some(expire) = self.expire {
            out.push_str(&format!("; Expires={}", expire.format("%a, %d %b %Y %H:%M:%S GMT")));
        }
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            out.push_str(&format!("; Path={path}"));
        }
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("; Domain={domain}"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn explicit_code_wins() {
        assert_eq!(Response::redirect("/x").with_http_code(301).http_code(), 301);
        assert_eq!(Response::no_content().with_http_code(200).http_code(), 200);
    }

    #[test]
    fn variant_defaults() {
        assert_eq!(Response::redirect("/x").http_code(), 302);
        assert_eq!(Response::no_content().http_code(), 204);
        assert_eq!(Response::data(json!({})).http_code(), 0);
        assert_eq!(Response::error("boom").http_code(), 0);
        assert_eq!(Response::redirect_or_data("/x", json!({})).http_code(), 0);
    }

    #[test]
    fn error_code_derives_from_error_kind() {
        let resp = Response::from_error(Error::not_found("no such user"));
        assert_eq!(resp.explicit_http_code(), 0);
        assert_eq!(resp.http_code(), 404);

        let resp = Response::from_error(Error::bad_request("x").with_status(418));
        assert_eq!(resp.explicit_http_code(), 418);
        assert_eq!(resp.http_code(), 418);

        let resp = Response::redirect_or_error("/form", Error::invalid_argument("bad", "email").into());
        assert_eq!(resp.http_code(), 422);
    }

    #[test]
    fn error_message_defaults_to_underlying_error() {
        let err = ErrorResponse::from(Error::conflict("taken"));
        assert_eq!(err.message(), "taken");

        let err = ErrorResponse::new("custom").with_error(Error::conflict("taken"));
        assert_eq!(err.message(), "custom");
    }

    #[test]
    fn template_helpers_only_touch_data_variants() {
        let resp = Response::data(json!({"a": 1})).with_template("page").with_base_template("layout");
        let data = resp.data_ref().unwrap();
        assert_eq!(data.template(), Some("page"));
        assert!(data.has_base_template());

        let resp = Response::error("x").with_template("ignored");
        assert!(resp.data_ref().is_none());
    }

    #[test]
    fn data_set_turns_lists_into_mappings() {
        let mut data = DataResponse::new(json!(["a"]));
        data.set("k", "v");
        assert_eq!(data.data(), &json!({"0": "a", "k": "v"}));
        assert!(DataResponse::new(Value::Null).is_empty());
    }

    #[test]
    fn merged_cookies_do_not_override() {
        let mut resp = Response::data(json!({})).with_cookie("a", Cookie::new("mine"));
        let extra = BTreeMap::from([
            ("a".to_owned(), Cookie::new("theirs")),
            ("b".to_owned(), Cookie::new("new")),
        ]);
        resp.merge_cookies(&extra);
        assert_eq!(resp.cookies()["a"].value, "mine");
        assert_eq!(resp.cookies()["b"].value, "new");
    }

    #[test]
    fn local_file_takes_size_from_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"0123456789").unwrap();

        let resp = Response::local_file(file.path(), "text/plain").unwrap();
        match resp.kind() {
            ResponseKind::Stream(s) => assert_eq!(s.size(), Some(10)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Response::local_file("/definitely/not/here", "text/plain").is_err());
    }

    #[test]
    fn cookie_header_value() {
        let cookie = Cookie::new("a b")
            .with_expire(Utc.with_ymd_and_hms(2025, 3, 1, 14, 5, 0).unwrap())
            .with_path("/")
            .secure()
            .http_only();
        assert_eq!(
            cookie.to_header_value("sid"),
            "sid=a%20b; Expires=Sat, 01 Mar 2025 14:05:00 GMT; Path=/; Secure; HttpOnly"
        );
    }
}
