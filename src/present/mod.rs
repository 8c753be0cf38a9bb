//! Presenters: turning a [`Response`] into status, headers and body.
//!
//! ```text
//! Response ──► Builder::build(format) ──► Presenter::present ──► Output
//!                 │                          │
//!                 │ copy headers/cookies     ├─ data / error / redirect   (per format)
//!                 │                          └─ stream / no_content       (shared)
//!                 └─ status still unset? → 200
//! ```
//!
//! Every format is a [`Presenter`] registered in the [`Builder`] under its
//! format key. The built [`Output`] is transport-ready: the HTTP adapter and
//! the command-line writer both consume it.

mod html;
mod json;
mod raw;
mod xml;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::response::{
    ChunkIter, Cookie, DataResponse, ErrorResponse, RedirectResponse, Response, ResponseKind,
    StreamResponse, StreamSource,
};

pub use html::HtmlPresenter;
pub use json::JsonPresenter;
pub use raw::RawPresenter;
pub use xml::XmlPresenter;

/// Block size used when forwarding stream bodies.
pub const STREAM_BLOCK_SIZE: usize = 4096;

// ── Output ────────────────────────────────────────────────────────────────────

/// The body of a built [`Output`].
pub enum Body {
    None,
    Text(String),
    /// Read in [`STREAM_BLOCK_SIZE`] blocks, stopping after `limit` bytes
    /// when one is set. The reader is dropped, and so closed, once drained.
    Stream {
        reader: Box<dyn Read + Send>,
        limit: Option<u64>,
    },
    /// Forwarded one chunk at a time.
    Chunks(ChunkIter),
}

impl Body {
    /// Feeds the body to `sink` chunk by chunk and returns the number of
    /// bytes forwarded. Single-use: the body is consumed.
    pub fn for_each_chunk<F>(self, mut sink: F) -> io::Result<u64>
    where
        F: FnMut(Bytes) -> io::Result<()>,
    {
        match self {
            Self::None => Ok(0),
            Self::Text(text) => {
                let len = text.len() as u64;
                if len > 0 {
                    sink(Bytes::from(text))?;
                }
                Ok(len)
            }
            Self::Stream { mut reader, limit } => {
                let limit = limit.filter(|l| *l > 0);
                let mut sent: u64 = 0;
                let mut block = vec![0u8; STREAM_BLOCK_SIZE];
                loop {
                    let want = match limit {
                        Some(cap) if sent >= cap => break,
                        Some(cap) => STREAM_BLOCK_SIZE.min(usize::try_from(cap - sent).unwrap_or(STREAM_BLOCK_SIZE)),
                        None => STREAM_BLOCK_SIZE,
                    };
                    let n = match reader.read(&mut block[..want]) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    };
                    sink(Bytes::copy_from_slice(&block[..n]))?;
                    sent += n as u64;
                }
                drop(reader);
                Ok(sent)
            }
            Self::Chunks(chunks) => {
                let mut sent = 0;
                for chunk in chunks {
                    let chunk = chunk?;
                    sent += chunk.len() as u64;
                    sink(chunk)?;
                }
                Ok(sent)
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None                => f.write_str("None"),
            Self::Text(t)             => f.debug_tuple("Text").field(t).finish(),
            Self::Stream { limit, .. } => f.debug_struct("Stream").field("limit", limit).finish_non_exhaustive(),
            Self::Chunks(_)           => f.write_str("Chunks(..)"),
        }
    }
}

/// A rendered response, ready to be written to a transport.
#[derive(Debug)]
pub struct Output {
    status: u16,
    status_line: String,
    headers: Vec<(String, String)>,
    cookies: BTreeMap<String, Cookie>,
    body: Body,
    format: String,
}

impl Output {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_line: String::new(),
            headers: Vec::new(),
            cookies: BTreeMap::new(),
            body: Body::None,
            format: format.into(),
        }
    }

    pub fn status(&self) -> u16 { self.status }
    pub fn status_line(&self) -> &str { &self.status_line }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn cookies(&self) -> &BTreeMap<String, Cookie> { &self.cookies }
    pub fn body(&self) -> &Body { &self.body }
    /// Key of the presenter that built this output.
    pub fn format(&self) -> &str { &self.format }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Adds or updates a header.
    ///
    /// With `replace`, an existing header of the same name (any case) is
    /// overwritten, or removed when `value` is `None` or empty. Without it,
    /// an existing header is left alone. Empty values are never appended.
    pub fn append_header(&mut self, name: &str, value: Option<&str>, replace: bool) {
        let value = value.filter(|v| !v.is_empty());
        let existing = self.headers.iter().position(|(k, _)| k.eq_ignore_ascii_case(name));

        match (existing, value) {
            (Some(i), Some(v)) if replace => self.headers[i] = (name.to_owned(), v.to_owned()),
            (Some(i), None) if replace    => {
                self.headers.remove(i);
            }
            (Some(_), _)                  => {}
            (None, Some(v))               => self.headers.push((name.to_owned(), v.to_owned())),
            (None, None)                  => {}
        }
    }

    /// Sets the status code. The status line uses the standard reason
    /// phrase, or `default_line` for codes without one.
    pub fn set_status(&mut self, code: u16, default_line: &str) {
        self.status = code;
        self.status_line = match http::StatusCode::from_u16(code).ok().and_then(|s| s.canonical_reason()) {
            Some(reason) => format!("{code} {reason}"),
            None => default_line.to_owned(),
        };
    }

    /// Whether a presenter has set a status yet.
    pub fn has_status(&self) -> bool {
        !self.status_line.is_empty()
    }

    pub fn set_text(&mut self, body: impl Into<String>) {
        self.body = Body::Text(body.into());
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    pub fn set_cookies(&mut self, cookies: BTreeMap<String, Cookie>) {
        self.cookies = cookies;
    }

    /// Takes the body, leaving [`Body::None`] behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::None)
    }

    /// The whole body as a string. Stream and chunk bodies are drained, so
    /// a second call on such an output returns an empty string.
    pub fn materialize(&mut self) -> Result<String> {
        if let Body::Text(text) = &self.body {
            return Ok(text.clone());
        }
        let mut buf = Vec::new();
        self.take_body().for_each_chunk(|chunk| {
            buf.extend_from_slice(&chunk);
            Ok(())
        })?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Writes the body to `writer`, flushing after every chunk. Returns the
    /// number of bytes written.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<u64> {
        let written = self.take_body().for_each_chunk(|chunk| {
            writer.write_all(&chunk)?;
            writer.flush()
        })?;
        writer.flush()?;
        Ok(written)
    }
}

// ── Presenter ─────────────────────────────────────────────────────────────────

/// A renderer for one output format.
///
/// Implementors fill in [`redirect`](Presenter::redirect),
/// [`data`](Presenter::data) and [`error`](Presenter::error); streams and
/// empty responses look the same in every format. `code` is the response's
/// resolved status, 0 when still undecided.
pub trait Presenter: Send + Sync {
    /// The format key, e.g. `"json"`.
    fn format(&self) -> &str;

    fn redirect(&self, cx: &AppContext, out: &mut Output, code: u16, redirect: RedirectResponse) -> Result<()>;

    fn data(&self, cx: &AppContext, out: &mut Output, code: u16, data: DataResponse) -> Result<()>;

    fn error(&self, cx: &AppContext, out: &mut Output, code: u16, error: ErrorResponse) -> Result<()>;

    fn no_content(&self, _cx: &AppContext, out: &mut Output, code: u16) -> Result<()> {
        out.set_status(if code == 0 { 204 } else { code }, "204 No Content");
        Ok(())
    }

    fn stream(&self, _cx: &AppContext, out: &mut Output, code: u16, stream: StreamResponse) -> Result<()> {
        out.append_header("Content-Type", Some(stream.content_type()), true);
        if let Some(size) = stream.size().filter(|s| *s > 0) {
            out.append_header("Content-Length", Some(&size.to_string()), true);
        }
        if let Some(name) = stream.filename() {
            out.append_header("Content-Disposition", Some(&attachment(name)), false);
        }
        out.append_header("Content-Transfer-Encoding", Some("binary"), false);
        out.set_status(if code == 0 { 200 } else { code }, "200 OK");

        let limit = stream.size();
        let body = match stream.into_source() {
            StreamSource::Reader(reader) => Body::Stream { reader, limit },
            StreamSource::File(path)     => Body::Stream { reader: Box::new(File::open(path)?), limit },
            StreamSource::Chunks(chunks) => Body::Chunks(chunks),
        };
        out.set_body(body);
        Ok(())
    }

    /// Dispatches on the response variant. Hybrid variants render their
    /// data or error part.
    fn present(&self, cx: &AppContext, out: &mut Output, response: Response) -> Result<()> {
        let code = response.http_code();
        let (_, kind) = response.into_parts();
        match kind {
            ResponseKind::Stream(s)                            => self.stream(cx, out, code, s),
            ResponseKind::Data(d) | ResponseKind::RedirectOrData(_, d) => self.data(cx, out, code, d),
            ResponseKind::Redirect(r)                          => self.redirect(cx, out, code, r),
            ResponseKind::NoContent                            => self.no_content(cx, out, code),
            ResponseKind::Error(e) | ResponseKind::RedirectOrError(_, e) => self.error(cx, out, code, e),
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Picks the presenter for an output format.
///
/// `html`, `json`, `xml` and `raw` are registered out of the box; more can be
/// added with [`Builder::register`]. An empty format means the default
/// format (`html` unless changed).
#[derive(Clone)]
pub struct Builder {
    presenters: HashMap<String, Arc<dyn Presenter>>,
    default_format: String,
}

impl Builder {
    pub fn new() -> Self {
        let mut builder = Self {
            presenters: HashMap::new(),
            default_format: HtmlPresenter::FORMAT.to_owned(),
        };
        builder.register(HtmlPresenter);
        builder.register(JsonPresenter);
        builder.register(XmlPresenter);
        builder.register(RawPresenter);
        builder
    }

    /// Registers `presenter` under its own format key, replacing any
    /// presenter already registered there.
    pub fn register(&mut self, presenter: impl Presenter + 'static) -> &mut Self {
        self.presenters.insert(presenter.format().to_owned(), Arc::new(presenter));
        self
    }

    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    pub fn default_format(&self) -> &str {
        &self.default_format
    }

    pub fn has_format(&self, format: &str) -> bool {
        self.presenters.contains_key(format)
    }

    /// The presenter for `format`.
    ///
    /// # Errors
    ///
    /// An unknown format is a configuration error.
    pub fn create(&self, format: &str) -> Result<Arc<dyn Presenter>> {
        let format = if format.is_empty() { self.default_format.as_str() } else { format };
        self.presenters
            .get(format)
            .cloned()
            .ok_or_else(|| Error::internal(format!("Unknown output format: {format}")))
    }

    /// Renders `response` in `format`.
    pub fn build(&self, cx: &AppContext, response: Response, format: &str) -> Result<Output> {
        let presenter = self.create(format)?;
        let mut out = Output::new(presenter.format());

        for (name, value) in response.headers() {
            out.append_header(name, Some(value), true);
        }
        out.set_cookies(response.cookies().clone());

        presenter.present(cx, &mut out, response)?;

        if !out.has_status() {
            out.set_status(200, "200 OK");
        }
        Ok(out)
    }
}

impl Default for Builder {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut formats: Vec<_> = self.presenters.keys().collect();
        formats.sort();
        f.debug_struct("Builder")
            .field("formats", &formats)
            .field("default_format", &self.default_format)
            .finish()
    }
}

/// Error frames shown in trace mode: empty unless trace mode is on and the
/// response carries an underlying error.
pub(crate) fn trace_frames(cx: &AppContext, error: &ErrorResponse) -> Vec<String> {
    match error.error() {
        Some(err) if cx.trace_errors() => err.traceback(),
        _ => Vec::new(),
    }
}

/// `attachment; filename="..."` with the name as a quoted string. Control
/// characters are dropped so the header stays on one line.
fn attachment(filename: &str) -> String {
    let mut quoted = String::with_capacity(filename.len());
    for c in filename.chars().filter(|c| !c.is_control()) {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    format!("attachment; filename=\"{quoted}\"")
}
