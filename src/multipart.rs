//! `multipart/form-data` bodies.
//!
//! The HTTP adapter splits a multipart body into parts. Text parts become
//! request fields; file parts are spooled to a per-request temporary
//! directory and exposed through [`Request::file`](crate::Request::file).

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::request::{Request, UploadedFile};

/// One part of a multipart body, borrowing its payload.
#[derive(Debug, PartialEq)]
pub(crate) struct Part<'a> {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

/// The `boundary` parameter of a `multipart/form-data` content type.
pub(crate) fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media = params.next()?.trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_owned())
            .filter(|b| !b.is_empty())
    })
}

/// Splits `body` on `boundary`.
///
/// # Errors
///
/// [`ErrorKind::BadRequest`](crate::ErrorKind::BadRequest) when the body is
/// truncated or a part has no field name.
pub(crate) fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    let first = format!("--{boundary}");
    let next = format!("\r\n--{boundary}");
    let malformed = || Error::bad_request("malformed multipart body");

    let start = find(body, first.as_bytes(), 0).ok_or_else(malformed)?;
    let mut pos = start + first.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            break;
        }
        let head_start = pos + if rest.starts_with(b"\r\n") { 2 } else { 0 };
        let head_end = find(body, b"\r\n\r\n", head_start).ok_or_else(malformed)?;
        let data_start = head_end + 4;
        let data_end = find(body, next.as_bytes(), data_start).ok_or_else(malformed)?;

        parts.push(Part::from_head(&body[head_start..head_end], &body[data_start..data_end])?);
        pos = data_end + next.len();
    }

    Ok(parts)
}

impl<'a> Part<'a> {
    fn from_head(head: &[u8], data: &'a [u8]) -> Result<Self> {
        let head = String::from_utf8_lossy(head);
        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        for line in head.split("\r\n") {
            let Some((header, value)) = line.split_once(':') else { continue };
            let header = header.trim();
            if header.eq_ignore_ascii_case("Content-Disposition") {
                for attr in value.split(';').map(str::trim) {
                    let Some((key, val)) = attr.split_once('=') else { continue };
                    let val = val.trim().trim_matches('"').to_owned();
                    match key.trim() {
                        "name"     => name = Some(val),
                        "filename" => filename = Some(val),
                        _ => {}
                    }
                }
            } else if header.eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value.trim().to_owned());
            }
        }

        let name = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::bad_request("multipart part without a field name"))?;
        Ok(Self { name, filename, content_type, data })
    }
}

/// Fills `request` from a multipart body. File parts are written below a
/// temporary directory that lives as long as the request does.
pub(crate) fn apply(request: &mut Request, body: &[u8], boundary: &str) -> Result<()> {
    let parts = parse(body, boundary)?;
    let mut spool: Option<Arc<TempDir>> = None;

    for (index, part) in parts.into_iter().enumerate() {
        let Some(original_name) = part.filename else {
            request.set(part.name, String::from_utf8_lossy(part.data).into_owned());
            continue;
        };
        // browsers send an empty file part for an untouched file input
        if original_name.is_empty() && part.data.is_empty() {
            continue;
        }

        let dir = match &spool {
            Some(dir) => Arc::clone(dir),
            None => {
                let dir = Arc::new(tempfile::Builder::new().prefix("tessera-upload").tempdir()?);
                request.keep_upload_dir(Arc::clone(&dir));
                spool = Some(Arc::clone(&dir));
                dir
            }
        };
        let local_path = dir.path().join(format!("part-{index}"));
        fs::write(&local_path, part.data)?;

        request.add_file(part.name, UploadedFile {
            local_path,
            original_name,
            mime_type: part.content_type.unwrap_or_else(|| "application/octet-stream".to_owned()),
            size: part.data.len() as u64,
        });
    }
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}
