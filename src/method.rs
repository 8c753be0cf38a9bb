//! Request method as a typed enum.
//!
//! Covers the methods a controller can hook into, plus the synthetic `DO`
//! method used for non-web invocations (command line, cron). Parsing is
//! case-insensitive so that `post`, `POST` and `Post` land on the same
//! variant. Anything else is kept verbatim in [`RequestMethod::Other`].

use std::fmt;
use std::str::FromStr;

/// The method of an incoming request.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum RequestMethod {
    Delete,
    #[default]
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    /// Non-web invocation.
    Do,
    Other(String),
}

impl RequestMethod {
    /// Returns the uppercase representation (e.g. `"GET"`).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Delete   => "DELETE",
            Self::Get      => "GET",
            Self::Head     => "HEAD",
            Self::Options  => "OPTIONS",
            Self::Patch    => "PATCH",
            Self::Post     => "POST",
            Self::Put      => "PUT",
            Self::Do       => "DO",
            Self::Other(m) => m,
        }
    }

    /// Lower-case prefix used to build controller method names
    /// (`POST` + `login` → `postLogin`). `None` for unrecognised methods.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::Delete   => Some("delete"),
            Self::Get      => Some("get"),
            Self::Head     => Some("head"),
            Self::Options  => Some("options"),
            Self::Patch    => Some("patch"),
            Self::Post     => Some("post"),
            Self::Put      => Some("put"),
            Self::Do       => Some("do"),
            Self::Other(_) => None,
        }
    }

    /// Methods whose body carries form or JSON fields.
    pub fn has_body_fields(&self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

impl FromStr for RequestMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_ascii_uppercase().as_str() {
            "DELETE"  => Self::Delete,
            "GET"     => Self::Get,
            "HEAD"    => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH"   => Self::Patch,
            "POST"    => Self::Post,
            "PUT"     => Self::Put,
            "DO"      => Self::Do,
            _         => Self::Other(s.to_owned()),
        };
        Ok(method)
    }
}

impl From<&str> for RequestMethod {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(RequestMethod::from("post"), RequestMethod::Post);
        assert_eq!(RequestMethod::from("Patch"), RequestMethod::Patch);
        assert_eq!(RequestMethod::from("do"), RequestMethod::Do);
    }

    #[test]
    fn unknown_methods_have_no_prefix() {
        let trace = RequestMethod::from("TRACE");
        assert_eq!(trace, RequestMethod::Other("TRACE".into()));
        assert_eq!(trace.prefix(), None);
        assert_eq!(trace.as_str(), "TRACE");
    }

    #[test]
    fn only_post_and_put_carry_body_fields() {
        assert!(RequestMethod::Post.has_body_fields());
        assert!(RequestMethod::Put.has_body_fields());
        assert!(!RequestMethod::Patch.has_body_fields());
        assert!(!RequestMethod::Get.has_body_fields());
    }
}
