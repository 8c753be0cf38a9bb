//! Endpoint index.
//!
//! Literal patterns match exactly. A pattern ending in `*` matches every
//! endpoint that starts with what precedes the star, and hands the remainder
//! to the controller. No parameters, no regexes. You register a pattern, you
//! get a controller and a method hint. That is all.
//!
//! ```text
//! "/login"    matches "/login"                   rest ""
//! "/files/*"  matches "/files/a/b.txt"           rest "a/b.txt"
//!             matches "/files"                   rest ""
//! "/api*"     matches "/api/v1/users"            rest "/v1/users"
//! ```
//!
//! An exact match always wins. Among prefix patterns the longest applicable
//! one wins; ties go to the pattern registered first.

use crate::method::RequestMethod;

struct Route<T> {
    pattern: String,
    target: T,
    hint: String,
}

/// A successful lookup.
#[derive(Debug, PartialEq)]
pub struct RouteMatch<'a, T> {
    pub target: &'a T,
    /// Method-name hint registered with the pattern.
    pub hint: &'a str,
    /// Part of the endpoint left after the matched prefix.
    pub rest: &'a str,
}

/// Pattern → (target, method hint). Built once at startup, read-only after.
pub struct RouteIndex<T> {
    routes: Vec<Route<T>>,
}

impl<T> RouteIndex<T> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `pattern`. Registering the same pattern again replaces the
    /// earlier target but keeps its position.
    pub fn insert(&mut self, pattern: impl Into<String>, target: T, hint: impl Into<String>) {
        let pattern = pattern.into();
        let hint = hint.into();
        match self.routes.iter_mut().find(|r| r.pattern == pattern) {
            Some(route) => {
                route.target = target;
                route.hint = hint;
            }
            None => self.routes.push(Route { pattern, target, hint }),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn lookup<'a>(&'a self, endpoint: &'a str) -> Option<RouteMatch<'a, T>> {
        if let Some(route) = self.routes.iter().find(|r| r.pattern == endpoint) {
            return Some(RouteMatch { target: &route.target, hint: &route.hint, rest: "" });
        }

        let mut best: Option<(usize, &Route<T>, &str)> = None;
        for route in &self.routes {
            let Some(base) = route.pattern.strip_suffix('*') else { continue };

            let rest = if let Some(rest) = endpoint.strip_prefix(base) {
                rest
            } else if base.len() > 1 && base.strip_suffix('/') == Some(endpoint) {
                // "/files/*" also covers "/files" itself
                ""
            } else {
                continue;
            };

            if best.is_none_or(|(len, _, _)| base.len() > len) {
                best = Some((base.len(), route, rest));
            }
        }

        best.map(|(_, route, rest)| RouteMatch { target: &route.target, hint: &route.hint, rest })
    }
}

impl<T> Default for RouteIndex<T> {
    fn default() -> Self { Self::new() }
}

/// Strips the application prefix and makes sure the endpoint starts with
/// `/`. An empty endpoint is `/`.
pub fn normalize_endpoint(endpoint: &str, app_prefix: &str) -> String {
    if endpoint.is_empty() {
        return "/".to_owned();
    }
    let endpoint = endpoint.strip_prefix(app_prefix).unwrap_or(endpoint);
    if endpoint.starts_with('/') {
        endpoint.to_owned()
    } else {
        format!("/{endpoint}")
    }
}

/// Combines the request method with a method hint: `POST` + `login` →
/// `postLogin`. Unrecognised methods fall back to the `get` prefix.
pub fn build_method_name(method: &RequestMethod, hint: &str) -> String {
    let prefix = method.prefix().unwrap_or("get");
    let hint = hint.to_lowercase();
    let mut chars = hint.chars();
    match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_uppercase(), chars.as_str()),
        None => prefix.to_owned(),
    }
}

/// One or several endpoint patterns.
pub trait IntoEndpoints {
    fn into_endpoints(self) -> Vec<String>;
}

impl IntoEndpoints for &str {
    fn into_endpoints(self) -> Vec<String> { vec![self.to_owned()] }
}

impl IntoEndpoints for String {
    fn into_endpoints(self) -> Vec<String> { vec![self] }
}

impl IntoEndpoints for &[&str] {
    fn into_endpoints(self) -> Vec<String> { self.iter().map(|e| (*e).to_owned()).collect() }
}

impl<const N: usize> IntoEndpoints for [&str; N] {
    fn into_endpoints(self) -> Vec<String> { self.iter().map(|e| (*e).to_owned()).collect() }
}

impl IntoEndpoints for Vec<String> {
    fn into_endpoints(self) -> Vec<String> { self }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> RouteIndex<&'static str> {
        let mut routes = RouteIndex::new();
        routes.insert("/files/*", "files", "download");
        routes.insert("/login", "auth", "login");
        routes.insert("/log*", "logs", "");
        routes.insert("/files/private/*", "private", "");
        routes
    }

    #[test]
    fn prefix_match_leaves_the_rest() {
        let routes = index();
        let m = routes.lookup("/files/a/b.txt").unwrap();
        assert_eq!((*m.target, m.hint, m.rest), ("files", "download", "a/b.txt"));

        let m = routes.lookup("/files").unwrap();
        assert_eq!((*m.target, m.rest), ("files", ""));
    }

    #[test]
    fn exact_beats_prefix() {
        let routes = index();
        assert_eq!(*routes.lookup("/login").unwrap().target, "auth");
        assert_eq!(*routes.lookup("/logout").unwrap().target, "logs");
    }

    #[test]
    fn longest_prefix_wins() {
        let routes = index();
        let m = routes.lookup("/files/private/x").unwrap();
        assert_eq!((*m.target, m.rest), ("private", "x"));
    }

    #[test]
    fn misses() {
        let routes = index();
        assert!(routes.lookup("/").is_none());
        assert!(routes.lookup("/filesystem").is_none());
    }

    #[test]
    fn reinsert_replaces() {
        let mut routes = index();
        routes.insert("/login", "sso", "");
        assert_eq!(routes.len(), 4);
        assert_eq!(*routes.lookup("/login").unwrap().target, "sso");
    }

    #[test]
    fn endpoint_normalization() {
        assert_eq!(normalize_endpoint("", "/app"), "/");
        assert_eq!(normalize_endpoint("/app/users", "/app"), "/users");
        assert_eq!(normalize_endpoint("/app", "/app"), "/");
        assert_eq!(normalize_endpoint("users", ""), "/users");
        assert_eq!(normalize_endpoint("/other", "/app"), "/other");
    }

    #[test]
    fn method_names() {
        assert_eq!(build_method_name(&RequestMethod::Post, "login"), "postLogin");
        assert_eq!(build_method_name(&RequestMethod::Patch, ""), "patch");
        assert_eq!(build_method_name(&RequestMethod::from("TRACE"), "x"), "getX");
        assert_eq!(build_method_name(&RequestMethod::Get, "USERLIST"), "getUserlist");
        assert_eq!(build_method_name(&RequestMethod::Do, "import"), "doImport");
    }

    #[test]
    fn endpoint_lists() {
        assert_eq!(["/a", "/b"].into_endpoints(), vec!["/a", "/b"]);
        assert_eq!("/a".into_endpoints(), vec!["/a"]);
    }
}
