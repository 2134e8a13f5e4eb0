//! Per-request context handed to middleware and handlers.

use std::collections::HashMap;

use crate::http::Request;

/// Values captured from `:name` segments of the matched route.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.map.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A request together with what routing learned about it.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Shorthand for `ctx.params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_reachable_from_context() {
        let (request, _) = Request::parse(b"GET /api/cats/418 HTTP/1.1\r\n\r\n").unwrap();
        let mut params = PathParams::new();
        params.insert("code", "418");

        let ctx = Context::with_params(request, params);
        assert_eq!(ctx.param("code"), Some("418"));
        assert_eq!(ctx.param("missing"), None);
        assert_eq!(ctx.request().path(), "/api/cats/418");
    }
}
