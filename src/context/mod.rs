//! Per-request context handed to middleware and route handlers.

use std::collections::HashMap;

use crate::Request;

/// Path parameters extracted from the matched route.
///
/// A wildcard route (`/fallback/*`) stores the matched remainder under
/// `"wildcard"`.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

/// The request plus whatever the router learned while matching it.
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    /// Create a context for a request that has not been routed yet.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    /// Create a context carrying the parameters of a matched route.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Give the request back, dropping the route parameters.
    pub fn into_request(self) -> Request {
        self.request
    }
}
