//! Header rewrite rules.
//!
//! # Responsibilities
//! - Compile parsed header specs into typed rules
//! - Apply set, then add, then delete rules to a header map
//! - Run rule sets as request-side or response-side pipeline stages
//!
//! # Design Decisions
//! - `Delete` carries no value; `Set` and `Add` carry exactly one
//! - Names or values that are not valid HTTP are dropped at compile time

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Which message a rule set rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientRequest,
    ClientResponse,
    BackendRequest,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::ClientRequest => "request",
            Direction::ClientResponse => "response",
            Direction::BackendRequest => "upstream",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderAction {
    Set(HeaderValue),
    Add(HeaderValue),
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub name: HeaderName,
    pub action: HeaderAction,
}

impl HeaderRule {
    pub fn apply(&self, headers: &mut HeaderMap) {
        match &self.action {
            HeaderAction::Set(value) => {
                headers.insert(self.name.clone(), value.clone());
            }
            HeaderAction::Add(value) => {
                headers.append(self.name.clone(), value.clone());
            }
            HeaderAction::Delete => {
                headers.remove(&self.name);
            }
        }
    }
}

/// Ordered rules for one direction.
#[derive(Debug, Clone)]
pub struct HeaderRuleSet {
    direction: Direction,
    rules: Vec<HeaderRule>,
}

impl HeaderRuleSet {
    /// Compile set/add/delete specs. Rules are kept in set, add, delete order.
    pub fn compile(
        direction: Direction,
        set: &[(String, String)],
        add: &[(String, String)],
        del: &[String],
    ) -> Self {
        let mut rules = Vec::with_capacity(set.len() + add.len() + del.len());

        for (name, value) in set {
            if let Some((name, value)) = valid_pair(direction, name, value) {
                rules.push(HeaderRule {
                    name,
                    action: HeaderAction::Set(value),
                });
            }
        }
        for (name, value) in add {
            if let Some((name, value)) = valid_pair(direction, name, value) {
                rules.push(HeaderRule {
                    name,
                    action: HeaderAction::Add(value),
                });
            }
        }
        for name in del {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => rules.push(HeaderRule {
                    name,
                    action: HeaderAction::Delete,
                }),
                Err(_) => {
                    tracing::warn!(%direction, header = %name, "Dropping invalid header name")
                }
            }
        }

        Self { direction, rules }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn rules(&self) -> &[HeaderRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for rule in &self.rules {
            rule.apply(headers);
        }
    }
}

fn valid_pair(direction: Direction, name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let parsed_name = HeaderName::from_bytes(name.as_bytes());
    let parsed_value = HeaderValue::from_str(value);
    match (parsed_name, parsed_value) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            tracing::warn!(%direction, header = %name, "Dropping invalid header rule");
            None
        }
    }
}

/// Rewrites the request on its way in.
pub async fn request_headers_middleware(
    State(rules): State<Arc<HeaderRuleSet>>,
    mut request: Request,
    next: Next,
) -> Response {
    rules.apply(request.headers_mut());
    next.run(request).await
}

/// Rewrites the response on its way out.
pub async fn response_headers_middleware(
    State(rules): State<Arc<HeaderRuleSet>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    rules.apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_set_add_delete_order() {
        let rules = HeaderRuleSet::compile(
            Direction::ClientRequest,
            &pairs(&[("x-a", "set")]),
            &pairs(&[("x-a", "added"), ("x-b", "1")]),
            &["x-b".to_string()],
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-a", HeaderValue::from_static("original"));
        headers.insert("x-b", HeaderValue::from_static("original"));
        rules.apply(&mut headers);

        let values: Vec<_> = headers.get_all("x-a").iter().collect();
        assert_eq!(values, vec!["set", "added"]);
        assert!(!headers.contains_key("x-b"));
    }

    #[test]
    fn test_invalid_rules_dropped() {
        let rules = HeaderRuleSet::compile(
            Direction::BackendRequest,
            &pairs(&[("bad name", "v"), ("x-ok", "v")]),
            &pairs(&[("x-ctl", "a\nb")]),
            &["also bad".to_string()],
        );
        assert_eq!(rules.rules().len(), 1);
        assert_eq!(rules.rules()[0].name, "x-ok");
    }

    #[test]
    fn test_empty() {
        let rules = HeaderRuleSet::compile(Direction::ClientResponse, &[], &[], &[]);
        assert!(rules.is_empty());
        assert_eq!(rules.direction(), Direction::ClientResponse);
    }
}
