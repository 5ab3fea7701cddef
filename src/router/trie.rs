//! Route tree
//!
//! One prefix tree per HTTP method. Registered paths are split on `/`
//! (empty segments are skipped, so leading, trailing and doubled slashes
//! all normalize away). Each node holds static children by segment, at
//! most one parameter child (`:name`) and at most one wildcard child
//! (`*name`). Matching walks segment by segment with static-first,
//! parameter-next, wildcard-last precedence; a wildcard consumes the
//! whole remainder of the path, slashes included.

use std::collections::HashMap;

use crate::handler::ArcHandler;

/// Parameters bound while matching a path.
pub type PathParams = HashMap<String, String>;

/// A node in the route tree.
pub(crate) struct TrieNode {
    /// Static children by exact segment
    children: HashMap<String, TrieNode>,

    /// Parameter segment, e.g. `:id`
    param_child: Option<Box<TrieNode>>,
    param_name: Option<String>,

    /// Wildcard segment, e.g. `*file`
    wildcard_child: Option<Box<TrieNode>>,
    wildcard_name: Option<String>,

    /// Handler marking a terminal route
    handler: Option<ArcHandler>,
}

impl TrieNode {
    pub(crate) fn new() -> Self {
        Self {
            children: HashMap::new(),
            param_child: None,
            param_name: None,
            wildcard_child: None,
            wildcard_name: None,
            handler: None,
        }
    }

    /// Registers a handler at `path`, creating nodes as needed.
    ///
    /// A second `:param` or `*wildcard` registration at the same node
    /// overwrites the slot's name: last write wins.
    pub(crate) fn add_route(&mut self, path: &str, handler: ArcHandler) {
        let mut current = self;

        for segment in path.trim_matches('/').split('/') {
            if segment.is_empty() {
                continue;
            }

            current = if let Some(name) = segment.strip_prefix(':') {
                current.param_name = Some(name.to_string());
                &mut **current.param_child.get_or_insert_with(|| Box::new(TrieNode::new()))
            } else if let Some(name) = segment.strip_prefix('*') {
                current.wildcard_name = Some(name.to_string());
                &mut **current.wildcard_child.get_or_insert_with(|| Box::new(TrieNode::new()))
            } else {
                current.children.entry(segment.to_string()).or_insert_with(TrieNode::new)
            };
        }

        current.handler = Some(handler);
    }

    /// Finds the handler for `path` and binds its parameters.
    ///
    /// A terminal node without a handler is a miss.
    pub(crate) fn matches(&self, path: &str) -> Option<(ArcHandler, PathParams)> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let mut current = self;
        let mut params = PathParams::new();

        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                continue;
            }

            if let Some(child) = current.children.get(*segment) {
                current = child;
                continue;
            }

            if let Some(child) = &current.param_child {
                if let Some(name) = &current.param_name {
                    params.insert(name.clone(), segment.to_string());
                }
                current = child;
                continue;
            }

            if let Some(child) = &current.wildcard_child {
                // the wildcard swallows the rest of the path
                if let Some(name) = &current.wildcard_name {
                    params.insert(name.clone(), segments[i..].join("/"));
                }
                return child.handler.clone().map(|handler| (handler, params));
            }

            return None;
        }

        current.handler.clone().map(|handler| (handler, params))
    }

    /// True if any route under this node would match `path`; used for
    /// the 405 check without binding parameters.
    pub(crate) fn would_match(&self, path: &str) -> bool {
        self.matches(path).is_some()
    }
}
