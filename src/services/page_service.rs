//! PageService holds the shared state of the HTTP side, the page loaded at startup.

use crate::models::page::PageAsset;
use std::sync::Arc;

pub const DEFAULT_GREETING_NAME: &str = "Guest";

/// Cheap to clone; handlers receive it through `State`.
#[derive(Clone, Debug)]
pub struct PageService {
    pub page: Arc<PageAsset>,
}

impl PageService {
    pub fn new(page: PageAsset) -> Self {
        Self {
            page: Arc::new(page),
        }
    }

    /// `<h1>Hello, {name}!</h1>` with the name HTML-escaped.
    pub fn greeting(&self, name: Option<&str>) -> String {
        let name = name
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_GREETING_NAME);
        format!("<h1>Hello, {}!</h1>", html_escape(name))
    }
}

pub fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
