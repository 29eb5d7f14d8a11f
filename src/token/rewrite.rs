//! Token injection into HTML, CSS and JavaScript bodies.
//!
//! noVNC loads its modules, stylesheets and images with relative URLs. Once
//! the page is served from the proxy those requests no longer carry the
//! preview token, so every relative URL in the following contexts gets the
//! token appended:
//!
//! - `src="..."` / `href="..."` attributes
//! - CSS `url(...)` (stylesheets and HTML only; `new URL(...)` and
//!   `obj.url(...)` calls are left alone)
//! - `import ... from "..."`, `export ... from "..."` and bare `from "..."`
//! - dynamic `import("...")`, side-effect `import "..."` and CSS `@import "..."`
//!
//! Absolute URLs (any scheme, or protocol-relative `//`), data URIs,
//! fragment-only references and URLs that already carry the token parameter
//! are left alone. Matching is regex-based and best-effort; malformed markup
//! is not repaired.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::RewriteConfig;
use crate::token::{has_param, AuthToken};

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(src|href)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid attribute regex")
});

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(url)\((\s*)(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))"#)
        .expect("valid url() regex")
});

static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bfrom(\s*)(?:"([^"]*)"|'([^']*)')"#).expect("valid from regex"));

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport(\s*\(\s*|\s+)(?:"([^"]*)"|'([^']*)')"#).expect("valid import regex")
});

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("valid scheme regex"));

/// Response classification for rewriting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Html,
    Css,
    Js,
    Other,
}

impl ContentClass {
    /// Classify by `Content-Type`, falling back to the upstream path's file
    /// extension when the type is missing or generic.
    pub fn classify(content_type: Option<&str>, path: &str, config: &RewriteConfig) -> Self {
        let content_type = content_type.map(str::to_ascii_lowercase);

        if let Some(ct) = content_type.as_deref() {
            let contains_any = |needles: &[String]| {
                needles.iter().any(|n| ct.contains(&n.to_ascii_lowercase()))
            };
            if contains_any(config.html_content_types.as_slice()) {
                return ContentClass::Html;
            }
            if contains_any(config.css_content_types.as_slice()) {
                return ContentClass::Css;
            }
            if contains_any(config.js_content_types.as_slice()) {
                return ContentClass::Js;
            }
        }

        let generic = match content_type.as_deref() {
            None => true,
            Some(ct) => ct.starts_with("text/plain") || ct.starts_with("application/octet-stream"),
        };
        if generic {
            Self::from_extension(path)
        } else {
            ContentClass::Other
        }
    }

    fn from_extension(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or(path);
        match file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
            Some("html" | "htm") => ContentClass::Html,
            Some("css") => ContentClass::Css,
            Some("js" | "mjs") => ContentClass::Js,
            _ => ContentClass::Other,
        }
    }

    pub fn is_textual(&self) -> bool {
        !matches!(self, ContentClass::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Html => "html",
            ContentClass::Css => "css",
            ContentClass::Js => "js",
            ContentClass::Other => "other",
        }
    }
}

/// Appends one token to every relative URL of a body.
#[derive(Debug, Clone)]
pub struct TokenRewriter {
    param: String,
    suffix: String,
}

impl TokenRewriter {
    pub fn new(param: &str, token: &AuthToken) -> Self {
        Self {
            param: param.to_string(),
            suffix: format!("{param}={}", token.encoded()),
        }
    }

    /// Rewrite a whole body of the given class.
    pub fn rewrite(&self, body: &str, class: ContentClass) -> String {
        let body = ATTR_RE.replace_all(body, |caps: &Captures<'_>| {
            let (value, quote) = quoted(caps, 3, 4);
            format!("{}{}{quote}{}{quote}", &caps[1], &caps[2], self.rewrite_url(value))
        });

        let body = if matches!(class, ContentClass::Css | ContentClass::Html) {
            let haystack: &str = &body;
            CSS_URL_RE
                .replace_all(haystack, |caps: &Captures<'_>| {
                    let start = caps.get(0).map_or(0, |m| m.start());
                    if is_script_call(&haystack[..start]) {
                        return caps[0].to_string();
                    }
                    let (value, quote) = match caps.get(5) {
                        Some(bare) => (bare.as_str(), ""),
                        None => quoted(caps, 3, 4),
                    };
                    format!("{}({}{quote}{}{quote}", &caps[1], &caps[2], self.rewrite_url(value))
                })
                .into_owned()
        } else {
            body.into_owned()
        };

        let body = FROM_RE.replace_all(&body, |caps: &Captures<'_>| {
            let (value, quote) = quoted(caps, 2, 3);
            format!("from{}{quote}{}{quote}", &caps[1], self.rewrite_url(value))
        });

        let body = IMPORT_RE.replace_all(&body, |caps: &Captures<'_>| {
            let (value, quote) = quoted(caps, 2, 3);
            format!("import{}{quote}{}{quote}", &caps[1], self.rewrite_url(value))
        });

        body.into_owned()
    }

    /// Rewrite a single URL, or return it unchanged if it is excluded.
    pub fn rewrite_url(&self, url: &str) -> String {
        if !self.should_rewrite(url) {
            return url.to_string();
        }

        let (base, fragment) = match url.find('#') {
            Some(idx) => url.split_at(idx),
            None => (url, ""),
        };

        let separator = if !base.contains('?') {
            "?"
        } else if base.ends_with('?') || base.ends_with('&') {
            ""
        } else {
            "&"
        };

        format!("{base}{separator}{}{fragment}", self.suffix)
    }

    fn should_rewrite(&self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty()
            || url.starts_with('#')
            || url.starts_with("//")
            || SCHEME_RE.is_match(url)
        {
            return false;
        }

        let without_fragment = url.split('#').next().unwrap_or(url);
        match without_fragment.split_once('?') {
            Some((_, query)) => !has_param(query, &self.param),
            None => true,
        }
    }
}

/// True when the text before a `url(` match makes it a script call
/// (`new URL(`, `obj.url(`) rather than a CSS function.
fn is_script_call(before: &str) -> bool {
    let before = before.trim_end();
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    before.ends_with('.')
        || before
            .strip_suffix("new")
            .is_some_and(|rest| !rest.ends_with(is_ident))
}

/// Value and quote character of a `"..."|'...'` capture pair.
fn quoted<'h>(caps: &Captures<'h>, double: usize, single: usize) -> (&'h str, &'static str) {
    match caps.get(double) {
        Some(m) => (m.as_str(), "\""),
        None => (caps.get(single).map_or("", |m| m.as_str()), "'"),
    }
}
