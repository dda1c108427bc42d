//! Structured listing queries.
//!
//! Queries are built from typed parts and rendered into the Drive search
//! grammar in one place, so string values are always quoted and escaped.

use std::fmt;

use crate::Item;

/// A child listing query: non-trashed items under one parent, optionally
/// narrowed by exact name and MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    parent: String,
    name: Option<String>,
    mime_type: Option<String>,
}

impl Query {
    /// All non-trashed children of `parent`.
    pub fn children_of(parent: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            name: None,
            mime_type: None,
        }
    }

    /// Restrict to items named exactly `name`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict to items of MIME type `mime_type`.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Parent folder ID.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// Name filter, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// MIME type filter, if any.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Evaluate the predicate against a non-trashed item.
    pub fn matches(&self, item: &Item) -> bool {
        item.parents.iter().any(|p| *p == self.parent)
            && self.name.as_deref().map_or(true, |n| n == item.name)
            && self
                .mime_type
                .as_deref()
                .map_or(true, |m| m == item.kind.mime_type())
    }
}

/// Quote a string literal for the search grammar.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in parents and trashed = false", quote(&self.parent))?;
        if let Some(name) = &self.name {
            write!(f, " and name = {}", quote(name))?;
        }
        if let Some(mime_type) = &self.mime_type {
            write!(f, " and mimeType = {}", quote(mime_type))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FOLDER_MIME_TYPE;
    use proptest::prelude::*;

    #[test]
    fn test_children_query() {
        let q = Query::children_of("abc123");
        assert_eq!(q.to_string(), "'abc123' in parents and trashed = false");
    }

    #[test]
    fn test_scoped_query() {
        let q = Query::children_of("dest")
            .with_name("Reports")
            .with_mime_type(FOLDER_MIME_TYPE);
        assert_eq!(
            q.to_string(),
            "'dest' in parents and trashed = false and name = 'Reports' \
             and mimeType = 'application/vnd.google-apps.folder'"
        );
    }

    #[test]
    fn test_name_escaping() {
        let q = Query::children_of("p").with_name(r"it's a \ test");
        assert_eq!(
            q.to_string(),
            r"'p' in parents and trashed = false and name = 'it\'s a \\ test'"
        );
    }

    proptest! {
        #[test]
        fn prop_quoted_name_has_no_bare_quote(name in ".*") {
            let rendered = quote(&name);
            let inner = &rendered[1..rendered.len() - 1];
            let mut escaped = false;
            for c in inner.chars() {
                if escaped {
                    escaped = false;
                    continue;
                }
                if c == '\\' {
                    escaped = true;
                    continue;
                }
                prop_assert_ne!(c, '\'');
            }
            prop_assert!(!escaped);
        }
    }
}
