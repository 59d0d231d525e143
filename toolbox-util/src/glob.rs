//! Name matching for engine resources.
//!
//! Container, network and volume names are flat strings, so patterns are
//! compiled without path-separator semantics: `*` matches any run of
//! characters, `?` a single character, `{a,b}` either alternative.

use globset::{Glob, GlobBuilder, GlobSet};

pub use globset::Error as GlobError;

/// A compiled set of name patterns.
///
/// An empty matcher matches nothing.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    set: GlobSet,
    empty: bool,
}

impl NameMatcher {
    /// Compiles the given patterns.
    pub fn new<I>(patterns: I) -> Result<Self, GlobError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut builder = GlobSet::builder();
        let mut empty = true;
        for pattern in patterns {
            builder.add(build(pattern.as_ref())?);
            empty = false;
        }

        Ok(Self {
            set: builder.build()?,
            empty,
        })
    }

    /// Returns true if `name` matches any of the patterns.
    ///
    /// A leading `/`, as reported by the engine for container names, is
    /// ignored.
    pub fn is_match(&self, name: &str) -> bool {
        if self.empty {
            return false;
        }
        let name = name.strip_prefix('/').unwrap_or(name);
        self.set.is_match(name)
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

fn build(pattern: &str) -> Result<Glob, GlobError> {
    GlobBuilder::new(pattern)
        .allow_unclosed_class(false)
        .backslash_escape(true)
        .case_insensitive(false)
        .empty_alternates(true)
        .literal_separator(false)
        .build()
}
