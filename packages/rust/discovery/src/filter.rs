//! Pre-submission repository filtering.
//!
//! Patterns containing glob metacharacters (`*`, `?`, `[`, `{`) are globs
//! matched against the repository id (its path relative to the discovery
//! root) and against its directory name. `*` and `?` never cross a `/`;
//! `**` spans directories. Plain patterns are substring matches on the id.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use repoctx_shared::{RepoCtxError, RepoTarget, Result};

const GLOB_META: [char; 4] = ['*', '?', '[', '{'];

#[derive(Debug)]
struct PatternSet {
    substrings: Vec<String>,
    globs: GlobSet,
}

impl PatternSet {
    fn compile(patterns: &[String]) -> Result<Self> {
        let mut substrings = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for raw in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if raw.contains(GLOB_META) {
                let glob = GlobBuilder::new(raw)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| RepoCtxError::config(format!("invalid filter pattern '{raw}': {e}")))?;
                builder.add(glob);
            } else {
                substrings.push(raw.to_string());
            }
        }
        let globs = builder
            .build()
            .map_err(|e| RepoCtxError::config(format!("invalid filter patterns: {e}")))?;
        Ok(Self { substrings, globs })
    }

    fn is_empty(&self) -> bool {
        self.substrings.is_empty() && self.globs.is_empty()
    }

    fn matches(&self, target: &RepoTarget) -> bool {
        if self.substrings.iter().any(|s| target.id.contains(s.as_str())) {
            return true;
        }
        self.globs.is_match(&target.id)
            || target
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| self.globs.is_match(name))
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            substrings: Vec::new(),
            globs: GlobSet::empty(),
        }
    }
}

/// Include/exclude filter applied before any job is scheduled.
#[derive(Debug, Default)]
pub struct RepoFilter {
    include: PatternSet,
    exclude: PatternSet,
}

impl RepoFilter {
    /// Compile include and exclude patterns. An invalid pattern is a
    /// configuration error.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: PatternSet::compile(include)?,
            exclude: PatternSet::compile(exclude)?,
        })
    }

    /// Excludes win; with no include patterns everything else is kept.
    pub fn accepts(&self, target: &RepoTarget) -> bool {
        if self.exclude.matches(target) {
            return false;
        }
        self.include.is_empty() || self.include.matches(target)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn target(id: &str) -> RepoTarget {
        RepoTarget {
            id: id.into(),
            path: PathBuf::from("/src").join(id),
        }
    }

    fn include(pattern: &str) -> RepoFilter {
        RepoFilter::new(&[pattern.into()], &[]).unwrap()
    }

    #[test]
    fn star_stays_within_one_segment() {
        let filter = include("team-*/api");
        assert!(filter.accepts(&target("team-a/api")));
        assert!(!filter.accepts(&target("team-a/nested/api")));

        assert!(include("archive/**").accepts(&target("archive/2019/old")));
    }

    #[test]
    fn question_mark_does_not_cross_separator() {
        let filter = include("a?b");
        assert!(filter.accepts(&target("axb")));
        assert!(!filter.accepts(&target("a/b")));
    }

    #[test]
    fn character_classes_and_alternation() {
        let filter = include("svc-[ab]");
        assert!(filter.accepts(&target("svc-a")));
        assert!(!filter.accepts(&target("svc-c")));

        let filter = include("{api,web}-*");
        assert!(filter.accepts(&target("web-portal")));
        assert!(!filter.accepts(&target("cli-tool")));
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let err = RepoFilter::new(&["svc-[ab".into()], &[]).unwrap_err();
        assert!(matches!(err, RepoCtxError::Config { .. }));
    }

    #[test]
    fn substring_include() {
        let filter = include("billing");
        assert!(filter.accepts(&target("acme/billing-service")));
        assert!(!filter.accepts(&target("acme/search")));
    }

    #[test]
    fn glob_matches_directory_name() {
        assert!(include("*-service").accepts(&target("acme/billing-service")));
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter =
            RepoFilter::new(&["acme/**".into()], &["*legacy*".into()]).unwrap();
        assert!(filter.accepts(&target("acme/api")));
        assert!(!filter.accepts(&target("acme/legacy-api")));
    }

    #[test]
    fn empty_filter_accepts_all() {
        let filter = RepoFilter::new(&[], &["  ".into()]).unwrap();
        assert!(filter.accepts(&target("anything")));
    }
}
