//! Repository list file parser.
//!
//! One repository path per line. Blank lines and lines starting with `#`
//! are ignored; trailing `# comments` are stripped. Relative paths are
//! resolved against the list file's directory.

use std::path::{Path, PathBuf};

/// Parse a repository list. `base` is the directory relative entries
/// resolve against.
pub(crate) fn parse_repo_list(content: &str, base: &Path) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| {
            let line = match line.find(" #") {
                Some(idx) => &line[..idx],
                None => line,
            }
            .trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let path = PathBuf::from(line);
            Some(if path.is_absolute() {
                path
            } else {
                base.join(path)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blanks() {
        let content = "# team repos\n\n/srv/git/api\n  /srv/git/web  \n# /srv/git/old\n";
        let paths = parse_repo_list(content, Path::new("/lists"));
        assert_eq!(
            paths,
            vec![PathBuf::from("/srv/git/api"), PathBuf::from("/srv/git/web")]
        );
    }

    #[test]
    fn parse_resolves_relative_entries() {
        let paths = parse_repo_list("svc/api # primary\n", Path::new("/lists"));
        assert_eq!(paths, vec![PathBuf::from("/lists/svc/api")]);
    }

    #[test]
    fn parse_empty_list() {
        assert!(parse_repo_list("", Path::new("/")).is_empty());
        assert!(parse_repo_list("# only a comment\n", Path::new("/")).is_empty());
    }
}
