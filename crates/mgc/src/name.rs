use std::fmt;

/// Qualified id for a module: the package (directory) in which it is defined,
/// without trailing `/`, plus its declared name. Formats as `//<pkg>:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedModuleName {
    pub package: String,
    pub name: String,
}

impl QualifiedModuleName {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}:{}", self.package, self.name)
    }
}

/// True if `ancestor` equals `pkg` or is a path ancestor of it. The prefix
/// must respect `/` segment boundaries, so `top` is not an ancestor of `topx`.
pub fn is_ancestor(ancestor: &str, pkg: &str) -> bool {
    pkg == ancestor
        || pkg
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_formats_with_double_slash() {
        let q = QualifiedModuleName::new("top/nested", "libexample");
        assert_eq!(q.to_string(), "//top/nested:libexample");
    }

    #[test]
    fn ancestor_respects_segment_boundaries() {
        assert!(is_ancestor("top", "top"));
        assert!(is_ancestor("top", "top/nested"));
        assert!(is_ancestor("top", "top/nested/again"));
        assert!(!is_ancestor("top", "topx"));
        assert!(!is_ancestor("top", "topx/nested"));
        assert!(!is_ancestor("top/nested", "top"));
    }
}
