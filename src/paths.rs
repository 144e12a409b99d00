use std::path::{Component, Path, PathBuf};

/// Resolve a settings path: absolute paths are kept, relative ones are joined to `base_dir`.
pub fn resolve_path(base_dir: &Path, input: impl AsRef<Path>) -> PathBuf {
    let input = input.as_ref();
    if input.is_absolute() {
        return input.to_path_buf();
    }
    base_dir.join(input)
}

/// True when `name` is exactly one normal path component (no separators, no `..`).
pub fn is_plain_file_name(name: &str) -> bool {
    if name.trim().is_empty() {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_untouched() {
        let resolved = resolve_path(Path::new("/etc/panel"), "/opt/etc/xray");
        assert_eq!(resolved, PathBuf::from("/opt/etc/xray"));
    }

    #[test]
    fn relative_paths_join_base() {
        let resolved = resolve_path(Path::new("/etc/panel"), "configs");
        assert_eq!(resolved, PathBuf::from("/etc/panel/configs"));
    }

    #[test]
    fn plain_file_names() {
        assert!(is_plain_file_name("proxy.json"));
        assert!(is_plain_file_name("04_outbounds"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name("a/b.json"));
        assert!(!is_plain_file_name("/abs.json"));
        assert!(!is_plain_file_name(".."));
    }
}
