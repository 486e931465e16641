pub fn validate_package_path(pkg: &str) -> Result<(), String> {
    let pkg = pkg.trim();
    if pkg.is_empty() {
        return Err("package path must not be empty".to_string());
    }
    if pkg.starts_with('/') || pkg.ends_with('/') {
        return Err(format!(
            "invalid package path (must not start or end with '/'): {pkg:?}"
        ));
    }

    for seg in pkg.split('/') {
        if seg.is_empty() {
            return Err(format!("invalid package path (empty segment): {pkg:?}"));
        }
        if seg == "." || seg == ".." {
            return Err(format!(
                "invalid package path (dot segments are not allowed): {pkg:?}"
            ));
        }
        for c in seg.chars() {
            if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
                return Err(format!(
                    "invalid package path char (allowed [A-Za-z0-9_.-]): {pkg:?} segment={seg:?}"
                ));
            }
        }
    }

    Ok(())
}

pub fn validate_module_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("module name must be non-empty".to_string());
    }
    if name.contains('/') || name.contains(':') {
        return Err(format!(
            "invalid module name ('/' and ':' are not allowed): {name:?}"
        ));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('_');
    if !(first.is_ascii_alphanumeric() || first == '_') {
        return Err(format!(
            "invalid module name start (must be [A-Za-z0-9_]): {name:?}"
        ));
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+')) {
            return Err(format!(
                "invalid module name char (allowed [A-Za-z0-9_.+-]): {name:?}"
            ));
        }
    }
    Ok(())
}

pub fn validate_target_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("target name must be non-empty".to_string());
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('_');
    if !first.is_ascii_alphabetic() {
        return Err(format!(
            "invalid target name start (must be [A-Za-z]): {name:?}"
        ));
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!(
                "invalid target name char (allowed [A-Za-z0-9_]): {name:?}"
            ));
        }
    }
    Ok(())
}
