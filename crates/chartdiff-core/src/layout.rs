//! Deterministic target paths inside the working tree.
//!
//! `<base>/<variant-or-"default">.yaml` for single-file output and
//! `<base>/<variant-or-"default">/...` for directory output.

/// Name used for the variant-less render.
pub const DEFAULT_VARIANT: &str = "default";

/// File written in place of a directory-mode render that failed.
pub const ERROR_FILE: &str = "error.txt";

/// Join slash paths, treating an empty or `.` base as the root.
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() || base == "." {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

pub fn variant_name(variant: Option<&str>) -> &str {
    variant.unwrap_or(DEFAULT_VARIANT)
}

/// `<base>/<variant>.yaml`
pub fn single_file_path(base: &str, variant: Option<&str>) -> String {
    join(base, &format!("{}.yaml", variant_name(variant)))
}

/// `<base>/<variant>`
pub fn directory_path(base: &str, variant: Option<&str>) -> String {
    join(base, variant_name(variant))
}

/// `<base>/<variant>/error.txt`
pub fn error_path(base: &str, variant: Option<&str>) -> String {
    join(&directory_path(base, variant), ERROR_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_variant_paths() {
        assert_eq!(single_file_path("charts/app", None), "charts/app/default.yaml");
        assert_eq!(directory_path("charts/app", None), "charts/app/default");
        assert_eq!(error_path("charts/app", None), "charts/app/default/error.txt");
    }

    #[test]
    fn named_variant_paths() {
        assert_eq!(single_file_path("app", Some("prod")), "app/prod.yaml");
        assert_eq!(directory_path("app", Some("prod")), "app/prod");
    }

    #[test]
    fn root_base_has_no_leading_separator() {
        assert_eq!(single_file_path(".", None), "default.yaml");
        assert_eq!(directory_path("", Some("dev")), "dev");
        assert_eq!(join("app/", "x"), "app/x");
    }
}
