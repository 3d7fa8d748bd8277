//! Log file naming.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::config::LogCfg;

/// Resolve the file for a new capture session.
///
/// * no prefix: `<root>/<stamp>.<ext>`
/// * prefix ending in `/`: `<prefix>/<stamp>.<ext>`
/// * anything else: `<prefix parent>/<prefix name>_<stamp>.<ext>`, so a bare name lands in the
///   working directory
///
/// A leading `~/` in the prefix or the root expands to the home directory.
pub fn log_path(cfg: &LogCfg, prefix: Option<&str>, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format(&cfg.stamp_format).to_string();
    let file_name = format!("{stamp}.{}", cfg.extension);
    let root = expand_home(&cfg.root.to_string_lossy());

    let Some(prefix) = prefix.map(str::trim).filter(|p| !p.is_empty()) else {
        return root.join(file_name);
    };

    if prefix.ends_with('/') {
        return expand_home(prefix).join(file_name);
    }

    let prefix_path = expand_home(prefix);
    let name = prefix_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let named = format!("{name}_{file_name}");
    match prefix_path.parent() {
        Some(parent) => parent.join(named),
        None => PathBuf::from(named),
    }
}

/// First path in `base`, `base-1`, `base-2`, ... that does not exist yet.
pub fn unique_path(base: PathBuf) -> PathBuf {
    if !base.exists() {
        return base;
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = base.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = parent.join(format!("{stem}-{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> LogCfg {
        LogCfg {
            root: PathBuf::from("/logs"),
            ..LogCfg::default()
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
    }

    #[test]
    fn default_lands_in_root() {
        assert_eq!(
            log_path(&cfg(), None, at()),
            PathBuf::from("/logs/20260304_050607.jsonl")
        );
        assert_eq!(
            log_path(&cfg(), Some("  "), at()),
            PathBuf::from("/logs/20260304_050607.jsonl")
        );
    }

    #[test]
    fn trailing_slash_means_directory() {
        assert_eq!(
            log_path(&cfg(), Some("/tmp/runs/"), at()),
            PathBuf::from("/tmp/runs/20260304_050607.jsonl")
        );
    }

    #[test]
    fn path_prefix_names_the_file() {
        assert_eq!(
            log_path(&cfg(), Some("/tmp/runs/login"), at()),
            PathBuf::from("/tmp/runs/login_20260304_050607.jsonl")
        );
        assert_eq!(
            log_path(&cfg(), Some("checkout"), at()),
            PathBuf::from("checkout_20260304_050607.jsonl")
        );
    }

    #[test]
    fn collisions_get_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("20260304_050607.jsonl");
        assert_eq!(unique_path(base.clone()), base);

        std::fs::write(&base, "").unwrap();
        let next = unique_path(base.clone());
        assert_eq!(next, dir.path().join("20260304_050607-1.jsonl"));

        std::fs::write(&next, "").unwrap();
        assert_eq!(
            unique_path(base),
            dir.path().join("20260304_050607-2.jsonl")
        );
    }

    #[test]
    fn tilde_root_expands_to_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let cfg = LogCfg {
            root: PathBuf::from("~/devpipe-logs"),
            ..LogCfg::default()
        };
        assert_eq!(
            log_path(&cfg, None, at()),
            home.join("devpipe-logs").join("20260304_050607.jsonl")
        );
    }
}
