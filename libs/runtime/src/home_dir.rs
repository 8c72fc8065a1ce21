use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

/// Platform base directory used when no explicit home_dir is configured.
fn platform_base() -> Option<PathBuf> {
    if cfg!(windows) {
        env::var_os("APPDATA")
            .or_else(|| env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    } else {
        env::var_os("HOME").map(PathBuf::from)
    }
}

/// Resolve the application home directory into an absolute path.
///
/// - `None` (or empty) resolves to `<platform base>/<default_subdir>`.
/// - A leading `~` is expanded against the platform base.
/// - Relative paths are joined with the current working directory.
///
/// When `create` is set the directory is created if missing.
pub fn resolve_home_dir(
    configured: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf> {
    let path = match configured.as_deref().map(str::trim) {
        None | Some("") => {
            let Some(base) = platform_base() else {
                bail!("cannot determine the user home directory");
            };
            base.join(default_subdir)
        }
        Some(raw) if raw == "~" || raw.starts_with("~/") || raw.starts_with("~\\") => {
            let Some(base) = platform_base() else {
                bail!("cannot expand '~' in home_dir: user home directory is unknown");
            };
            let rest = raw[1..].trim_start_matches(['/', '\\']);
            if rest.is_empty() {
                base
            } else {
                base.join(rest)
            }
        }
        Some(raw) => {
            let p = PathBuf::from(raw);
            if p.is_absolute() {
                p
            } else {
                env::current_dir()
                    .context("failed to read current directory")?
                    .join(p)
            }
        }
    };

    if create {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create home_dir {}", path.display()))?;
    }

    Ok(path)
}
