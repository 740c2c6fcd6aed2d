//! `config validate` / `config show`.

use std::path::Path;

use am_domain::config::{Config, ConfigSeverity};

/// Report config issues. Returns false when any error-severity issue
/// exists.
pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    let mut ok = true;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => println!("warning: {issue}"),
            ConfigSeverity::Error => {
                ok = false;
                println!("error: {issue}");
            }
        }
    }
    ok
}

/// Dump the resolved configuration (defaults applied) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => eprintln!("failed to render config: {err}"),
    }
}
