//! Dotenv-style file inspection.
//!
//! Deploys compare variable NAMES between the local and remote copies of an
//! env file; values never leave the host they live on. Parsing is
//! line-oriented: one `NAME=value` per line, `#` comments and blank lines
//! ignored.

use regex::Regex;

fn name_pattern() -> Regex {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)=").expect("static env name pattern")
}

/// Variable names declared in an env file, in declaration order.
pub fn variable_names(content: &str) -> Vec<String> {
    let re = name_pattern();
    let mut names = Vec::new();

    for line in content.lines() {
        if let Some(caps) = re.captures(line) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    names
}

/// Look up the value of a variable. Surrounding single or double quotes are
/// stripped; the last declaration wins, matching dotenv load order.
pub fn lookup(content: &str, name: &str) -> Option<String> {
    let re = name_pattern();
    let mut value = None;

    for line in content.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        if &caps[1] != name {
            continue;
        }
        let raw = line[caps.get(0).map(|m| m.end()).unwrap_or(0)..].trim();
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| raw.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(raw);
        value = Some(unquoted.to_string());
    }

    value
}

/// Name-level difference between the local and remote copies of one file.
#[derive(Debug, Clone)]
pub struct EnvComparison {
    pub file: String,
    pub local_only: Vec<String>,
    pub remote_only: Vec<String>,
}

impl EnvComparison {
    pub fn in_sync(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty()
    }
}

/// Compare two env file contents by variable name.
pub fn compare(file: &str, local: &str, remote: &str) -> EnvComparison {
    let local_names = variable_names(local);
    let remote_names = variable_names(remote);

    EnvComparison {
        file: file.to_string(),
        local_only: local_names
            .iter()
            .filter(|n| !remote_names.contains(n))
            .cloned()
            .collect(),
        remote_only: remote_names
            .iter()
            .filter(|n| !local_names.contains(n))
            .cloned()
            .collect(),
    }
}

/// Render a comparison as aligned rows: variable name, then an `x` under
/// whichever side declares it.
pub fn tabulate(comparison: &EnvComparison) -> Vec<String> {
    let mut rows = Vec::new();
    if comparison.in_sync() {
        return rows;
    }

    let width = comparison
        .local_only
        .iter()
        .chain(&comparison.remote_only)
        .map(|n| n.len())
        .max()
        .unwrap_or(0)
        .max("variable".len());

    rows.push(format!("{:<width$}  {:<6}  {:<6}", "variable", "local", "remote"));
    for name in &comparison.local_only {
        rows.push(format!("{:<width$}  {:<6}  {:<6}", name, "x", ""));
    }
    for name in &comparison.remote_only {
        rows.push(format!("{:<width$}  {:<6}  {:<6}", name, "", "x"));
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "\
# app settings
APP_NAME=shipmate
APP_ENV=local
export DB_HOST=127.0.0.1
DB_DATABASE=app
";

    #[test]
    fn names_skip_comments_and_honor_export() {
        assert_eq!(
            variable_names(LOCAL),
            vec!["APP_NAME", "APP_ENV", "DB_HOST", "DB_DATABASE"]
        );
    }

    #[test]
    fn lookup_strips_quotes_and_takes_last_declaration() {
        let content = "DB_PASSWORD=\"first\"\nDB_PASSWORD='second'\n";
        assert_eq!(lookup(content, "DB_PASSWORD").as_deref(), Some("second"));
        assert_eq!(lookup(content, "DB_HOST"), None);
    }

    #[test]
    fn comparison_reports_both_directions() {
        let remote = "APP_NAME=shipmate\nAPP_ENV=production\nDB_HOST=10.0.0.2\nCACHE_DRIVER=redis\n";
        let cmp = compare(".env", LOCAL, remote);
        assert_eq!(cmp.local_only, vec!["DB_DATABASE"]);
        assert_eq!(cmp.remote_only, vec!["CACHE_DRIVER"]);
        assert!(!cmp.in_sync());
    }

    #[test]
    fn identical_names_are_in_sync_regardless_of_values() {
        let remote = "APP_NAME=other\nAPP_ENV=production\nDB_HOST=10.0.0.2\nDB_DATABASE=prod\n";
        let cmp = compare(".env", LOCAL, remote);
        assert!(cmp.in_sync());
        assert!(tabulate(&cmp).is_empty());
    }

    #[test]
    fn tabulation_marks_the_owning_side() {
        let cmp = EnvComparison {
            file: ".env".to_string(),
            local_only: vec!["DB_DATABASE".to_string()],
            remote_only: vec!["CACHE_DRIVER".to_string()],
        };
        let rows = tabulate(&cmp);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("variable"));
        assert!(rows[1].contains("DB_DATABASE"));
        assert!(rows[2].contains("CACHE_DRIVER"));
    }
}
