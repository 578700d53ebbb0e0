//! Package `exports` map negotiation.
//!
//! Follows the Node.js algorithm for the parts browsers care about: exact
//! subpaths, `*` patterns and legacy trailing-slash folders, with condition
//! objects walked in declaration order. The first target matching the
//! active condition set wins.

use rustc_hash::FxHashSet;
use serde_json::Value;

/// Why an `exports` lookup produced nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportsMiss {
    /// No key in the map covers the requested subpath
    Missing { entry: String, name: String },
    /// The subpath exists but no target matched the active conditions
    NoConditions { entry: String, name: String },
}

impl std::fmt::Display for ExportsMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportsMiss::Missing { entry, name } => {
                write!(f, "Missing \"{entry}\" specifier in \"{name}\" package")
            }
            ExportsMiss::NoConditions { entry, name } => {
                write!(f, "No known conditions for \"{entry}\" specifier in \"{name}\" package")
            }
        }
    }
}

/// Inputs that pick the active condition set.
#[derive(Debug, Clone, Default)]
pub struct ExportConditions {
    pub is_production: bool,
    pub is_require: bool,
    pub browser: bool,
    pub custom: Vec<String>,
}

impl ExportConditions {
    /// `default` is always active; `import`/`require` and `browser`/`node`
    /// are exclusive pairs.
    pub fn active(&self) -> FxHashSet<String> {
        let mut set = FxHashSet::default();
        set.insert("default".to_string());
        set.insert(if self.is_production { "production" } else { "development" }.to_string());
        if !self.is_require {
            set.insert("module".to_string());
        }
        set.insert(if self.is_require { "require" } else { "import" }.to_string());
        set.insert(if self.browser { "browser" } else { "node" }.to_string());
        set.extend(self.custom.iter().cloned());
        set
    }
}

/// `.` stays `.`; `sub` and `pkg/sub` both become `./sub`.
fn to_entry(name: &str, input: &str) -> String {
    if input == "." || input.starts_with("./") {
        return input.to_string();
    }
    if input == name {
        return ".".to_string();
    }
    match input.strip_prefix(name).and_then(|rest| rest.strip_prefix('/')) {
        Some(sub) => format!("./{sub}"),
        None => format!("./{}", input.trim_start_matches('/')),
    }
}

/// Resolve `input` (`.`, `./sub` or `pkg/sub`) through `exports`.
/// Returns the package-relative target, e.g. `./dist/index.mjs`.
pub fn resolve_exports(
    exports: &Value,
    name: &str,
    input: &str,
    conditions: &ExportConditions,
) -> Result<String, ExportsMiss> {
    let entry = to_entry(name, input);
    let missing = || ExportsMiss::Missing {
        entry: entry.clone(),
        name: name.to_string(),
    };

    // Sugar forms: a bare target, a fallback array, or a root condition object
    let sugar;
    let map = match exports {
        Value::Object(map) if map.keys().next().is_some_and(|k| k.starts_with('.')) => map,
        Value::Object(_) | Value::String(_) | Value::Array(_) => {
            let mut root = serde_json::Map::new();
            root.insert(".".to_string(), exports.clone());
            sugar = root;
            &sugar
        }
        _ => return Err(missing()),
    };

    let (target, replacement) = match map.get(&entry) {
        Some(target) => (target, None),
        None => {
            let mut best: Option<(&String, String)> = None;
            for key in map.keys() {
                let candidate = if key.ends_with('/') {
                    entry
                        .strip_prefix(key.as_str())
                        .map(|rest| rest.to_string())
                } else {
                    match_pattern(key, &entry)
                };
                if let Some(rest) = candidate {
                    if best.as_ref().is_none_or(|(k, _)| key.len() >= k.len()) {
                        best = Some((key, rest));
                    }
                }
            }
            let (key, rest) = best.ok_or_else(missing)?;
            let target = map.get(key).ok_or_else(missing)?;
            (target, Some(rest))
        }
    };

    if target.is_null() {
        return Err(missing());
    }

    let active = conditions.active();
    let mut results = Vec::new();
    collect_targets(target, &active, &mut results);
    let Some(first) = results.into_iter().next() else {
        return Err(ExportsMiss::NoConditions {
            entry,
            name: name.to_string(),
        });
    };

    Ok(match replacement {
        Some(rest) if first.contains('*') => first.replace('*', &rest),
        Some(rest) if first.ends_with('/') => format!("{first}{rest}"),
        _ => first,
    })
}

/// `./feature/*.js` against `./feature/a/b.js` yields `a/b`.
fn match_pattern(key: &str, entry: &str) -> Option<String> {
    let star = key.get(1..)?.find('*')? + 1;
    let (prefix, suffix) = (&key[..star], &key[star + 1..]);
    if entry.len() < prefix.len() + suffix.len() {
        return None;
    }
    let middle = entry.strip_prefix(prefix)?.strip_suffix(suffix)?;
    (!middle.is_empty()).then(|| middle.to_string())
}

fn collect_targets(target: &Value, active: &FxHashSet<String>, out: &mut Vec<String>) {
    match target {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_targets(item, active, out);
            }
        }
        Value::Object(map) => {
            if let Some((_, value)) = map.iter().find(|(k, _)| active.contains(k.as_str())) {
                collect_targets(value, active, out);
            }
        }
        _ => {}
    }
}
