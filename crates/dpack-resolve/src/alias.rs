use dpack_config::AliasRule;

/// Apply the first matching alias rule. A rule matches the exact `find`
/// string or any id starting with `find/`.
pub fn apply_alias(rules: &[AliasRule], id: &str) -> Option<String> {
    rules.iter().find_map(|rule| {
        if id == rule.find {
            return Some(rule.replacement.clone());
        }
        let rest = id.strip_prefix(rule.find.as_str())?;
        if rest.starts_with('/') {
            let replacement = rule.replacement.strip_suffix('/').unwrap_or(&rule.replacement);
            Some(format!("{replacement}{rest}"))
        } else {
            None
        }
    })
}
