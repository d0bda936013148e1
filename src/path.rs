//! Canonical remote path resolution from model names.
//!
//! Model names arrive dasherized or underscored (`"blog-post"`); the remote
//! tree stores collections under their plural, lower-camel form
//! (`"blogPosts"`). Both helpers are pure — malformed input propagates as
//! malformed output, validation is the caller's responsibility.

/// Normalize a model name to its canonical plural, lower-camel collection
/// name: camelize over `-`/`_`, then pluralize the final word.
pub fn parse_model_name(model_name: &str) -> String {
    pluralize(&camelize(model_name))
}

/// Resolve the full remote path for a record.
///
/// An explicit override wins: `{override}/{id}`. Otherwise the default
/// convention applies: `{parse_model_name(model)}/{id}`.
pub fn resolve_path(model_name: &str, id: &str, override_path: Option<&str>) -> String {
    match override_path {
        Some(path) => format!("{path}/{id}"),
        None => format!("{}/{id}", parse_model_name(model_name)),
    }
}

/// Lower-camelize a dasherized/underscored name: `"blog-post"` → `"blogPost"`.
fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for (i, ch) in name.chars().enumerate() {
        if ch == '-' || ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else if i == 0 {
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Pluralize an English word using the usual inflector conventions.
fn pluralize(word: &str) -> String {
    const IRREGULAR: &[(&str, &str)] = &[
        ("person", "people"),
        ("child", "children"),
        ("man", "men"),
        ("woman", "women"),
        ("foot", "feet"),
        ("tooth", "teeth"),
    ];

    let lower = word.to_lowercase();
    for (singular, plural) in IRREGULAR {
        if lower == *singular {
            return (*plural).to_string();
        }
        // Compound camelized names keep their prefix: "blogPerson" → "blogPeople".
        if let Some(prefix) = word.strip_suffix(&capitalize(singular)) {
            return format!("{prefix}{}", capitalize(plural));
        }
    }

    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !is_vowel(c)) {
            return format!("{stem}ies");
        }
    }

    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{word}es");
    }

    format!("{word}s")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

// ============================================================================
// Tests
// ============================================================================
