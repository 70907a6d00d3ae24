use std::{
    collections::HashMap,
    sync::LazyLock,
};

use regex::{Captures, Regex};
use serde_json::Value;
use teloxide::utils::{html, markdown};

use crate::api::{
    flow::TextFormat,
    storage::profile_storage::{Profile, UserInfo},
};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Replace every `{name}` with its value in one pass.
///
/// Unknown names fall back to the bare name. Substituted values are not scanned
/// again, so a value that itself looks like a placeholder is left as is.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    substitute_escaped(text, vars, TextFormat::Plain)
}

/// Same as [`substitute`], escaping the inserted values for the given text format
pub fn substitute_escaped(
    text: &str,
    vars: &HashMap<String, String>,
    format: TextFormat,
) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let value = vars.get(name).map(String::as_str).unwrap_or(name);
            match format {
                TextFormat::Plain => value.to_string(),
                TextFormat::Html => html::escape(value),
                TextFormat::MarkdownV2 => markdown::escape(value),
            }
        })
        .into_owned()
}

/// Human readable form of a stored profile value
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Build the substitution table for a user: stored answers first, then the
/// Telegram identity fields that are not shadowed by an answer.
pub fn variables_for(
    user: &UserInfo,
    profile: &Profile,
    default_user_name: &str,
) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = profile
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value)))
        .collect();

    let first_name = user.first_name.clone().unwrap_or_default();
    let user_name = if first_name.is_empty() {
        default_user_name.to_string()
    } else {
        first_name.clone()
    };
    let identity = [
        ("user_name", user_name),
        ("first_name", first_name),
        ("last_name", user.last_name.clone().unwrap_or_default()),
        ("username", user.username.clone().unwrap_or_default()),
        ("user_id", user.id.0.to_string()),
    ];
    for (key, value) in identity {
        vars.entry(key.to_string()).or_insert(value);
    }
    vars
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use teloxide::types::UserId;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let vars = vars(&[("name", "Анна"), ("age", "17")]);
        assert_eq!(
            substitute("{name}, вам {age}? Город: {city}", &vars),
            "Анна, вам 17? Город: city"
        );
    }

    #[test]
    fn test_substitute_ignores_non_identifiers() {
        let vars = vars(&[("a", "x")]);
        assert_eq!(substitute("{ a } {1a} {} {a}", &vars), "{ a } {1a} {} x");
    }

    #[test]
    fn test_substitute_does_not_rescan_values() {
        let vars = vars(&[("a", "{b}"), ("b", "boom")]);
        assert_eq!(substitute("{a}", &vars), "{b}");
    }

    #[test]
    fn test_substitute_is_idempotent_without_new_placeholders() {
        let vars = vars(&[("name", "Анна"), ("age", "17")]);
        let text = "Привет, {name}! Тебе {age}, а {missing} нет.";
        let once = substitute(text, &vars);
        assert_eq!(substitute(&once, &vars), once);
    }

    #[test]
    fn test_substitute_escapes_for_format() {
        let vars = vars(&[("name", "<b>Tom & Jerry</b>"), ("nick", "a_b.c")]);
        assert_eq!(
            substitute_escaped("<i>{name}</i>", &vars, TextFormat::Html),
            "<i>&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;</i>"
        );
        assert_eq!(
            substitute_escaped("*{nick}*", &vars, TextFormat::MarkdownV2),
            "*a\\_b\\.c*"
        );
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("text")), "text");
        assert_eq!(render_value(&json!(17)), "17");
        assert_eq!(render_value(&json!(["спорт", "музыка"])), "спорт, музыка");
        assert_eq!(render_value(&json!(null)), "");
        assert_eq!(render_value(&json!(true)), "true");
    }

    #[test]
    fn test_variables_for_user() {
        let user = UserInfo {
            id: UserId(42),
            username: Some("anna".to_string()),
            first_name: Some("Анна".to_string()),
            last_name: None,
        };
        let mut profile = Profile::new();
        profile.insert("age".to_string(), json!("17"));
        profile.insert("username".to_string(), json!("stored"));

        let vars = variables_for(&user, &profile, "Пользователь");
        assert_eq!(vars["user_name"], "Анна");
        assert_eq!(vars["age"], "17");
        assert_eq!(vars["user_id"], "42");
        assert_eq!(vars["last_name"], "");
        // Stored answers shadow identity fields
        assert_eq!(vars["username"], "stored");
    }

    #[test]
    fn test_user_name_fallback() {
        let user = UserInfo {
            id: UserId(7),
            username: None,
            first_name: None,
            last_name: None,
        };
        let vars = variables_for(&user, &Profile::new(), "Пользователь");
        assert_eq!(substitute("Привет, {user_name}!", &vars), "Привет, Пользователь!");
    }
}
