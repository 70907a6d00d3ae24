use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::api::flow::{InputKind, InputSpec};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern is valid")
});
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+(?:[.,]\d+)?$").expect("number pattern is valid"));
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9\s\-()]{10,}$").expect("phone pattern is valid"));

/// Why a collected answer was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRejection {
    TooShort(usize),
    TooLong(usize),
    InvalidEmail,
    InvalidNumber,
    InvalidPhone,
}

impl InputRejection {
    /// Retry prompt shown when the node does not define its own
    pub fn default_text(&self) -> String {
        match self {
            InputRejection::TooShort(min) => format!(
                "❌ Слишком короткий ответ. Минимум символов: {}. Попробуйте еще раз.",
                min
            ),
            InputRejection::TooLong(max) => format!(
                "❌ Слишком длинный ответ. Максимум символов: {}. Попробуйте еще раз.",
                max
            ),
            InputRejection::InvalidEmail => {
                "❌ Неверный формат email. Попробуйте еще раз.".to_string()
            }
            InputRejection::InvalidNumber => "❌ Введите корректное число.".to_string(),
            InputRejection::InvalidPhone => {
                "❌ Неверный формат номера телефона. Попробуйте еще раз.".to_string()
            }
        }
    }
}

impl fmt::Display for InputRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRejection::TooShort(min) => write!(f, "shorter than {} characters", min),
            InputRejection::TooLong(max) => write!(f, "longer than {} characters", max),
            InputRejection::InvalidEmail => write!(f, "not an email address"),
            InputRejection::InvalidNumber => write!(f, "not a number"),
            InputRejection::InvalidPhone => write!(f, "not a phone number"),
        }
    }
}

/// Check a free-text answer against the node's input constraints.
/// Returns the trimmed answer to store.
pub fn validate_input(spec: &InputSpec, text: &str) -> Result<String, InputRejection> {
    let answer = text.trim();
    let length = answer.chars().count();

    if let Some(min) = spec.min_length
        && length < min
    {
        return Err(InputRejection::TooShort(min));
    }
    if let Some(max) = spec.max_length
        && length > max
    {
        return Err(InputRejection::TooLong(max));
    }

    let valid = match spec.kind {
        InputKind::Text => true,
        InputKind::Email => EMAIL.is_match(answer),
        InputKind::Number => NUMBER.is_match(answer),
        InputKind::Phone => PHONE.is_match(answer),
    };
    if !valid {
        return Err(match spec.kind {
            InputKind::Email => InputRejection::InvalidEmail,
            InputKind::Number => InputRejection::InvalidNumber,
            _ => InputRejection::InvalidPhone,
        });
    }

    Ok(answer.to_string())
}
