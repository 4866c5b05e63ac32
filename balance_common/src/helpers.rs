use std::{str::FromStr, time::Duration};

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a numeric setting, falling back to `default` when it is missing or malformed.
pub fn parse_number<T: FromStr + Copy>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

/// Reads an integer number of minutes from the environment as a [`Duration`].
pub fn env_minutes(key: &str, default_minutes: u64) -> Duration {
    Duration::from_secs(60 * parse_number(std::env::var(key).ok(), default_minutes))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boolean_flags() {
        assert!(parse_boolean_flag(Some("Yes".into()), false));
        assert!(!parse_boolean_flag(Some(" off ".into()), true));
        assert!(parse_boolean_flag(Some("maybe".into()), true));
        assert!(!parse_boolean_flag(None, false));
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number::<u32>(Some("16".into()), 4), 16);
        assert_eq!(parse_number::<u32>(Some("sixteen".into()), 4), 4);
        assert_eq!(parse_number::<u64>(None, 30), 30);
    }
}
