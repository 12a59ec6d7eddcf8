//! A string wrapper that expands environment variable references at parse time.
//!
//! Supports two interchangeable syntaxes so operators can use whichever reads better in a given
//! TOML document: `{{ env.VAR }}` and `${VAR}`. A plain string with no references passes through
//! unchanged.

use std::{fmt, marker::PhantomData, str::FromStr};

use regex::Regex;
use serde::{Deserialize, Deserializer, de};

/// Wraps a `T: FromStr` value, expanding `{{ env.VAR }}` / `${VAR}` references in the source
/// string against the process environment before parsing `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicString<T>(T);

impl<T> DynamicString<T> {
    /// Unwraps the expanded, parsed value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    #[error("environment variable '{0}' is not set")]
    MissingVar(String),
    #[error("failed to parse expanded value: {0}")]
    Parse(E),
}

fn pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

fn expand(input: &str) -> Result<String, String> {
    let mut missing = None;

    let expanded = pattern().replace_all(input, |caps: &regex::Captures<'_>| {
        let name = caps.get(1).or_else(|| caps.get(2)).unwrap().as_str();

        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(name),
        None => Ok(expanded.into_owned()),
    }
}

impl<T> FromStr for DynamicString<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    type Err = Error<T::Err>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expanded = expand(s).map_err(Error::MissingVar)?;
        let value = expanded.parse().map_err(Error::Parse)?;

        Ok(Self(value))
    }
}

impl<'de, T> Deserialize<'de> for DynamicString<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor<T>(PhantomData<T>);

        impl<'de, T> de::Visitor<'de> for Visitor<T>
        where
            T: FromStr,
            T::Err: fmt::Display,
        {
            type Value = DynamicString<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, optionally containing {{ env.VAR }} or ${VAR} references")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                DynamicString::from_str(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(Visitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_without_references() {
        let value = DynamicString::<String>::from_str("plain-value").unwrap();
        assert_eq!(value.into_inner(), "plain-value");
    }

    #[test]
    fn expands_curly_syntax() {
        // SAFETY: test runs single-threaded within this process's test harness for this var name.
        unsafe { std::env::set_var("DYNAMIC_STRING_TEST_CURLY", "secret-1") };
        let value = DynamicString::<String>::from_str("{{ env.DYNAMIC_STRING_TEST_CURLY }}").unwrap();
        assert_eq!(value.into_inner(), "secret-1");
    }

    #[test]
    fn expands_dollar_syntax() {
        unsafe { std::env::set_var("DYNAMIC_STRING_TEST_DOLLAR", "secret-2") };
        let value = DynamicString::<String>::from_str("prefix-${DYNAMIC_STRING_TEST_DOLLAR}-suffix").unwrap();
        assert_eq!(value.into_inner(), "prefix-secret-2-suffix");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let err = DynamicString::<String>::from_str("{{ env.DYNAMIC_STRING_TEST_MISSING_XYZ }}").unwrap_err();
        assert!(matches!(err, Error::MissingVar(name) if name == "DYNAMIC_STRING_TEST_MISSING_XYZ"));
    }
}
