use std::{path::Path, str::FromStr};

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use std::fmt::Write;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref().to_path_buf();
    let content = std::fs::read_to_string(&path)?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate_has_downstreams(&config)?;

    Ok(config)
}

pub(crate) fn validate_has_downstreams(config: &Config) -> anyhow::Result<()> {
    let has_llm_providers = config.llm.enabled && config.llm.has_providers();
    let has_proxy = config.llm.enabled && config.llm.proxy.enabled;

    if !has_llm_providers && !has_proxy {
        bail!(indoc! {r#"
            No downstream configured. The gateway requires at least one LLM provider or the
            canonical proxy endpoint to function.

            Example configuration:

              [llm.providers.openai]
              type = "openai"
              api_key = "{{ env.OPENAI_API_KEY }}"

              [llm.providers.openai.models.gpt-4o]
        "#});
    }

    if has_llm_providers && !config.llm.has_protocol_endpoints() {
        bail!(indoc! {r#"
            LLM providers are configured but no protocol endpoints are enabled. At least one
            protocol endpoint must be enabled.

              [llm.protocols.openai]
              enabled = true
              path = "/llm/openai"

              [llm.protocols.anthropic]
              enabled = true
              path = "/llm/anthropic"
        "#});
    }

    let mut paths = vec![];

    if config.llm.protocols.openai.enabled {
        paths.push(("OpenAI", config.llm.protocols.openai.path.as_str()));
    }

    if config.llm.protocols.anthropic.enabled {
        paths.push(("Anthropic", config.llm.protocols.anthropic.path.as_str()));
    }

    if config.llm.proxy.enabled {
        paths.push(("proxy", config.llm.proxy.path.as_str()));
    }

    for i in 0..paths.len() {
        for j in (i + 1)..paths.len() {
            if paths[i].1 == paths[j].1 {
                bail!(
                    "Duplicate LLM endpoint path: {} and {} protocols cannot use the same path ({})",
                    paths[i].0,
                    paths[j].0,
                    paths[i].1
                );
            }
        }
    }

    Ok(())
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]").unwrap(),
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;

    use crate::Config;

    #[test]
    fn validation_fails_with_no_downstream() {
        let config = Config::default();
        let result = super::validate_has_downstreams(&config);
        assert!(result.is_err());
    }

    #[test]
    fn validation_passes_with_llm_provider() {
        let config_str = indoc! {r#"
            [llm.protocols.openai]
            enabled = true
            path = "/llm"

            [llm.providers.openai]
            type = "openai"
            api_key = "test-key"

            [llm.providers.openai.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        assert!(super::validate_has_downstreams(&config).is_ok());
    }

    #[test]
    fn validation_passes_with_proxy_only() {
        let config_str = indoc! {r#"
            [llm]
            enabled = true

            [llm.proxy]
            enabled = true
            path = "/llm/proxy"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        assert!(super::validate_has_downstreams(&config).is_ok());
    }

    #[test]
    fn validation_fails_when_providers_but_no_endpoints() {
        let config_str = indoc! {r#"
            [llm.protocols.openai]
            enabled = false

            [llm.providers.openai]
            type = "openai"
            api_key = "test-key"

            [llm.providers.openai.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let err = super::validate_has_downstreams(&config).unwrap_err();
        assert!(err.to_string().contains("no protocol endpoints are enabled"));
    }

    #[test]
    fn validation_fails_with_duplicate_endpoint_paths() {
        let config_str = indoc! {r#"
            [llm.protocols.openai]
            enabled = true
            path = "/llm"

            [llm.protocols.anthropic]
            enabled = true
            path = "/llm"

            [llm.providers.openai]
            type = "openai"
            api_key = "test-key"

            [llm.providers.openai.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let err = super::validate_has_downstreams(&config).unwrap_err();
        assert_snapshot!(err.to_string(), @"Duplicate LLM endpoint path: OpenAI and Anthropic protocols cannot use the same path (/llm)");
    }

    #[test]
    fn dynamic_string_expands_env_var() {
        unsafe { std::env::set_var("CONFIG_LOADER_TEST_KEY", "sk-test-123") };

        let config_str = indoc! {r#"
            [llm.providers.openai]
            type = "openai"
            api_key = "{{ env.CONFIG_LOADER_TEST_KEY }}"
        "#};

        let mut raw: toml::Value = toml::from_str(config_str).unwrap();
        super::expand_dynamic_strings(&mut Vec::new(), &mut raw).unwrap();

        let expanded = raw["llm"]["providers"]["openai"]["api_key"].as_str().unwrap();
        assert_eq!(expanded, "sk-test-123");
    }
}
