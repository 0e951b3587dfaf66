//! Non-fatal checks over a loaded configuration.
use super::Config;

/// A problem found in the configuration that does not stop dotstate from
/// running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The configuration source (e.g., "dotstate.toml").
    pub source: String,
    /// The key that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Create a warning about `item` from `source`.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            item: item.into(),
            message: message.into(),
        }
    }
}

/// Trait for configuration validators.
pub trait ConfigValidator {
    /// Validate the configuration and return any warnings found.
    fn validate(&self, config: &Config) -> Vec<ValidationWarning>;

    /// Return a human-readable name for this validator.
    fn name(&self) -> &'static str;
}

/// Checks plain settings for out-of-range values.
#[derive(Debug, Default)]
pub struct SettingsValidator;

impl ConfigValidator for SettingsValidator {
    fn validate(&self, config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        if config.umask > 0o777 {
            warnings.push(ValidationWarning::new(
                super::CONFIG_FILE,
                "umask",
                format!("umask {:o} is larger than 777", config.umask),
            ));
        }
        for ext in config.interpreters.keys() {
            if ext.is_empty() || ext.trim_start_matches('.').contains('.') {
                warnings.push(ValidationWarning::new(
                    super::CONFIG_FILE,
                    format!("interpreters.{ext}"),
                    "extension must be a single suffix such as \"rb\"",
                ));
            }
        }
        warnings
    }

    fn name(&self) -> &'static str {
        "settings"
    }
}

/// Checks that every external tool the configuration names can be found.
#[derive(Debug)]
pub struct ToolValidator {
    lookup: fn(&str) -> bool,
}

impl Default for ToolValidator {
    fn default() -> Self {
        Self {
            lookup: crate::exec::which,
        }
    }
}

impl ToolValidator {
    /// Validator resolving programs with `lookup` instead of `PATH`.
    #[must_use]
    pub const fn with_lookup(lookup: fn(&str) -> bool) -> Self {
        Self { lookup }
    }

    fn check(&self, warnings: &mut Vec<ValidationWarning>, item: String, program: &str, used_for: &str) {
        if program.is_empty() {
            warnings.push(ValidationWarning::new(
                super::CONFIG_FILE,
                item,
                "command is empty",
            ));
        } else if !(self.lookup)(program) {
            warnings.push(ValidationWarning::new(
                super::CONFIG_FILE,
                item,
                format!("{program} not found; {used_for} will fail"),
            ));
        }
    }
}

impl ConfigValidator for ToolValidator {
    fn validate(&self, config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        self.check(
            &mut warnings,
            "encryption.command".to_string(),
            &config.encryption.command,
            "encrypted files",
        );
        self.check(&mut warnings, "merge.command".to_string(), &config.merge.command, "merge");
        if let Some(secret) = &config.secret {
            self.check(
                &mut warnings,
                "secret.command".to_string(),
                &secret.command,
                "secret template functions",
            );
        }
        for (ext, spec) in config.interpreters() {
            self.check(
                &mut warnings,
                format!("interpreters.{ext}"),
                &spec.program,
                &format!(".{ext} scripts"),
            );
        }
        warnings
    }

    fn name(&self) -> &'static str {
        "tools"
    }
}

/// Run every validator against `config`.
#[must_use]
pub fn validate(config: &Config) -> Vec<ValidationWarning> {
    let validators: [&dyn ConfigValidator; 2] = [&SettingsValidator, &ToolValidator::default()];
    validators
        .iter()
        .flat_map(|v| {
            tracing::debug!("running {} validator", v.name());
            v.validate(config)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn config(text: &str) -> Config {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn default_settings_are_clean() {
        assert!(SettingsValidator.validate(&Config::default()).is_empty());
    }

    #[test]
    fn umask_out_of_range() {
        let warnings = SettingsValidator.validate(&config("umask = 0o1000"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].item, "umask");
        assert!(warnings[0].message.contains("larger than 777"));
    }

    #[test]
    fn interpreter_extension_must_be_a_suffix() {
        let warnings = SettingsValidator.validate(&config("[interpreters.\"tar.gz\"]\ncommand = \"x\"\n"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].item, "interpreters.tar.gz");
    }

    #[test]
    fn all_tools_found() {
        let validator = ToolValidator::with_lookup(|_| true);
        assert!(validator.validate(&Config::default()).is_empty());
    }

    #[test]
    fn missing_tools_are_reported() {
        let validator = ToolValidator::with_lookup(|program| program != "vimdiff" && program != "pass");
        let warnings = validator.validate(&config("[secret]\ncommand = \"pass\"\n"));
        let items: Vec<_> = warnings.iter().map(|w| w.item.as_str()).collect();
        assert_eq!(items, ["merge.command", "secret.command"]);
        assert!(warnings[0].message.contains("vimdiff not found"));
    }

    #[test]
    fn empty_command() {
        let validator = ToolValidator::with_lookup(|_| true);
        let warnings = validator.validate(&config("[merge]\ncommand = \"\"\n"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "command is empty");
    }
}
