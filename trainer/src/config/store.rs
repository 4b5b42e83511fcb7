use std::{fs, path::Path};

use log::{debug, warn};
use serde_yaml::{Mapping, Value};

use super::RunConfiguration;
use crate::{Result, TrainErr};

/// Produces the configuration of a run: built in defaults merged with an override file.
pub struct ConfigStore;

impl ConfigStore {
    /// Returns the built in default configuration.
    pub fn defaults() -> RunConfiguration {
        RunConfiguration::default()
    }

    /// Merges the YAML override file at `path` onto a copy of `config`.
    ///
    /// Keys are matched case insensitively against the keys of `config`. Recognized scalars and
    /// sequences replace the current value, recognized mappings are merged recursively and
    /// unrecognized keys are ignored with a warning.
    ///
    /// # Arguments
    /// * `config` - The base configuration, left untouched.
    /// * `path` - The override file.
    ///
    /// # Returns
    /// The merged configuration, `ConfigNotFound` if `path` isn't an existing file or
    /// `ConfigParse` if it isn't valid YAML or some recognized key has a value of the wrong type.
    pub fn apply_overrides(config: &RunConfiguration, path: &Path) -> Result<RunConfiguration> {
        if !path.is_file() {
            return Err(TrainErr::ConfigNotFound(path.to_path_buf()));
        }

        let parse_err = |msg: String| TrainErr::ConfigParse {
            path: path.to_path_buf(),
            msg,
        };

        let content = fs::read_to_string(path)?;
        let overrides: Value =
            serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?;

        let mut merged = serde_yaml::to_value(config).map_err(|e| parse_err(e.to_string()))?;

        match overrides {
            Value::Null => debug!("empty configuration file, keeping defaults"),
            Value::Mapping(overrides) => merge(&mut merged, overrides, ""),
            other => {
                return Err(parse_err(format!(
                    "expected a mapping at the top level, got {}",
                    kind(&other)
                )));
            }
        }

        serde_yaml::from_value(merged).map_err(|e| parse_err(e.to_string()))
    }
}

/// Merges `overrides` onto `base` in place, `prefix` is the dotted path of `base`.
fn merge(base: &mut Value, overrides: Mapping, prefix: &str) {
    let Value::Mapping(base) = base else {
        return;
    };

    for (key, value) in overrides {
        let Some(name) = key.as_str() else {
            warn!(section = prefix; "ignoring non string configuration key {key:?}");
            continue;
        };

        let full = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };

        let Some(slot) = find_key(base, name) else {
            warn!(key = full.as_str(); "ignoring unknown configuration key");
            continue;
        };

        match value {
            Value::Mapping(nested) if slot.is_mapping() => merge(slot, nested, &full),
            value => {
                debug!(key = full.as_str(); "overriding configuration value");
                *slot = value;
            }
        }
    }
}

fn find_key<'a>(base: &'a mut Mapping, name: &str) -> Option<&'a mut Value> {
    base.iter_mut()
        .find(|(k, _)| k.as_str().is_some_and(|k| k.eq_ignore_ascii_case(name)))
        .map(|(_, v)| v)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn override_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let defaults = ConfigStore::defaults();
        let result = ConfigStore::apply_overrides(&defaults, Path::new("/nonexistent/run.yaml"));

        assert!(matches!(result, Err(TrainErr::ConfigNotFound(_))));
    }

    #[test]
    fn overrides_only_the_given_keys() {
        let defaults = ConfigStore::defaults();
        let file = override_file("train:\n  epoch: 1\n  scheduler:\n    milestones: [3, 5]\n");

        let merged = ConfigStore::apply_overrides(&defaults, file.path()).unwrap();

        let mut expected = defaults.clone();
        expected.train.epoch = 1;
        expected.train.scheduler.milestones = vec![3, 5];
        assert_eq!(merged, expected);
    }

    #[test]
    fn keys_match_case_insensitively() {
        let defaults = ConfigStore::defaults();
        let file = override_file("TRAIN:\n  EPOCH: 3\n  GIOU_WEIGHT: 4\nDATA:\n  SEARCH:\n    FACTOR: 4.5\n");

        let merged = ConfigStore::apply_overrides(&defaults, file.path()).unwrap();

        assert_eq!(merged.train.epoch, 3);
        assert_eq!(merged.train.giou_weight, 4.0);
        assert_eq!(merged.data.search.factor, 4.5);
        assert_eq!(merged.train.l1_weight, defaults.train.l1_weight);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let defaults = ConfigStore::defaults();
        let file = override_file("train:\n  epoch: 2\n  warmup: 10\nfuture_section:\n  x: 1\n");

        let merged = ConfigStore::apply_overrides(&defaults, file.path()).unwrap();

        let mut expected = defaults.clone();
        expected.train.epoch = 2;
        assert_eq!(merged, expected);
    }

    #[test]
    fn wrong_value_type_is_a_parse_error() {
        let defaults = ConfigStore::defaults();
        let file = override_file("train:\n  epoch: many\n");

        let result = ConfigStore::apply_overrides(&defaults, file.path());
        assert!(matches!(result, Err(TrainErr::ConfigParse { .. })));
    }

    #[test]
    fn empty_file_keeps_defaults() {
        let defaults = ConfigStore::defaults();
        let file = override_file("");

        let merged = ConfigStore::apply_overrides(&defaults, file.path()).unwrap();
        assert_eq!(merged, defaults);
    }

    #[test]
    fn optional_values_can_be_set_and_cleared() {
        let defaults = ConfigStore::defaults();
        let file = override_file("train:\n  grad_clip_norm: null\n  max_steps: 10\n");

        let merged = ConfigStore::apply_overrides(&defaults, file.path()).unwrap();
        assert_eq!(merged.train.grad_clip_norm, None);
        assert_eq!(merged.train.max_steps, Some(10));
    }
}
