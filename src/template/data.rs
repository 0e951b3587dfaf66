//! Template data: host facts and the layered data merge.
use std::path::Path;

use serde_json::{Map, Value};

use crate::platform::Platform;

/// Key under which computed facts are exposed.
pub const FACTS_KEY: &str = "dotstate";

/// Computed facts for the current run.
#[must_use]
pub fn facts(platform: &Platform, source_dir: &Path, dest_dir: &Path) -> Map<String, Value> {
    let mut facts = match serde_json::to_value(platform) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    facts.insert(
        "source_dir".to_string(),
        Value::from(source_dir.display().to_string()),
    );
    facts.insert(
        "dest_dir".to_string(),
        Value::from(dest_dir.display().to_string()),
    );
    facts.insert("version".to_string(), Value::from(crate::version()));
    facts
}

/// Merge `overlay` into `base`; nested objects merge recursively and every
/// other value in `overlay` replaces the one in `base`.
pub fn merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Build the data tree from lowest to highest priority layer.
#[must_use]
pub fn layered(facts: Map<String, Value>, layers: &[&Map<String, Value>]) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(FACTS_KEY.to_string(), Value::Object(facts));
    for layer in layers {
        merge(&mut data, layer);
    }
    data
}

/// Parse `key=value` overrides; dotted keys create nested objects and values
/// are parsed as TOML when possible, otherwise kept as strings.
///
/// # Errors
///
/// Returns a message naming the malformed item.
pub fn parse_overrides(items: &[String]) -> Result<Map<String, Value>, String> {
    let mut out = Map::new();
    for item in items {
        let (key, raw) = item
            .split_once('=')
            .ok_or_else(|| format!("invalid data override '{item}': expected key=value"))?;
        let value = toml::from_str::<Map<String, Value>>(&format!("v = {raw}"))
            .ok()
            .and_then(|mut m| m.remove("v"))
            .unwrap_or_else(|| Value::from(raw));
        let mut nested = value;
        for part in key.trim().rsplit('.') {
            if part.is_empty() {
                return Err(format!("invalid data override '{item}': empty key"));
            }
            let mut map = Map::new();
            map.insert(part.to_string(), nested);
            nested = Value::Object(map);
        }
        if let Value::Object(map) = nested {
            merge(&mut out, &map);
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::platform::Os;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn merge_is_deep() {
        let mut base = obj(json!({"git": {"name": "a", "email": "x"}, "n": 1}));
        merge(&mut base, &obj(json!({"git": {"email": "y"}, "n": 2})));
        assert_eq!(
            Value::Object(base),
            json!({"git": {"name": "a", "email": "y"}, "n": 2})
        );
    }

    #[test]
    fn higher_layers_win() {
        let facts = facts(
            &Platform::new(Os::Linux, "box"),
            Path::new("/src"),
            Path::new("/home/user"),
        );
        let source = obj(json!({"email": "source@example.com", "theme": "dark"}));
        let cli = obj(json!({"email": "cli@example.com"}));
        let data = layered(facts, &[&source, &cli]);
        assert_eq!(data["email"], "cli@example.com");
        assert_eq!(data["theme"], "dark");
        assert_eq!(data[FACTS_KEY]["hostname"], "box");
        assert_eq!(data[FACTS_KEY]["os"], "linux");
        assert_eq!(data[FACTS_KEY]["source_dir"], "/src");
    }

    #[test]
    fn overrides_parse_types_and_nesting() {
        let data = parse_overrides(&[
            "git.email=a@b.com".to_string(),
            "work=true".to_string(),
            "count=3".to_string(),
        ])
        .unwrap();
        assert_eq!(
            Value::Object(data),
            json!({"git": {"email": "a@b.com"}, "work": true, "count": 3})
        );
    }

    #[test]
    fn overrides_reject_missing_equals() {
        assert!(parse_overrides(&["oops".to_string()]).is_err());
    }
}
