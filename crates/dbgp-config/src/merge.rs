use crate::config::Config;
use crate::error::ConfigError;

/// Overlay a TOML fragment on `base`. Keys absent from the overlay keep
/// their `base` values; nested tables merge key by key.
pub fn merge_configs(base: &Config, overlay_toml: &str) -> Result<Config, ConfigError> {
    let parse = |e: toml::de::Error| ConfigError::Parse(e.to_string());

    let mut base_val = toml::Value::try_from(base).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let overlay_val: toml::Value = toml::from_str(overlay_toml).map_err(parse)?;

    merge_values(&mut base_val, overlay_val);

    base_val.try_into().map_err(parse)
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, val) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, val),
                    None => {
                        base_table.insert(key, val);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
