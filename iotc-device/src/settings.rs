use std::fmt;

use serde_json::Value;

/// The device settings the cloud may push as desired properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingName {
    /// Folder uploads are filed under
    UploadFolderName,
    /// Suffix appended to uploaded file names
    FilenameSuffix,
}

impl SettingName {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingName::UploadFolderName => "SETTING_UPLOAD_FOLDERNAME",
            SettingName::FilenameSuffix => "SETTING_FILENAME_SUFFIX",
        }
    }
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local mirror of the one setting a session recognizes.
/// Always holds a non-empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    name: SettingName,
    value: String,
}

impl DeviceSettings {
    pub fn new(name: SettingName, value: String) -> DeviceSettings {
        debug_assert!(!value.is_empty());
        DeviceSettings { name, value }
    }

    pub fn name(&self) -> SettingName {
        self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Looks a setting up by its wire name
    pub fn get(&self, key: &str) -> Option<&str> {
        if key == self.name.as_str() {
            Some(&self.value)
        } else {
            None
        }
    }

    pub(crate) fn replace(&mut self, value: String) {
        debug_assert!(!value.is_empty());
        self.value = value;
    }
}

/// The string a desired value stores as, or `None` when the value is falsy
/// (`null`, `false`, `0`, `""`) and the default applies instead
pub fn truthy_setting_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(false) => None,
        Value::Number(n) if n.as_f64().map_or(false, |n| n == 0.0) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_falsy_values() {
        for value in &[json!(null), json!(false), json!(0), json!(0.0), json!("")] {
            assert_eq!(truthy_setting_value(value), None, "{} should be falsy", value);
        }
    }

    #[test]
    fn test_truthy_values() {
        assert_eq!(truthy_setting_value(&json!("Temp02")), Some("Temp02".to_owned()));
        assert_eq!(truthy_setting_value(&json!(7)), Some("7".to_owned()));
        assert_eq!(truthy_setting_value(&json!(true)), Some("true".to_owned()));
        assert_eq!(truthy_setting_value(&json!({})), Some("{}".to_owned()));
    }

    #[test]
    fn test_get_by_wire_name() {
        let settings = DeviceSettings::new(SettingName::UploadFolderName, "Temp01".to_owned());

        assert_eq!(settings.get("SETTING_UPLOAD_FOLDERNAME"), Some("Temp01"));
        assert_eq!(settings.get("SETTING_FILENAME_SUFFIX"), None);
    }
}
