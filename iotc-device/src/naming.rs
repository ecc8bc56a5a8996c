//! Blob naming policies.
//!
//! A session recognizes exactly one setting, and that setting decides where
//! uploads land. The two policies differ only in the setting they own, its
//! default, and how the destination blob name is built.

use std::fmt;
use std::path::Path;

use chrono::Utc;

use crate::settings::SettingName;

/// Where an upload goes and what the log line reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobTarget {
    /// Blob name handed to the upload capability
    pub destination: String,
    /// Path shown in the `uploadContent` log line
    pub log_path: String,
}

pub trait NamingPolicy: Send + Sync + fmt::Debug {
    /// The setting this policy owns
    fn setting(&self) -> SettingName;

    /// Value used at construction and whenever the cloud pushes a falsy value
    fn default_value(&self) -> String;

    fn blob_target(&self, source: &Path, setting_value: &str) -> BlobTarget;

    /// Message reported under the upload command once it completes.
    /// `blob` is `None` when the upload failed.
    fn command_message(&self, device_id: &str, blob: Option<&str>) -> String;
}

pub const DEFAULT_UPLOAD_FOLDER: &str = "Temp01";

/// Destination used by the folder policy unless the folder is honored
pub const FIXED_DESTINATION: &str = "foo/bar/test.json";

pub const SUFFIX_FORMAT: &str = "%Y%m%d-%H%M%S";

fn file_name(source: &Path) -> String {
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Files uploads by folder name (`SETTING_UPLOAD_FOLDERNAME`).
///
/// The folder is only reported in the log line and uploads go to
/// [`FIXED_DESTINATION`], unless `honor_folder` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct FolderNaming {
    pub honor_folder: bool,
}

impl FolderNaming {
    pub fn new(honor_folder: bool) -> FolderNaming {
        FolderNaming { honor_folder }
    }
}

impl NamingPolicy for FolderNaming {
    fn setting(&self) -> SettingName {
        SettingName::UploadFolderName
    }

    fn default_value(&self) -> String {
        DEFAULT_UPLOAD_FOLDER.to_owned()
    }

    fn blob_target(&self, source: &Path, setting_value: &str) -> BlobTarget {
        let log_path = format!("{}/{}", setting_value, file_name(source));
        let destination = if self.honor_folder {
            log_path.clone()
        } else {
            FIXED_DESTINATION.to_owned()
        };

        BlobTarget {
            destination,
            log_path,
        }
    }

    fn command_message(&self, device_id: &str, _blob: Option<&str>) -> String {
        format!("Received upload file command for deviceId: {}", device_id)
    }
}

/// Appends a suffix (`SETTING_FILENAME_SUFFIX`) to the uploaded file's stem.
/// The default suffix is the current UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampNaming;

impl NamingPolicy for TimestampNaming {
    fn setting(&self) -> SettingName {
        SettingName::FilenameSuffix
    }

    fn default_value(&self) -> String {
        Utc::now().format(SUFFIX_FORMAT).to_string()
    }

    fn blob_target(&self, source: &Path, setting_value: &str) -> BlobTarget {
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let destination = format!("{}-{}{}", stem, setting_value, extension);
        BlobTarget {
            log_path: destination.clone(),
            destination,
        }
    }

    fn command_message(&self, device_id: &str, blob: Option<&str>) -> String {
        match blob {
            Some(blob) => format!("Uploaded file for deviceId: {}, blob: {}", device_id, blob),
            None => format!("Upload failed for deviceId: {}", device_id),
        }
    }
}
