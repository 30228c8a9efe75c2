// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::app::types::{ExecutionContext, StorageTarget};

pub const EXECUTION_FILE_NAME: &str = "execution.json";
const DATASTREAM_METADATA_DIR: &str = "datastream-metadata";
const FORCING_METADATA_DIR: &str = "metadata";
const FORCING_MARKER: &str = "forcing";

/// Where the execution record of a daily job goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTarget {
    pub bucket: String,
    pub key: String,
}

impl MetadataTarget {
    pub fn for_storage(storage: &StorageTarget) -> Self {
        Self {
            bucket: storage.bucket.clone(),
            key: metadata_key(&storage.prefix),
        }
    }
}

/// Forcing-only runs keep their record under `metadata/`, full runs under
/// `datastream-metadata/`.
pub fn metadata_key(prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let dir = if prefix.contains(FORCING_MARKER) {
        FORCING_METADATA_DIR
    } else {
        DATASTREAM_METADATA_DIR
    };
    format!("{prefix}/{dir}/{EXECUTION_FILE_NAME}")
}

/// Pretty JSON with four-space indentation.
pub fn render(ctx: &ExecutionContext) -> Result<Vec<u8>, serde_json::Error> {
    let mut body = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut body, PrettyFormatter::with_indent(b"    "));
    ctx.serialize(&mut serializer)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::JobSubmission;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn datastream_runs_use_datastream_metadata_dir() {
        assert_eq!(
            metadata_key("path/20240531/x"),
            "path/20240531/x/datastream-metadata/execution.json"
        );
        assert_eq!(
            metadata_key("path/20240531/x/"),
            "path/20240531/x/datastream-metadata/execution.json"
        );
    }

    #[test]
    fn forcing_runs_use_metadata_dir() {
        assert_eq!(
            metadata_key("forcings/v3/20240531"),
            "forcings/v3/20240531/metadata/execution.json"
        );
    }

    #[test]
    fn rendered_record_is_indented_json_of_the_context() {
        let submission: JobSubmission = serde_json::from_value(json!({
            "instance_parameters": {
                "ImageId": "ami-1",
                "InstanceType": "t4g.large",
                "IamInstanceProfile": { "Name": "role" }
            },
            "commands": ["echo hi"]
        }))
        .expect("submission");
        let ctx = submission
            .into_context("us-west-2", datetime!(2024-06-01 00:00 UTC))
            .expect("context");

        let body = render(&ctx).expect("render");
        let text = String::from_utf8(body).expect("utf8");
        assert!(text.starts_with("{\n    \""));
        let parsed: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(parsed["instance_parameters"]["InstanceType"], "t4g.large");
        assert_eq!(parsed["commands"], json!(["echo hi"]));
    }
}
