use super::{load_aws_config, read_closed_file, ClosedFile, Sink, UploadReceipt};
use crate::error::{ArchiveError, Result};
use crate::record::TIME_PUBLISHED_FIELD;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

const COMPANY_FIELD: &str = "companyName";
const DEPARTMENT_FIELD: &str = "departmentName";
const DEVICE_FIELD: &str = "deviceId";

pub struct TableStoreSink {
    client: Client,
    table: String,
}

impl TableStoreSink {
    pub async fn connect(table: &str, region: &str, endpoint: Option<&str>) -> Self {
        let sdk_config = load_aws_config(region).await;
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        info!(table, region, "table store sink initialized");
        Self::new(Client::from_conf(builder.build()), table)
    }

    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

/// Maps one file line to a table item. The key attributes are required; other
/// scalar fields ride along, nested values are stored as JSON text.
pub fn table_row(line: &str) -> std::result::Result<HashMap<String, AttributeValue>, String> {
    let value: JsonValue = serde_json::from_str(line).map_err(|err| err.to_string())?;
    let JsonValue::Object(fields) = value else {
        return Err("line is not a JSON object".to_string());
    };

    let mut item = HashMap::with_capacity(fields.len());
    for (name, field) in &fields {
        let attr = match field {
            JsonValue::Null => continue,
            JsonValue::Bool(flag) => AttributeValue::Bool(*flag),
            JsonValue::Number(num) => AttributeValue::N(num.to_string()),
            JsonValue::String(text) => AttributeValue::S(text.clone()),
            nested => AttributeValue::S(nested.to_string()),
        };
        item.insert(name.clone(), attr);
    }

    for name in [COMPANY_FIELD, DEPARTMENT_FIELD] {
        match fields.get(name) {
            Some(JsonValue::String(text)) if !text.trim().is_empty() => {}
            _ => return Err(format!("missing string {name}")),
        }
    }

    let device_id = match fields.get(DEVICE_FIELD) {
        Some(JsonValue::Number(num)) if num.is_i64() || num.is_u64() => num.to_string(),
        Some(JsonValue::String(text)) => match text.trim().parse::<i64>() {
            Ok(id) => id.to_string(),
            Err(_) => return Err(format!("{DEVICE_FIELD} {text:?} is not an integer")),
        },
        _ => return Err(format!("missing integer {DEVICE_FIELD}")),
    };
    item.insert(DEVICE_FIELD.to_string(), AttributeValue::N(device_id));

    let published = match fields.get(TIME_PUBLISHED_FIELD) {
        Some(JsonValue::String(text)) => text.clone(),
        Some(JsonValue::Number(num)) => num.to_string(),
        _ => return Err(format!("missing {TIME_PUBLISHED_FIELD}")),
    };
    item.insert(TIME_PUBLISHED_FIELD.to_string(), AttributeValue::S(published));

    Ok(item)
}

#[async_trait]
impl Sink for TableStoreSink {
    fn name(&self) -> &'static str {
        "table-store"
    }

    async fn upload(&self, file: &ClosedFile) -> Result<UploadReceipt> {
        let data = read_closed_file(file).await?;
        let bytes = data.len() as u64;
        let text = String::from_utf8_lossy(&data);

        let (items, skipped) = table_rows(&text, &file.path);
        let mut written = 0u64;
        for item in items {
            // Put-by-primary-key overwrites, so replaying a file is harmless.
            self.client
                .put_item()
                .table_name(&self.table)
                .set_item(Some(item))
                .send()
                .await
                .map_err(|err| ArchiveError::upload(&file.path, DisplayErrorContext(err)))?;
            written += 1;
        }
        debug!(table=%self.table, written, "put items");

        info!(table=%self.table, written, skipped, day=%file.day, "uploaded day file rows");
        Ok(UploadReceipt { bytes })
    }
}

/// Maps every non-empty line; unmappable lines are logged and counted, never
/// sent, so one bad line cannot hold back the rest of the file.
fn table_rows(text: &str, path: &Path) -> (Vec<HashMap<String, AttributeValue>>, u64) {
    let mut items = Vec::new();
    let mut skipped = 0u64;
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match table_row(line) {
            Ok(item) => items.push(item),
            Err(reason) => {
                skipped += 1;
                warn!(path=%path.display(), line = idx + 1, %reason, "skipping unmappable line");
            }
        }
    }
    (items, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_key_attributes_and_passes_scalars_through() {
        let item = table_row(
            r#"{"companyName":"acme","departmentName":"ops","deviceId":42,"timePublished":"2023-11-28 12:00:00","temp":21.5,"ok":true,"tags":["a"],"gone":null}"#,
        )
        .unwrap();

        assert_eq!(item["companyName"], AttributeValue::S("acme".into()));
        assert_eq!(item["departmentName"], AttributeValue::S("ops".into()));
        assert_eq!(item["deviceId"], AttributeValue::N("42".into()));
        assert_eq!(item["timePublished"], AttributeValue::S("2023-11-28 12:00:00".into()));
        assert_eq!(item["temp"], AttributeValue::N("21.5".into()));
        assert_eq!(item["ok"], AttributeValue::Bool(true));
        assert_eq!(item["tags"], AttributeValue::S(r#"["a"]"#.into()));
        assert!(!item.contains_key("gone"));
    }

    #[test]
    fn numeric_device_id_strings_are_accepted() {
        let item = table_row(
            r#"{"companyName":"acme","departmentName":"ops","deviceId":" 7 ","timePublished":"2023-11-28"}"#,
        )
        .unwrap();
        assert_eq!(item["deviceId"], AttributeValue::N("7".into()));
    }

    #[test]
    fn rejects_rows_missing_key_attributes() {
        assert!(table_row("garbage").is_err());
        assert!(table_row("[]").is_err());
        assert!(table_row(r#"{"departmentName":"ops","deviceId":1,"timePublished":"x"}"#).is_err());
        assert!(table_row(r#"{"companyName":"a","departmentName":"ops","deviceId":"abc","timePublished":"x"}"#).is_err());
        assert!(table_row(r#"{"companyName":"a","departmentName":"ops","deviceId":1}"#).is_err());
    }

    #[test]
    fn bad_lines_are_skipped_not_sent() {
        let text = concat!(
            r#"{"companyName":"a","departmentName":"ops","deviceId":1,"timePublished":"2023-11-28 01:00:00"}"#,
            "\n",
            r#"{"companyName":"a","departmentName":"ops","deviceId":"NaN","timePublished":"2023-11-28 02:00:00"}"#,
            "\n\n",
            r#"{"companyName":"a","departmentName":"ops","deviceId":2,"timePublished":"2023-11-28 03:00:00"}"#,
            "\n",
        );

        let (items, skipped) = table_rows(text, Path::new("messages_2023-11-28.log"));

        assert_eq!(skipped, 1);
        let ids: Vec<_> = items.iter().map(|item| item["deviceId"].clone()).collect();
        assert_eq!(ids, vec![AttributeValue::N("1".into()), AttributeValue::N("2".into())]);
    }

    #[test]
    fn device_id_must_be_an_integer() {
        for device_id in [
            r#""NaN""#,
            r#""inf""#,
            r#""-infinity""#,
            r#""1e999""#,
            r#""1.5""#,
            "1.5",
            "-3.0",
        ] {
            let line = format!(
                r#"{{"companyName":"a","departmentName":"ops","deviceId":{device_id},"timePublished":"2023-11-28"}}"#
            );
            assert!(table_row(&line).is_err(), "{device_id}");
        }
        let item = table_row(
            r#"{"companyName":"a","departmentName":"ops","deviceId":"-12","timePublished":"2023-11-28"}"#,
        )
        .unwrap();
        assert_eq!(item["deviceId"], AttributeValue::N("-12".into()));
    }
}
