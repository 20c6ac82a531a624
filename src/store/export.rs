use crate::capture::record::LogRecord;
use std::str::FromStr;

pub const CSV_HEADER: [&str; 10] = [
    "ID",
    "Method",
    "URL",
    "IP Address",
    "User Agent",
    "Response Status",
    "Response Time (ms)",
    "User ID",
    "Correlation ID",
    "Created At",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("Unsupported export format '{}': expected 'json' or 'csv'", other)),
        }
    }
}

/// Render records as RFC 4180 CSV with a header row
pub fn to_csv(records: &[LogRecord]) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().copied());

    for record in records {
        let id = record.id.to_string();
        let status = record.response_status.to_string();
        let time = record.response_time_ms.to_string();
        let created_at = record.created_at.to_rfc3339();
        push_row(
            &mut out,
            [
                id.as_str(),
                record.method.as_str(),
                record.url.as_str(),
                record.ip_address.as_deref().unwrap_or(""),
                record.user_agent.as_deref().unwrap_or(""),
                status.as_str(),
                time.as_str(),
                record.user_id.as_deref().unwrap_or(""),
                record.correlation_id.as_str(),
                created_at.as_str(),
            ],
        );
    }

    out
}

fn push_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push_str("\r\n");
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::Headers;
    use chrono::{TimeZone, Utc};

    fn record() -> LogRecord {
        LogRecord {
            id: 3,
            method: "GET".to_string(),
            url: "http://h/api?a=1,2".to_string(),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some(r#"Agent "quoted""#.to_string()),
            request_headers: Headers::new(),
            request_body: None,
            response_headers: Headers::new(),
            response_body: None,
            response_status: 200,
            response_time_ms: 12.5,
            user_id: None,
            session_id: None,
            correlation_id: "abc".to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_csv_quotes_special_fields() {
        let csv = to_csv(&[record()]);
        let lines: Vec<_> = csv.split("\r\n").collect();

        assert_eq!(
            lines[0],
            "ID,Method,URL,IP Address,User Agent,Response Status,Response Time (ms),User ID,Correlation ID,Created At"
        );
        assert_eq!(
            lines[1],
            r#"3,GET,"http://h/api?a=1,2",10.0.0.1,"Agent ""quoted""",200,12.5,,abc,2024-01-02T03:04:05+00:00"#
        );
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert_eq!("json".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
