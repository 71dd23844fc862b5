//! Source calendar exports.
//!
//! A sync job points at a schedule page; [`ExportLocation::resolve`] turns
//! that into the ICS export URL, [`SourceExport`] fetches it and
//! [`parse::parse_export`] normalizes it into canonical events.

pub mod parse;

use async_trait::async_trait;
use url::Url;

use crate::error::{CalSyncError, CalSyncResult};

pub use parse::parse_export;

const SCHEDULE_PAGE: &str = "Schema.jsp";
const ICS_EXPORT: &str = "SchemaICAL.ics";
const RESOURCE_PARAM: &str = "resurser";

/// Fetches the raw text of an ICS export.
#[async_trait]
pub trait SourceExport: Send + Sync {
    async fn fetch(&self, url: &Url) -> CalSyncResult<String>;
}

/// Fetches exports over HTTP(S).
#[derive(Clone, Default)]
pub struct HttpExport {
    client: reqwest::Client,
}

impl HttpExport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceExport for HttpExport {
    async fn fetch(&self, url: &Url) -> CalSyncResult<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CalSyncError::Source(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalSyncError::Source(format!("GET {} returned {}", url, status)));
        }

        response
            .text()
            .await
            .map_err(|e| CalSyncError::Source(format!("Reading {} failed: {}", url, e)))
    }
}

/// Where a schedule's ICS export lives, and which resources it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportLocation {
    pub ics_url: Url,
    /// Resource codes from the `resurser` parameter, in order.
    pub resource_ids: Vec<String>,
}

impl ExportLocation {
    /// Rewrite a schedule page URL (`.../Schema.jsp?...`) into its ICS export
    /// (`.../SchemaICAL.ics?...`), keeping every query parameter. URLs that
    /// already point at the export pass through unchanged.
    pub fn resolve(source_url: &str) -> CalSyncResult<Self> {
        let mut url = Url::parse(source_url)
            .map_err(|e| CalSyncError::Validation(format!("Invalid source URL '{}': {}", source_url, e)))?;

        let mut segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        let last = segments.pop().unwrap_or_default();
        let export = if last.eq_ignore_ascii_case(SCHEDULE_PAGE) {
            ICS_EXPORT.to_string()
        } else if last.eq_ignore_ascii_case(ICS_EXPORT) {
            last
        } else {
            replace_ignore_case(&last, SCHEDULE_PAGE, ICS_EXPORT)
        };
        segments.push(export);
        url.set_path(&format!("/{}", segments.join("/")));

        let resource_ids = url
            .query_pairs()
            .filter(|(k, _)| k == RESOURCE_PARAM)
            .flat_map(|(_, v)| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.rsplit('.').next().unwrap_or(s).to_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(ExportLocation {
            ics_url: url,
            resource_ids,
        })
    }

    /// The first resource id; names the target calendar.
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_ids.first().map(String::as_str)
    }
}

fn replace_ignore_case(haystack: &str, needle: &str, replacement: &str) -> String {
    match haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase()) {
        Some(pos) => format!(
            "{}{}{}",
            &haystack[..pos],
            replacement,
            &haystack[pos + needle.len()..]
        ),
        None => haystack.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_page_rewritten_to_ics_export() {
        let loc = ExportLocation::resolve(
            "https://schema.example.se/setup/jsp/Schema.jsp?startDatum=idag&intervallTyp=a&resurser=p.TGIAR25h",
        )
        .unwrap();

        assert_eq!(loc.ics_url.path(), "/setup/jsp/SchemaICAL.ics");
        assert_eq!(
            loc.ics_url.query(),
            Some("startDatum=idag&intervallTyp=a&resurser=p.TGIAR25h")
        );
        assert_eq!(loc.resource_id(), Some("TGIAR25h"));
    }

    #[test]
    fn test_export_url_passes_through() {
        let loc =
            ExportLocation::resolve("https://schema.example.se/setup/jsp/SchemaICAL.ics?resurser=k.A")
                .unwrap();
        assert_eq!(loc.ics_url.path(), "/setup/jsp/SchemaICAL.ics");
        assert_eq!(loc.resource_ids, vec!["A"]);
    }

    #[test]
    fn test_resources_split_across_params_and_commas() {
        let loc = ExportLocation::resolve(
            "https://schema.example.se/Schema.jsp?resurser=k.MT155A-20252-TS250-%2C&resurser=p.X, p.Y",
        )
        .unwrap();
        assert_eq!(loc.resource_ids, vec!["MT155A-20252-TS250-", "X", "Y"]);
    }

    #[test]
    fn test_no_resources_means_no_calendar_name() {
        let loc = ExportLocation::resolve("https://example.com/cal/Schema.jsp").unwrap();
        assert_eq!(loc.resource_id(), None);
        assert_eq!(loc.ics_url.path(), "/cal/SchemaICAL.ics");
    }

    #[test]
    fn test_invalid_url_is_a_validation_error() {
        assert!(matches!(
            ExportLocation::resolve("not a url"),
            Err(CalSyncError::Validation(_))
        ));
    }
}
