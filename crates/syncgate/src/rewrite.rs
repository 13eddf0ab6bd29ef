//! Legacy path versioning and trace stamping

use std::collections::BTreeMap;

use syncgate_core::config::VersioningConfig;
use syncgate_core::Headers;

/// Result of [`VersionRewriter::rewrite`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// Path (and query) to send
    pub url: String,
    /// Headers with version and trace stamped
    pub headers: Headers,
    /// Value written to the version header
    pub version: String,
}

/// Maps legacy endpoint paths to versioned ones.
///
/// Deterministic: the trace id is supplied by the caller, one per physical
/// attempt.
#[derive(Debug, Clone)]
pub struct VersionRewriter {
    mappings: BTreeMap<String, String>,
    /// Legacy prefixes, longest first
    prefixes: Vec<String>,
    version_header: String,
    trace_header: String,
    default_version: String,
}

impl VersionRewriter {
    /// Build from configuration
    pub fn new(config: &VersioningConfig) -> Self {
        let mut prefixes: Vec<String> = config.mappings.keys().cloned().collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self {
            mappings: config.mappings.clone(),
            prefixes,
            version_header: config.version_header.clone(),
            trace_header: config.trace_header.clone(),
            default_version: config.default_version.clone(),
        }
    }

    /// Rewrite `url` and stamp `headers`.
    ///
    /// Exact mapping match first, then the longest legacy prefix ending on a
    /// segment boundary. The version header carries the digits of the first
    /// `/v<N>` segment of the resulting path, or the default version.
    pub fn rewrite(&self, url: &str, headers: &Headers, trace_id: &str) -> Rewritten {
        let (path, suffix) = match url.find(['?', '#']) {
            Some(at) => url.split_at(at),
            None => (url, ""),
        };

        let mapped = self.map_path(path);
        let version = path_version(&mapped).unwrap_or_else(|| self.default_version.clone());

        let mut headers = headers.clone();
        headers.insert(&self.version_header, version.clone());
        headers.insert(&self.trace_header, trace_id);

        Rewritten {
            url: format!("{mapped}{suffix}"),
            headers,
            version,
        }
    }

    fn map_path(&self, path: &str) -> String {
        if let Some(target) = self.mappings.get(path) {
            return target.clone();
        }
        for legacy in &self.prefixes {
            let Some(rest) = path.strip_prefix(legacy.as_str()) else {
                continue;
            };
            if rest.starts_with('/') || legacy.ends_with('/') {
                if let Some(target) = self.mappings.get(legacy) {
                    return format!("{target}{rest}");
                }
            }
        }
        path.to_string()
    }
}

fn path_version(path: &str) -> Option<String> {
    path.split('/').find_map(|segment| {
        let digits = segment.strip_prefix('v')?;
        (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .then(|| digits.to_string())
    })
}
