//! Instance manifest served at the mount root.

use serde::Serialize;

use crate::config::BareConfig;

/// Manifest describing this instance to tunnel clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub versions: Vec<&'static str>,
    pub language: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<Maintainer>,
    pub project: Project,
}

#[derive(Debug, Serialize)]
pub struct Maintainer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Project {
    pub name: &'static str,
    pub description: &'static str,
    pub repository: &'static str,
    pub version: &'static str,
}

/// Build the manifest for the current process.
pub fn manifest(config: &BareConfig) -> Manifest {
    Manifest {
        versions: vec!["v1", "v2", "v3"],
        language: "Rust",
        memory_usage: memory_usage_mib(),
        maintainer: config.server.maintainer.as_ref().map(|m| Maintainer {
            email: m.email.clone(),
            website: m.website.clone(),
        }),
        project: Project {
            name: env!("CARGO_PKG_NAME"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            repository: env!("CARGO_PKG_REPOSITORY"),
            version: env!("CARGO_PKG_VERSION"),
        },
    }
}

/// Resident set size in MiB, when the platform exposes it.
#[cfg(target_os = "linux")]
fn memory_usage_mib() -> Option<f64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096.0;
    Some((resident_pages * page_size / (1024.0 * 1024.0) * 100.0).round() / 100.0)
}

#[cfg(not(target_os = "linux"))]
fn memory_usage_mib() -> Option<f64> {
    None
}
