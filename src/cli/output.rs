//! Output formatting for the `probe` command
//!
//! Renders the capability report, the detected hints and the effective
//! configuration either as JSON or as human-readable text.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::capability::{CapabilityReport, DeviceHints, RequirementFailure};
use crate::config::OrchestratorConfig;

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
}

impl From<super::commands::OutputFormatArg> for OutputFormat {
    fn from(arg: super::commands::OutputFormatArg) -> Self {
        match arg {
            super::commands::OutputFormatArg::Json => OutputFormat::Json,
            super::commands::OutputFormatArg::Human => OutputFormat::Human,
        }
    }
}

/// Output formatter for probe results
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the capability verdict together with the hints it was based on
    pub fn format_probe(&self, report: &CapabilityReport, hints: &DeviceHints) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "report": report,
                    "hints": hints,
                });
                serde_json::to_string_pretty(&output)
                    .context("Failed to serialize capability report to JSON")
            }
            OutputFormat::Human => Ok(self.format_probe_human(report, hints)),
        }
    }

    /// Formats the effective configuration
    pub fn format_config(&self, config: &OrchestratorConfig) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&config_map(config))
                .context("Failed to serialize config to JSON"),
            OutputFormat::Human => Ok(config.to_string()),
        }
    }

    fn format_probe_human(&self, report: &CapabilityReport, hints: &DeviceHints) -> String {
        let mut output = String::new();

        if report.supported {
            output.push_str("\u{2713} Local inference supported\n");
        } else {
            output.push_str("\u{2717} Local inference not supported\n");
        }
        output.push_str(&"\u{2501}".repeat(40));
        output.push_str("\n\n");

        output.push_str("Device:\n");
        output.push_str(&format!(
            "\u{251C}\u{2500} Memory:       {}\n",
            hints
                .memory_gb()
                .map(|gb| format!("{:.1} GiB", gb))
                .unwrap_or_else(|| "unknown".to_string())
        ));
        output.push_str(&format!(
            "\u{251C}\u{2500} CPU cores:    {}\n",
            hints
                .logical_cores
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
        let accelerator = match hints.accelerator {
            Some(true) => "present",
            Some(false) => "absent",
            None => "unknown",
        };
        output.push_str(&format!("\u{2514}\u{2500} Accelerator:  {}\n", accelerator));

        if !report.reasons.is_empty() {
            output.push_str("\nUnmet requirements:\n");
            for (i, reason) in report.reasons.iter().enumerate() {
                let connector = if i == report.reasons.len() - 1 {
                    "\u{2514}"
                } else {
                    "\u{251C}"
                };
                let severity = if reason.is_blocking() {
                    "blocking"
                } else {
                    "warning"
                };
                output.push_str(&format!(
                    "{}\u{2500} {} ({}): {}\n",
                    connector,
                    reason,
                    severity,
                    describe(reason)
                ));
            }
        }

        output
    }
}

fn describe(reason: &RequirementFailure) -> String {
    match reason {
        RequirementFailure::NoAccelerator => "no accelerated compute API found".to_string(),
        RequirementFailure::LowMemory { gib } => {
            format!("{:.1} GiB memory, at least 4 GiB required", gib)
        }
        RequirementFailure::LowCpuCores { cores } => {
            format!("{} logical cores, at least 4 required", cores)
        }
    }
}

fn config_map(config: &OrchestratorConfig) -> BTreeMap<&'static str, String> {
    let mut map = BTreeMap::new();
    map.insert("provider", config.provider.as_str().to_string());
    map.insert("model", config.model.clone());
    map.insert(
        "fallback_model",
        config.effective_fallback().unwrap_or("none").to_string(),
    );
    map.insert("use_worker", config.use_worker.to_string());
    map.insert(
        "request_timeout_secs",
        config.request_timeout_secs.to_string(),
    );
    if let Some(ref url) = config.api_base_url {
        map.insert("api_base_url", url.clone());
    }
    map.insert("log_level", config.log_level.clone());
    map
}
