use crate::cli::OutputFormat;
use crate::detectors::{Finding, Severity};
use crate::error::ScanError;
use crate::scanner::{FileReport, ScanReport};
use colored::*;
use serde::Serialize;
use std::path::Path;

pub const TOOL_NAME: &str = "reentrancy-scan";
const RULE_WIDTH: usize = 64;
const WRAP_WIDTH: usize = 60;

pub struct Reporter {
    output_format: OutputFormat,
    use_colors: bool,
    verbose: bool,
    quiet: bool,
}

#[derive(Serialize)]
struct JsonSummary {
    files_scanned: usize,
    contracts: usize,
    total: usize,
    critical: usize,
    high: usize,
    medium: usize,
    low: usize,
    info: usize,
    errors: usize,
    duration_ms: u128,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    tool: &'static str,
    version: &'static str,
    report_timestamp: String,
    summary: JsonSummary,
    files: &'a [FileReport],
}

impl Reporter {
    pub fn new(format: OutputFormat, use_colors: bool, verbose: bool) -> Self {
        Self {
            output_format: format,
            use_colors,
            verbose,
            quiet: false,
        }
    }

    /// Text output keeps only the findings, without header, file errors or summary.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn render(&self, report: &ScanReport) -> Result<String, ScanError> {
        match self.output_format {
            OutputFormat::Text => Ok(self.render_text(report)),
            OutputFormat::Json => self.render_json(report),
            OutputFormat::Markdown => Ok(self.render_markdown(report)),
        }
    }

    pub fn print(&self, report: &ScanReport) -> Result<(), ScanError> {
        println!("{}", self.render(report)?);
        Ok(())
    }

    /// Writes the report to `path`; text output is written without color codes.
    pub fn write_to_file(&self, report: &ScanReport, path: &Path) -> Result<(), ScanError> {
        let plain = Reporter::new(self.output_format, false, self.verbose).with_quiet(self.quiet);
        std::fs::write(path, plain.render(report)?)?;
        Ok(())
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> String {
        if self.use_colors {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn severity_badge(&self, severity: Severity) -> String {
        let label = format!("[{}]", severity.as_str().to_uppercase());
        self.paint(&label, |s| match severity {
            Severity::Critical => s.bright_red().bold(),
            Severity::High => s.red().bold(),
            Severity::Medium => s.yellow().bold(),
            Severity::Low => s.cyan().bold(),
            Severity::Info => s.white().bold(),
        })
    }

    fn render_text(&self, report: &ScanReport) -> String {
        let mut lines = Vec::new();
        let border = "═".repeat(RULE_WIDTH);

        if self.quiet {
            for finding in report.all_findings() {
                lines.push(self.format_finding(finding));
                lines.push(String::new());
            }
            return lines.join("\n").trim_end().to_string();
        }

        lines.push(self.paint(&format!("╔{}╗", border), |s| s.bold()));
        lines.push(self.paint(
            &format!("║{:^width$}║", "REENTRANCY VULNERABILITY REPORT", width = RULE_WIDTH),
            |s| s.bold(),
        ));
        lines.push(self.paint(&format!("╚{}╝", border), |s| s.bold()));
        lines.push(format!(
            "Files scanned: {} | Contracts found: {}",
            report.files.len(),
            contract_count(report)
        ));
        lines.push(String::new());

        for file in &report.files {
            if let Some(error) = &file.error {
                lines.push(self.paint(&format!("Error: {}", error), |s| s.red()));
                lines.push(String::new());
                continue;
            }
            if file.findings.is_empty() {
                continue;
            }
            lines.push(self.paint(&format!("File: {}", file.path), |s| s.blue()));
            lines.push("-".repeat(RULE_WIDTH));
            for finding in &file.findings {
                lines.push(self.format_finding(finding));
                lines.push(String::new());
            }
        }

        lines.push(border.clone());
        lines.push(format!("Summary: {}", self.summary_text(report)));
        lines.push(format!(
            "Total: {} finding(s) | Analysis time: {}ms",
            report.total_findings(),
            report.duration_ms
        ));
        lines.push(border);
        lines.join("\n")
    }

    fn format_finding(&self, finding: &Finding) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "{} {}",
            self.severity_badge(finding.severity),
            self.paint(&finding.title, |s| s.bold())
        ));
        lines.push(format!("├── Pattern: {}", finding.pattern));
        lines.push(format!("├── Contract: {}", finding.contract));
        lines.push(format!("├── Function: {}()", finding.function));
        if let Some(related) = &finding.related_function {
            lines.push(format!("├── Related function: {}()", related));
        }
        lines.push(format!("├── Location: {}:{}", finding.file_path, finding.line));
        if !finding.supporting_lines.is_empty() {
            let supporting: Vec<String> = finding.supporting_lines.iter().map(|l| l.to_string()).collect();
            lines.push(format!("├── Supporting lines: {}", supporting.join(", ")));
        }
        if let Some(variable) = &finding.variable {
            lines.push(format!("├── State variable: {}", variable));
        }

        let description = word_wrap(&finding.description, WRAP_WIDTH);
        lines.push(format!("├── Description: {}", description[0]));
        lines.extend(description[1..].iter().map(|l| format!("│   {}", l)));

        if self.verbose && !finding.code_snippet.is_empty() {
            lines.push("├── Code:".to_string());
            lines.extend(finding.code_snippet.lines().map(|l| format!("│   {}", l)));
        }

        let remediation = word_wrap(&finding.remediation, WRAP_WIDTH);
        lines.push(format!(
            "├── Remediation: {}",
            self.paint(&remediation[0], |s| s.green())
        ));
        lines.extend(
            remediation[1..]
                .iter()
                .map(|l| format!("│   {}", self.paint(l, |s| s.green()))),
        );
        lines.push(format!("└── Confidence: {}", finding.confidence));
        lines.join("\n")
    }

    fn summary_text(&self, report: &ScanReport) -> String {
        let mut parts = Vec::new();
        for severity in Severity::all() {
            let count = report.count_by_severity(severity);
            if count > 0 {
                let text = format!("{} {}", count, severity.as_str());
                parts.push(self.paint(&text, |s| match severity {
                    Severity::Critical => s.bright_red(),
                    Severity::High => s.red(),
                    Severity::Medium => s.yellow(),
                    Severity::Low => s.cyan(),
                    Severity::Info => s.white(),
                }));
            }
        }
        if parts.is_empty() {
            parts.push(self.paint("No vulnerabilities found!", |s| s.green()));
        }
        let errors = report.errors().len();
        if errors > 0 {
            parts.push(self.paint(&format!("{} file error(s)", errors), |s| s.red()));
        }
        parts.join(", ")
    }

    fn render_json(&self, report: &ScanReport) -> Result<String, ScanError> {
        let document = JsonReport {
            tool: TOOL_NAME,
            version: env!("CARGO_PKG_VERSION"),
            report_timestamp: chrono::Utc::now().to_rfc3339(),
            summary: JsonSummary {
                files_scanned: report.files.len(),
                contracts: contract_count(report),
                total: report.total_findings(),
                critical: report.count_by_severity(Severity::Critical),
                high: report.count_by_severity(Severity::High),
                medium: report.count_by_severity(Severity::Medium),
                low: report.count_by_severity(Severity::Low),
                info: report.count_by_severity(Severity::Info),
                errors: report.errors().len(),
                duration_ms: report.duration_ms,
            },
            files: &report.files,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    fn render_markdown(&self, report: &ScanReport) -> String {
        let mut lines = Vec::new();
        lines.push("# Reentrancy Vulnerability Report".to_string());
        lines.push(String::new());
        lines.push(format!(
            "**Generated:** {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.push(String::new());

        lines.push("## Summary".to_string());
        lines.push(String::new());
        lines.push("| Metric | Value |".to_string());
        lines.push("|--------|-------|".to_string());
        lines.push(format!("| Files Scanned | {} |", report.files.len()));
        lines.push(format!("| Contracts | {} |", contract_count(report)));
        for severity in Severity::all() {
            lines.push(format!("| {} | {} |", severity.as_str(), report.count_by_severity(severity)));
        }
        lines.push(format!("| File Errors | {} |", report.errors().len()));
        lines.push(String::new());

        let errors = report.errors();
        if !errors.is_empty() {
            lines.push("## File Errors".to_string());
            lines.push(String::new());
            for error in errors {
                lines.push(format!("- `{}`", error));
            }
            lines.push(String::new());
        }

        lines.push("## Findings".to_string());
        lines.push(String::new());
        let findings = report.all_findings();
        if findings.is_empty() {
            lines.push("No reentrancy vulnerabilities detected.".to_string());
            lines.push(String::new());
        }

        for (index, finding) in findings.iter().enumerate() {
            let marker = match finding.severity {
                Severity::Critical => "🔴",
                Severity::High => "🟠",
                Severity::Medium => "🟡",
                Severity::Low => "🔵",
                Severity::Info => "⚪",
            };
            lines.push(format!("### {}. {} {}", index + 1, marker, finding.title));
            lines.push(String::new());
            lines.push(format!("**Severity:** {}  ", finding.severity));
            lines.push(format!("**Confidence:** {}  ", finding.confidence));
            lines.push(format!("**Pattern:** `{}`  ", finding.pattern));
            lines.push(format!("**Contract:** `{}`  ", finding.contract));
            lines.push(format!("**Function:** `{}()`  ", finding.function));
            lines.push(format!("**Location:** `{}:{}`", finding.file_path, finding.line));
            lines.push(String::new());
            lines.push(format!("**Description:** {}", finding.description));
            lines.push(String::new());

            if self.verbose && !finding.code_snippet.is_empty() {
                lines.push("```solidity".to_string());
                lines.push(finding.code_snippet.clone());
                lines.push("```".to_string());
                lines.push(String::new());
            }

            lines.push(format!("**Remediation:** {}", finding.remediation));
            lines.push(String::new());

            if !finding.references.is_empty() {
                lines.push("**References:**".to_string());
                for reference in &finding.references {
                    lines.push(format!("- [{}]({})", reference.title, reference.url));
                }
                lines.push(String::new());
            }
            lines.push("---".to_string());
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

fn contract_count(report: &ScanReport) -> usize {
    report.files.iter().map(|f| f.contracts.len()).sum()
}

fn word_wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}
