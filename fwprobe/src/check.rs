use std::path::Path;

use serde::Serialize;

use crate::equipment::FirewallKind;
use crate::model::{load_model, LoadedModel, ModelLoadError};
use crate::usage::UsageKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CheckSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckIssue {
    pub severity: CheckSeverity,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub equipment: Option<String>,
    pub kind: Option<FirewallKind>,
    pub errors: usize,
    pub warnings: usize,
    pub issues: Vec<CheckIssue>,
}

/// Loads a model and reports configuration errors and usage warnings.
///
/// Unreadable or unparsable files are returned as errors; configuration
/// errors found while building the model become report issues.
pub fn build_check_report(path: &Path) -> Result<CheckReport, ModelLoadError> {
    match load_model(path) {
        Ok(model) => Ok(report_for_model(&model)),
        Err(ModelLoadError::Config { source, .. }) => Ok(finish(
            None,
            None,
            vec![CheckIssue {
                severity: CheckSeverity::Error,
                code: "config_error".to_string(),
                message: source.to_string(),
            }],
        )),
        Err(other) => Err(other),
    }
}

pub fn report_for_model(model: &LoadedModel) -> CheckReport {
    let mut issues: Vec<CheckIssue> = model
        .notes
        .iter()
        .map(|note| CheckIssue {
            severity: CheckSeverity::Warning,
            code: note.code.to_string(),
            message: note.message.clone(),
        })
        .collect();

    for (kind, name) in model.usage.unused() {
        let (code, message) = match kind {
            UsageKind::ObjectGroup => ("unused_object_group", format!("object-group {name} is never referenced")),
            UsageKind::AccessList => ("unbound_access_list", format!("access-list {name} is not bound to any interface")),
            UsageKind::Table => ("unused_table", format!("table <{name}> is never referenced")),
        };
        issues.push(CheckIssue {
            severity: CheckSeverity::Warning,
            code: code.to_string(),
            message,
        });
    }

    finish(
        Some(model.equipment.name.clone()),
        Some(model.equipment.firewall.kind()),
        issues,
    )
}

fn finish(equipment: Option<String>, kind: Option<FirewallKind>, issues: Vec<CheckIssue>) -> CheckReport {
    let errors = issues
        .iter()
        .filter(|issue| issue.severity == CheckSeverity::Error)
        .count();
    CheckReport {
        equipment,
        kind,
        errors,
        warnings: issues.len() - errors,
        issues,
    }
}

pub fn render_check_text(report: &CheckReport) -> String {
    let mut out = Vec::new();
    let kind = match report.kind {
        Some(FirewallKind::AccessList) => "access-list",
        Some(FirewallKind::PacketFilter) => "packet-filter",
        None => "unknown",
    };
    out.push(format!(
        "check equipment={} kind={kind}",
        report.equipment.as_deref().unwrap_or("unknown")
    ));
    out.push(format!(
        "result errors={} warnings={}",
        report.errors, report.warnings
    ));
    out.push("issues".to_string());
    if report.issues.is_empty() {
        out.push("- none".to_string());
        return out.join("\n");
    }
    for issue in &report.issues {
        let sev = match issue.severity {
            CheckSeverity::Error => "error",
            CheckSeverity::Warning => "warning",
        };
        out.push(format!("- [{sev}] {}: {}", issue.code, issue.message));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{build_check_report, render_check_text, CheckSeverity};
    use crate::model::ModelLoadError;
    use std::fs;

    #[test]
    fn config_errors_become_issues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.toml");
        fs::write(
            &path,
            r#"
[equipment]
name = "edge"
kind = "access-list"

[[access_groups]]
list = "MISSING"
iface = "outside"
direction = "in"
"#,
        )
        .expect("write model");

        let report = build_check_report(&path).expect("report");
        assert_eq!(report.errors, 1);
        assert_eq!(report.issues[0].severity, CheckSeverity::Error);
        assert_eq!(report.issues[0].code, "config_error");
        let text = render_check_text(&report);
        assert!(text.contains("result errors=1 warnings=0"));
        assert!(text.contains("- [error] config_error: unknown access-list 'MISSING'"));
    }

    #[test]
    fn unused_objects_are_warnings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.toml");
        fs::write(
            &path,
            r#"
[equipment]
name = "edge"
kind = "access-list"

[[object_groups]]
name = "DNS"
kind = "network"
items = [{ net = "192.0.2.53" }]

[[access_lists]]
name = "IDLE"
entries = [{ action = "permit" }]
"#,
        )
        .expect("write model");

        let report = build_check_report(&path).expect("report");
        assert_eq!(report.errors, 0);
        let codes: Vec<&str> = report.issues.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["unused_object_group", "unbound_access_list"]);
        assert!(render_check_text(&report).starts_with("check equipment=edge kind=access-list"));
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = build_check_report(&dir.path().join("none.toml")).expect_err("missing");
        assert!(matches!(err, ModelLoadError::Io { .. }));
    }
}
