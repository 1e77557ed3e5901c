//! Structured rendering of command output.

use crate::domain::{ContentKind, DescribeSection, FormattedOutput};

use super::safety::kubectl_verb;

/// Message used when a command succeeded without printing anything
pub const NO_OUTPUT_MESSAGE: &str = "command succeeded with no output";

/// Header words that mark kubectl columnar output
const TABLE_HEADERS: &[&str] = &["NAME", "READY", "STATUS", "AGE", "NAMESPACE"];

/// Turn raw command output into a [`FormattedOutput`].
///
/// The command text picks the shape for `logs` and `describe`; everything
/// else is auto-detected from the output itself.
pub fn format_output(
    command: &str,
    stdout: &str,
    stderr: &str,
    success: bool,
    return_code: Option<i32>,
) -> FormattedOutput {
    if !success {
        let message = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return FormattedOutput::error(message, return_code);
    }

    let output = stdout.trim_end();
    if output.trim().is_empty() {
        return FormattedOutput::text(NO_OUTPUT_MESSAGE);
    }

    match kubectl_verb(command).as_deref() {
        Some("logs") => FormattedOutput::Logs {
            lines: output.lines().map(|l| l.to_string()).collect(),
        },
        Some("describe") => FormattedOutput::Describe {
            sections: describe_sections(output),
        },
        _ => {
            if looks_like_table(output) {
                table(output)
            } else {
                text(output)
            }
        }
    }
}

fn looks_like_table(output: &str) -> bool {
    let mut lines = output.trim().lines();
    let Some(header) = lines.next() else {
        return false;
    };
    if lines.next().is_none() {
        return false;
    }
    let header = header.to_uppercase();
    TABLE_HEADERS.iter().any(|h| header.contains(h))
}

/// Split on runs of two or more spaces
fn split_columns(line: &str) -> Vec<String> {
    let mut columns = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;

    for ch in line.trim().chars() {
        if ch == ' ' {
            spaces += 1;
            continue;
        }
        if spaces >= 2 {
            columns.push(std::mem::take(&mut current));
        } else if spaces == 1 {
            current.push(' ');
        }
        spaces = 0;
        current.push(ch);
    }
    if !current.is_empty() {
        columns.push(current);
    }
    columns
}

fn table(output: &str) -> FormattedOutput {
    let mut lines = output.trim().lines();
    let headers = lines.next().map(split_columns).unwrap_or_default();

    let rows: Vec<Vec<String>> = lines
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut row = split_columns(line);
            row.resize(headers.len(), String::new());
            row
        })
        .collect();

    FormattedOutput::Table {
        total_rows: rows.len(),
        headers,
        rows,
    }
}

fn text(output: &str) -> FormattedOutput {
    let trimmed = output.trim_start();
    let content_kind = if serde_json::from_str::<serde_json::Value>(output).is_ok() {
        ContentKind::Json
    } else if ["apiVersion:", "kind:", "metadata:"]
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
        && serde_yaml::from_str::<serde_yaml::Value>(output).is_ok()
    {
        ContentKind::Yaml
    } else {
        ContentKind::Text
    };

    FormattedOutput::Text {
        content_kind,
        line_count: output.lines().count(),
        content: output.to_string(),
    }
}

fn describe_sections(output: &str) -> Vec<DescribeSection> {
    let mut sections = vec![DescribeSection {
        title: "Overview".to_string(),
        lines: Vec::new(),
    }];

    for line in output.lines().map(str::trim_end) {
        if line.is_empty() {
            continue;
        }

        let unindented = !line.starts_with(' ') && !line.starts_with('\t');
        let header = if !unindented {
            None
        } else if !line.contains(':') {
            Some(line)
        } else {
            line.strip_suffix(':').filter(|title| !title.contains(':'))
        };

        match header {
            Some(title) => sections.push(DescribeSection {
                title: title.to_string(),
                lines: Vec::new(),
            }),
            None => {
                if let Some(section) = sections.last_mut() {
                    section.lines.push(line.to_string());
                }
            }
        }
    }

    if sections.len() > 1 && sections[0].lines.is_empty() {
        sections.remove(0);
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_uses_stderr() {
        let out = format_output("kubectl get pods", "", "forbidden\n", false, Some(1));
        assert_eq!(out, FormattedOutput::error("forbidden", Some(1)));
    }

    #[test]
    fn test_empty_success() {
        let out = format_output("kubectl apply -f app.yaml", "  \n", "", true, Some(0));
        match out {
            FormattedOutput::Text { content, .. } => assert_eq!(content, NO_OUTPUT_MESSAGE),
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_table_detection() {
        let stdout = "NAME    READY   STATUS    RESTARTS   AGE\n\
                      web-1   1/1     Running   0          5m\n\
                      web-2   0/1     Pending   0          1m\n";
        match format_output("kubectl get pods", stdout, "", true, Some(0)) {
            FormattedOutput::Table { headers, rows, total_rows } => {
                assert_eq!(headers, vec!["NAME", "READY", "STATUS", "RESTARTS", "AGE"]);
                assert_eq!(total_rows, 2);
                assert_eq!(rows[1][2], "Pending");
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_short_rows_are_padded() {
        let stdout = "NAME   STATUS   AGE\nweb    Running\n";
        match format_output("kubectl get pods", stdout, "", true, Some(0)) {
            FormattedOutput::Table { rows, .. } => assert_eq!(rows[0], vec!["web", "Running", ""]),
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_split_columns_keeps_single_spaces() {
        assert_eq!(
            split_columns("LAST SEEN   TYPE     REASON"),
            vec!["LAST SEEN", "TYPE", "REASON"]
        );
    }

    #[test]
    fn test_content_kinds() {
        let json = format_output("kubectl get pod web -o json", "{\"kind\": \"Pod\"}", "", true, Some(0));
        assert!(matches!(json, FormattedOutput::Text { content_kind: ContentKind::Json, .. }));

        let yaml = format_output(
            "kubectl get pod web -o yaml",
            "apiVersion: v1\nkind: Pod\n",
            "",
            true,
            Some(0),
        );
        assert!(matches!(yaml, FormattedOutput::Text { content_kind: ContentKind::Yaml, .. }));

        let plain = format_output("kubectl version --client", "Client Version: v1.29.0", "", true, Some(0));
        assert!(matches!(plain, FormattedOutput::Text { content_kind: ContentKind::Text, .. }));
    }

    #[test]
    fn test_logs_shape() {
        let out = format_output("kubectl logs web -n prod", "line one\nline two\n", "", true, Some(0));
        assert_eq!(
            out,
            FormattedOutput::Logs {
                lines: vec!["line one".to_string(), "line two".to_string()]
            }
        );
    }

    #[test]
    fn test_describe_sections() {
        let stdout = "Name:         web\n\
                      Namespace:    default\n\
                      Containers:\n  \
                        nginx:\n    \
                          Image:  nginx:1.25\n\
                      Events:\n  \
                        Normal  Pulled  10s  kubelet  pulled\n";
        match format_output("kubectl describe pod web", stdout, "", true, Some(0)) {
            FormattedOutput::Describe { sections } => {
                let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
                assert_eq!(titles, vec!["Overview", "Containers", "Events"]);
                assert_eq!(sections[0].lines.len(), 2);
                assert_eq!(sections[1].lines.len(), 2);
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }
}
