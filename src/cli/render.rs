//! Human-readable rendering of task results, verdicts and policies.

use crate::core::{Decision, Policy, Verdict};
use crate::domain::{FormattedOutput, Step, StepStatus, TaskResult};

/// Print a finished task to stdout
pub fn print_result(result: &TaskResult) {
    for step in &result.steps {
        print_step(step, result.steps.len());
    }
}

fn print_step(step: &Step, total: usize) {
    let marker = match step.status {
        StepStatus::Success => "✓",
        StepStatus::Failed => "✗",
        StepStatus::Pending => "·",
    };

    if total > 1 {
        println!("{} [{}/{}] {}", marker, step.index + 1, total, step.command);
    } else {
        println!("{} {}", marker, step.command);
    }
    if let Some(rationale) = &step.rationale {
        println!("  # {}", rationale);
    }
    if step.retry_count > 0 {
        println!("  (after {} correction(s))", step.retry_count);
    }

    match step.status {
        StepStatus::Pending => println!("  skipped"),
        StepStatus::Success => {
            if let Some(attempt) = step.last_attempt() {
                print_formatted(&attempt.formatted);
            }
        }
        StepStatus::Failed => {
            if let Some(failure) = &step.failure {
                match &failure.rule {
                    Some(rule) => println!("  {:?}: {} [{}]", failure.kind, failure.reason, rule),
                    None => println!("  {:?}: {}", failure.kind, failure.reason),
                }
            }
            if let Some(attempt) = step.last_attempt().filter(|a| a.is_interrupted()) {
                println!("  (interrupted after {} attempt(s))", attempt.number);
            }
        }
    }
    println!();
}

/// Print one formatted output block
pub fn print_formatted(output: &FormattedOutput) {
    match output {
        FormattedOutput::Table { headers, rows, .. } => print_table(headers, rows),
        FormattedOutput::Text { content, .. } => println!("{}", content),
        FormattedOutput::Describe { sections } => {
            for section in sections {
                println!("== {} ==", section.title);
                for line in &section.lines {
                    println!("{}", line);
                }
            }
        }
        FormattedOutput::Logs { lines } => {
            for line in lines {
                println!("{}", line);
            }
        }
        FormattedOutput::Error { message, return_code } => match return_code {
            Some(code) => println!("error (exit {}): {}", code, message),
            None => println!("error: {}", message),
        },
    }
}

fn print_table(headers: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("   ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers));
    for row in rows {
        println!("{}", line(row.as_slice()));
    }
}

pub fn print_verdict(verdict: &Verdict) {
    let label = match verdict.decision {
        Decision::Allowed => "ALLOWED",
        Decision::RequiresConfirmation => "REQUIRES CONFIRMATION",
        Decision::Blocked => "BLOCKED",
    };
    println!("{}: {}", label, verdict.reason);
    println!("  rule:    {}", verdict.rule);
    println!("  command: {}", verdict.command);
}

pub fn print_policy(policy: &Policy) {
    let list = |name: &str, items: &std::collections::BTreeSet<String>| {
        println!("{}:", name);
        println!("  {}", items.iter().cloned().collect::<Vec<_>>().join(", "));
    };

    println!("Super admin mode:       {}", policy.super_admin_mode);
    println!("Shell commands enabled: {}", policy.shell_commands_enabled);
    println!();
    list("Dangerous commands", &policy.dangerous_commands);
    list("Safe commands", &policy.safe_commands);
    list("Create resources", &policy.create_resources);
    list("Apply resources", &policy.apply_resources);
    list("Scale resources", &policy.scale_resources);
    list("Safe shell utilities", &policy.safe_shell_utilities);

    if !policy.custom.is_empty() {
        println!();
        println!("Custom additions:");
        match serde_yaml::to_string(&policy.custom) {
            Ok(yaml) => {
                for line in yaml.lines() {
                    println!("  {}", line);
                }
            }
            Err(e) => println!("  (unavailable: {})", e),
        }
    }
}
