//! Safety classification for planned commands.
//!
//! Every command is checked against an immutable [`Policy`] snapshot before
//! it may run:
//! - Read-only kubectl verbs are always allowed
//! - Destructive verbs are blocked unless super admin mode is on
//! - `create`/`apply`/`scale` are allowed only for allow-listed resources
//! - Anything unrecognized requires confirmation
//!
//! Compound shell lines (`|`, `&&`, `;`, `$()`, ...) are split into their
//! simple commands and the most restrictive verdict wins.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_DANGEROUS_COMMANDS: &[&str] = &[
    "delete", "drain", "cordon", "uncordon", "taint", "patch", "replace", "edit", "kill",
    "terminate", "rm",
];

const DEFAULT_SAFE_COMMANDS: &[&str] = &[
    "get",
    "describe",
    "logs",
    "top",
    "explain",
    "version",
    "cluster-info",
    "config",
    "auth",
    "api-resources",
    "api-versions",
];

const DEFAULT_CREATE_RESOURCES: &[&str] = &[
    "configmap",
    "secret",
    "namespace",
    "serviceaccount",
    "deployment",
    "service",
    "pod",
    "replicaset",
    "daemonset",
    "statefulset",
    "job",
    "cronjob",
];

const DEFAULT_APPLY_RESOURCES: &[&str] = &[
    "deployment",
    "service",
    "configmap",
    "secret",
    "ingress",
    "pod",
    "replicaset",
    "daemonset",
    "statefulset",
    "job",
    "cronjob",
    "namespace",
];

const DEFAULT_SCALE_RESOURCES: &[&str] = &["deployment", "replicaset", "statefulset"];

const DEFAULT_SHELL_UTILITIES: &[&str] = &[
    "grep", "egrep", "head", "tail", "wc", "sort", "uniq", "jq", "yq", "cut", "tr",
    "column", "echo",
];

/// kubectl short names, added alongside their full resource name
const SHORT_NAMES: &[(&str, &str)] = &[
    ("configmap", "cm"),
    ("namespace", "ns"),
    ("serviceaccount", "sa"),
    ("deployment", "deploy"),
    ("service", "svc"),
    ("pod", "po"),
    ("replicaset", "rs"),
    ("daemonset", "ds"),
    ("statefulset", "sts"),
    ("cronjob", "cj"),
    ("ingress", "ing"),
];

/// Subcommands that mark a bare line (`get pods`) as a kubectl invocation
const KUBECTL_SUBCOMMANDS: &[&str] = &[
    "get", "describe", "create", "delete", "apply", "patch", "replace", "logs", "exec",
    "port-forward", "proxy", "cp", "auth", "config", "cluster-info", "top", "cordon",
    "uncordon", "drain", "taint", "label", "annotate", "scale", "autoscale", "rollout", "set",
    "wait", "attach", "run", "expose", "edit", "explain", "api-resources", "api-versions",
    "version",
];

/// kubectl global flags that consume the following token as their value
const GLOBAL_FLAGS_WITH_VALUE: &[&str] = &[
    "-n",
    "--namespace",
    "--context",
    "--kubeconfig",
    "--cluster",
    "--user",
    "-s",
    "--server",
    "--token",
    "--as",
    "--as-group",
    "--as-uid",
    "--cache-dir",
    "--certificate-authority",
    "--client-certificate",
    "--client-key",
    "--tls-server-name",
    "--username",
    "--password",
    "--request-timeout",
    "--profile",
    "--profile-output",
    "-v",
    "--v",
    "--vmodule",
    "--log-dir",
    "--log-file",
    "--log-file-max-size",
    "--log-flush-frequency",
    "--stderrthreshold",
];

/// kubectl global flags that never take a separate value
const GLOBAL_BOOL_FLAGS: &[&str] = &[
    "--insecure-skip-tls-verify",
    "--match-server-version",
    "--warnings-as-errors",
    "--disable-compression",
    "--add-dir-header",
    "--alsologtostderr",
    "--logtostderr",
    "--one-output",
    "--skip-headers",
    "--skip-log-headers",
];

/// Subcommand flags that consume the following token as their value
const COMMAND_FLAGS_WITH_VALUE: &[&str] = &[
    "-f",
    "--filename",
    "-l",
    "--selector",
    "-o",
    "--output",
    "-c",
    "--container",
    "-k",
    "--kustomize",
    "--field-selector",
    "--replicas",
];

/// Subcommand flags that never take a separate value
const COMMAND_BOOL_FLAGS: &[&str] = &[
    "-A",
    "--all-namespaces",
    "--all",
    "-w",
    "--watch",
    "--show-labels",
    "--no-headers",
    "--save-config",
    "--dry-run",
    "--force",
    "--overwrite",
    "--record",
    "--edit",
    "--server-side",
    "--previous",
    "--timestamps",
];

/// Upper bound on alternative parses of ambiguous flags before the verb
const MAX_READINGS: usize = 32;

fn default_true() -> bool {
    true
}

/// Custom additions layered on top of the built-in policy.
///
/// Every field is optional so the same type serves as a partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dangerous_commands: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_commands: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_resources: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_resources: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resources: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_shell_utilities: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_admin_mode: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_commands_enabled: Option<bool>,
}

impl PolicyOverrides {
    /// Layer `update` on top of these overrides.
    ///
    /// Lists present in `update` replace the corresponding custom list;
    /// absent lists and flags keep their current value.
    pub fn merged_with(&self, update: &PolicyOverrides) -> PolicyOverrides {
        fn pick(current: &Option<Vec<String>>, update: &Option<Vec<String>>) -> Option<Vec<String>> {
            update
                .as_ref()
                .or(current.as_ref())
                .map(|list| normalize_list(list))
        }

        PolicyOverrides {
            dangerous_commands: pick(&self.dangerous_commands, &update.dangerous_commands),
            safe_commands: pick(&self.safe_commands, &update.safe_commands),
            create_resources: pick(&self.create_resources, &update.create_resources),
            apply_resources: pick(&self.apply_resources, &update.apply_resources),
            scale_resources: pick(&self.scale_resources, &update.scale_resources),
            safe_shell_utilities: pick(&self.safe_shell_utilities, &update.safe_shell_utilities),
            super_admin_mode: update.super_admin_mode.or(self.super_admin_mode),
            shell_commands_enabled: update.shell_commands_enabled.or(self.shell_commands_enabled),
        }
    }

    /// True when nothing is overridden
    pub fn is_empty(&self) -> bool {
        *self == PolicyOverrides::default()
    }
}

/// Immutable policy snapshot: built-in defaults plus custom additions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Verbs blocked unless super admin mode is on
    pub dangerous_commands: BTreeSet<String>,

    /// Read-only verbs that are always allowed
    pub safe_commands: BTreeSet<String>,

    /// Resources `create` may target
    pub create_resources: BTreeSet<String>,

    /// Resources `apply` may target
    pub apply_resources: BTreeSet<String>,

    /// Resources `scale` may target
    pub scale_resources: BTreeSet<String>,

    /// Non-kubectl programs allowed inside pipelines
    pub safe_shell_utilities: BTreeSet<String>,

    /// Allow every command
    pub super_admin_mode: bool,

    /// Allow compound shell lines (each part is still classified)
    #[serde(default = "default_true")]
    pub shell_commands_enabled: bool,

    /// The custom additions this snapshot was built from
    #[serde(default)]
    pub custom: PolicyOverrides,
}

impl Default for Policy {
    fn default() -> Self {
        Self::from_overrides(&PolicyOverrides::default())
    }
}

impl Policy {
    /// Build a snapshot from the defaults plus `overrides`
    pub fn from_overrides(overrides: &PolicyOverrides) -> Self {
        let custom = PolicyOverrides::default().merged_with(overrides);

        let words = |defaults: &[&str], extra: &Option<Vec<String>>| -> BTreeSet<String> {
            defaults
                .iter()
                .map(|s| s.to_string())
                .chain(extra.iter().flatten().cloned())
                .collect()
        };

        let resources = |defaults: &[&str], extra: &Option<Vec<String>>| -> BTreeSet<String> {
            let mut set = BTreeSet::new();
            for name in defaults.iter().map(|s| s.to_string()).chain(extra.iter().flatten().cloned()) {
                for form in resource_forms(&name) {
                    set.insert(form);
                }
                if let Some((_, short)) = SHORT_NAMES.iter().find(|(full, _)| *full == name) {
                    set.insert(short.to_string());
                }
            }
            set
        };

        Self {
            dangerous_commands: words(DEFAULT_DANGEROUS_COMMANDS, &custom.dangerous_commands),
            safe_commands: words(DEFAULT_SAFE_COMMANDS, &custom.safe_commands),
            create_resources: resources(DEFAULT_CREATE_RESOURCES, &custom.create_resources),
            apply_resources: resources(DEFAULT_APPLY_RESOURCES, &custom.apply_resources),
            scale_resources: resources(DEFAULT_SCALE_RESOURCES, &custom.scale_resources),
            safe_shell_utilities: words(DEFAULT_SHELL_UTILITIES, &custom.safe_shell_utilities),
            super_admin_mode: custom.super_admin_mode.unwrap_or(false),
            shell_commands_enabled: custom.shell_commands_enabled.unwrap_or(true),
            custom,
        }
    }

    /// New snapshot with `update` merged on top of this one's custom additions
    pub fn with_update(&self, update: &PolicyOverrides) -> Self {
        Self::from_overrides(&self.custom.merged_with(update))
    }

    /// Classify a command against this policy
    pub fn classify(&self, command: &str) -> Verdict {
        classify(command, self)
    }
}

/// Holder of the current policy snapshot.
///
/// Updates build a fresh [`Policy`] and swap the `Arc`; readers always see
/// one complete snapshot.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<Policy>>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

impl PolicyStore {
    pub fn new(policy: Policy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<Policy> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Merge `update` into the custom additions and swap in the result
    pub fn update(&self, update: &PolicyOverrides) -> Arc<Policy> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(guard.with_update(update));
        *guard = Arc::clone(&next);
        next
    }
}

/// Classifier decision, ordered from least to most restrictive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    RequiresConfirmation,
    Blocked,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allowed => "allowed",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Output of the safety classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,

    /// Human-readable explanation
    pub reason: String,

    /// Policy rule that decided the verdict (e.g. `dangerous_commands:delete`)
    pub rule: String,

    /// The simple command the verdict was derived from
    pub command: String,
}

impl Verdict {
    fn new(decision: Decision, reason: impl Into<String>, rule: impl Into<String>, command: &str) -> Self {
        Self {
            decision,
            reason: reason.into(),
            rule: rule.into(),
            command: command.trim().to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }
}

/// Classify `command` against `policy`. Pure: no I/O, no shared state.
pub fn classify(command: &str, policy: &Policy) -> Verdict {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Verdict::new(Decision::Blocked, "empty command", "parse", trimmed);
    }

    let (segments, compound) = match split_compound(trimmed) {
        Ok(parts) => parts,
        Err(e) => {
            return Verdict::new(
                Decision::Blocked,
                format!("unparseable command: {}", e),
                "parse",
                trimmed,
            )
        }
    };

    if segments.is_empty() {
        return Verdict::new(Decision::Blocked, "empty command", "parse", trimmed);
    }

    if policy.super_admin_mode {
        return Verdict::new(
            Decision::Allowed,
            "super admin mode allows all commands",
            "super_admin_mode",
            trimmed,
        );
    }

    if compound && !policy.shell_commands_enabled {
        return Verdict::new(
            Decision::Blocked,
            "compound shell commands are disabled by policy",
            "shell_commands_enabled",
            trimmed,
        );
    }

    let verdicts = segments.iter().map(|segment| {
        let verdict = classify_simple(segment, policy);
        debug!(
            segment = %segment,
            decision = %verdict.decision,
            rule = %verdict.rule,
            "Classified command segment"
        );
        verdict
    });

    most_restrictive(verdicts).unwrap_or_else(|| Verdict::new(Decision::Blocked, "empty command", "parse", trimmed))
}

/// Classify one simple command (no shell composition)
fn classify_simple(segment: &str, policy: &Policy) -> Verdict {
    let verdict = classify_program(segment, policy);
    if !verdict.is_allowed() {
        return verdict;
    }

    match redirection_target(segment) {
        Some(target) => Verdict::new(
            Decision::RequiresConfirmation,
            format!("output is redirected to '{}'", target),
            format!("output_redirection:{}", target),
            segment,
        ),
        None => verdict,
    }
}

fn classify_program(segment: &str, policy: &Policy) -> Verdict {
    let tokens = match split_words(segment) {
        Ok(tokens) => tokens,
        Err(e) => {
            return Verdict::new(
                Decision::Blocked,
                format!("unparseable command: {}", e),
                "parse",
                segment,
            )
        }
    };

    // Skip leading environment assignments (FOO=bar kubectl ...)
    let tokens: Vec<String> = tokens
        .into_iter()
        .skip_while(|t| is_env_assignment(t))
        .collect();

    let Some(first) = tokens.first() else {
        return Verdict::new(Decision::Blocked, "empty command", "parse", segment);
    };

    let program = first.rsplit('/').next().unwrap_or(first.as_str()).to_lowercase();

    if program == "kubectl" {
        return classify_kubectl(&tokens[1..], policy, segment);
    }
    if KUBECTL_SUBCOMMANDS.contains(&program.as_str()) {
        return classify_kubectl(&tokens, policy, segment);
    }

    if policy.dangerous_commands.contains(&program) {
        return Verdict::new(
            Decision::Blocked,
            format!("'{}' is a dangerous command", program),
            format!("dangerous_commands:{}", program),
            segment,
        );
    }
    if policy.safe_shell_utilities.contains(&program) {
        if let Some(effect) = utility_side_effect(&program, &tokens[1..]) {
            return Verdict::new(
                Decision::RequiresConfirmation,
                format!("'{}' {}", program, effect),
                format!("shell_side_effect:{}", program),
                segment,
            );
        }
        return Verdict::new(
            Decision::Allowed,
            format!("'{}' is a read-only shell utility", program),
            format!("safe_shell_utilities:{}", program),
            segment,
        );
    }

    Verdict::new(
        Decision::RequiresConfirmation,
        format!("'{}' is not a recognized command", program),
        format!("unrecognized_command:{}", program),
        segment,
    )
}

/// Side effect a text utility can have through its own arguments
fn utility_side_effect(program: &str, args: &[String]) -> Option<&'static str> {
    let short_cluster_has = |arg: &str, letter: char| {
        arg.starts_with('-') && !arg.starts_with("--") && arg[1..].contains(letter)
    };

    match program {
        "awk" | "gawk" | "mawk" | "nawk" => {
            let script = args.join(" ");
            let runs_or_writes = script.contains("system")
                || script.contains("getline")
                || script.contains('|')
                || script.contains('>');
            runs_or_writes.then_some("program can run commands or write files")
        }
        "sort" => args
            .iter()
            .any(|a| a.starts_with("--output") || short_cluster_has(a.as_str(), 'o'))
            .then_some("writes its output to a file"),
        "uniq" => (args.iter().filter(|a| !a.starts_with('-') || a.as_str() == "-").count() > 1)
            .then_some("writes its output to a file"),
        "yq" => args
            .iter()
            .any(|a| a.starts_with("--inplace") || short_cluster_has(a.as_str(), 'i'))
            .then_some("edits files in place"),
        _ => None,
    }
}

/// First file an output redirection writes to, other than `/dev/null`
fn redirection_target(segment: &str) -> Option<String> {
    let chars: Vec<char> = segment.chars().collect();
    let word_at = |start: usize| -> String {
        chars
            .get(start..)
            .unwrap_or(&[])
            .iter()
            .take_while(|c| !c.is_whitespace() && !matches!(c, '<' | '>'))
            .collect()
    };

    let mut quote = Quote::None;
    let mut i = 0;
    while let Some(&ch) = chars.get(i) {
        match (quote, ch) {
            (Quote::Single, '\'') | (Quote::Double, '"') => quote = Quote::None,
            (Quote::Double, '\\') | (Quote::None, '\\') => i += 1,
            (Quote::None, '\'') => quote = Quote::Single,
            (Quote::None, '"') => quote = Quote::Double,
            (Quote::None, '>') => {
                let mut j = i + 1;
                if matches!(chars.get(j), Some('>') | Some('|')) {
                    j += 1;
                }
                if chars.get(j) == Some(&'&') {
                    // fd duplication (2>&1, >&-)
                    let fd = word_at(j + 1);
                    if !fd.is_empty() && fd.chars().all(|c| c.is_ascii_digit() || c == '-') {
                        i = j + 1 + fd.chars().count();
                        continue;
                    }
                    j += 1;
                }
                while chars.get(j).map_or(false, |c| c.is_whitespace()) {
                    j += 1;
                }

                let target = word_at(j);
                if target.is_empty() {
                    return Some("(missing target)".to_string());
                }
                if target != "/dev/null" {
                    return Some(target);
                }
                i = j + target.chars().count();
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Classify kubectl arguments (everything after `kubectl`).
///
/// Flags this module does not know may or may not take the next token as
/// their value; every reading is classified and the most restrictive wins.
fn classify_kubectl(args: &[String], policy: &Policy, segment: &str) -> Verdict {
    let readings = kubectl_readings(args);
    let truncated = readings.len() > MAX_READINGS;

    let verdicts = readings
        .into_iter()
        .filter_map(|(verb, resource)| Some(classify_reading(&verb?, resource.as_deref(), policy, segment)));

    match most_restrictive(verdicts) {
        Some(verdict) if truncated && verdict.is_allowed() => Verdict::new(
            Decision::RequiresConfirmation,
            "too many unrecognized flags to read the command reliably",
            "ambiguous_flags",
            segment,
        ),
        Some(verdict) => verdict,
        None => Verdict::new(Decision::Blocked, "empty command", "parse", segment),
    }
}

fn classify_reading(verb: &str, resource: Option<&str>, policy: &Policy, segment: &str) -> Verdict {
    if policy.safe_commands.contains(verb) {
        return Verdict::new(
            Decision::Allowed,
            format!("'{}' is a read-only operation", verb),
            format!("safe_commands:{}", verb),
            segment,
        );
    }

    if policy.dangerous_commands.contains(verb) {
        return Verdict::new(
            Decision::Blocked,
            format!("'{}' is a dangerous operation", verb),
            format!("dangerous_commands:{}", verb),
            segment,
        );
    }

    let allow_list = match verb {
        "create" => Some(("create_resources", &policy.create_resources)),
        "apply" => Some(("apply_resources", &policy.apply_resources)),
        "scale" => Some(("scale_resources", &policy.scale_resources)),
        _ => None,
    };

    match allow_list {
        Some((list_name, allowed)) => match resource {
            Some(resource) if allowed.contains(resource) => Verdict::new(
                Decision::Allowed,
                format!("'{} {}' is allow-listed", verb, resource),
                format!("{}:{}", list_name, resource),
                segment,
            ),
            Some(resource) => Verdict::new(
                Decision::RequiresConfirmation,
                format!("'{}' is not in the {} allow-list", resource, verb),
                format!("{}:{}", list_name, resource),
                segment,
            ),
            None => Verdict::new(
                Decision::RequiresConfirmation,
                format!("'{}' without an explicit resource type", verb),
                list_name,
                segment,
            ),
        },
        None => Verdict::new(
            Decision::RequiresConfirmation,
            format!("'{}' is not a recognized operation", verb),
            format!("unrecognized_verb:{}", verb),
            segment,
        ),
    }
}

/// Most restrictive verdict; the earliest wins ties
fn most_restrictive(verdicts: impl IntoIterator<Item = Verdict>) -> Option<Verdict> {
    let mut worst: Option<Verdict> = None;
    for verdict in verdicts {
        if worst.as_ref().map_or(true, |w| verdict.decision > w.decision) {
            worst = Some(verdict);
        }
    }
    worst
}

/// Verb and resource noun under one reading of the flags
type Reading = (Option<String>, Option<String>);

#[derive(Clone, Copy, PartialEq, Eq)]
enum FlagArity {
    Positional,
    NoValue,
    Value,
    Unknown,
}

fn flag_arity(arg: &str) -> FlagArity {
    if !arg.starts_with('-') || arg == "-" {
        return FlagArity::Positional;
    }
    if arg == "--" || arg.contains('=') {
        return FlagArity::NoValue;
    }
    if GLOBAL_FLAGS_WITH_VALUE.contains(&arg) || COMMAND_FLAGS_WITH_VALUE.contains(&arg) {
        return FlagArity::Value;
    }
    if GLOBAL_BOOL_FLAGS.contains(&arg) || COMMAND_BOOL_FLAGS.contains(&arg) {
        return FlagArity::NoValue;
    }
    // Short flag with its value attached (-nprod, -v5)
    if !arg.starts_with("--") && arg.len() > 2 && arg.is_char_boundary(2) {
        let flag = &arg[..2];
        if GLOBAL_FLAGS_WITH_VALUE.contains(&flag) || COMMAND_FLAGS_WITH_VALUE.contains(&flag) {
            return FlagArity::NoValue;
        }
    }
    FlagArity::Unknown
}

/// Every plausible (verb, resource) reading of kubectl arguments.
///
/// The last reading treats unknown flags as taking no value.
fn kubectl_readings(args: &[String]) -> Vec<Reading> {
    let mut readings = Vec::new();
    collect_readings(args, Vec::new(), false, &mut readings);
    readings
}

fn collect_readings(args: &[String], mut positional: Vec<String>, branch: bool, out: &mut Vec<Reading>) {
    let mut i = 0;
    while positional.len() < 2 {
        let Some(arg) = args.get(i) else {
            break;
        };
        match flag_arity(arg) {
            FlagArity::Positional => {
                positional.push(arg.to_lowercase());
                i += 1;
            }
            FlagArity::NoValue => i += 1,
            FlagArity::Value => i += 2,
            FlagArity::Unknown => {
                if out.len() < MAX_READINGS {
                    collect_readings(args.get(i + 2..).unwrap_or(&[]), positional.clone(), true, out);
                }
                i += 1;
            }
        }
    }

    if branch && out.len() >= MAX_READINGS {
        return;
    }
    let mut positional = positional.into_iter();
    let verb = positional.next();
    let resource = positional.next().map(|noun| {
        let kind = noun.split('/').next().unwrap_or(&noun);
        kind.split('.').next().unwrap_or(kind).to_string()
    });
    out.push((verb, resource));
}

/// The kubectl verb of a command line, if it is a kubectl invocation
pub fn kubectl_verb(command: &str) -> Option<String> {
    let tokens = split_words(command).ok()?;
    let first = tokens.first()?;
    let program = first.rsplit('/').next().unwrap_or(first.as_str()).to_lowercase();

    let args = if program == "kubectl" {
        &tokens[1..]
    } else if KUBECTL_SUBCOMMANDS.contains(&program.as_str()) {
        &tokens[..]
    } else {
        return None;
    };
    kubectl_readings(args).pop()?.0
}

/// Whether a line starts with a bare kubectl subcommand (`get pods`)
pub fn is_bare_kubectl_subcommand(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map(|word| KUBECTL_SUBCOMMANDS.contains(&word))
        .unwrap_or(false)
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Singular/plural companions of a resource name
fn resource_forms(name: &str) -> Vec<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Vec::new();
    }

    let mut forms = vec![name.clone()];
    if let Some(stem) = name.strip_suffix("ies") {
        forms.push(format!("{}y", stem));
    } else if name.ends_with("ss") || name.ends_with('x') || name.ends_with("ch") || name.ends_with("sh") {
        forms.push(format!("{}es", name));
    } else if let Some(stem) = name.strip_suffix("sses") {
        forms.push(format!("{}ss", stem));
    } else if let Some(stem) = name.strip_suffix('s') {
        forms.push(stem.to_string());
    } else if let Some(stem) = name.strip_suffix('y') {
        forms.push(format!("{}ies", stem));
    } else {
        forms.push(format!("{}s", name));
    }
    forms
}

/// Lowercase, trim and deduplicate a list while keeping its order
fn normalize_list(list: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    list.iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split a command line into simple commands.
///
/// Returns the segments and whether any shell composition (`|`, `||`, `&&`,
/// `&`, `;`, newlines, subshells, `$()` or backticks) was present. The inner
/// text of command substitutions becomes its own segment.
fn split_compound(line: &str) -> Result<(Vec<String>, bool), String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut compound = false;
    let mut quote = Quote::None;
    let mut chars = line.chars().peekable();

    let flush = |current: &mut String, segments: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        current.clear();
    };

    while let Some(ch) = chars.next() {
        match quote {
            Quote::Single => {
                current.push(ch);
                if ch == '\'' {
                    quote = Quote::None;
                }
            }
            Quote::Double => match ch {
                '"' => {
                    current.push(ch);
                    quote = Quote::None;
                }
                '\\' => {
                    current.push(ch);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '$' if chars.peek() == Some(&'(') => {
                    chars.next();
                    compound = true;
                    let inner = take_until_close_paren(&mut chars)?;
                    segments.extend(split_compound(&inner)?.0);
                }
                '`' => {
                    compound = true;
                    let inner = take_until_backtick(&mut chars)?;
                    segments.extend(split_compound(&inner)?.0);
                }
                _ => current.push(ch),
            },
            Quote::None => match ch {
                '\'' => {
                    current.push(ch);
                    quote = Quote::Single;
                }
                '"' => {
                    current.push(ch);
                    quote = Quote::Double;
                }
                '\\' => {
                    current.push(ch);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '|' | ';' | '\n' | '(' | ')' => {
                    if ch == '|' && chars.peek() == Some(&'|') {
                        chars.next();
                    }
                    compound = true;
                    flush(&mut current, &mut segments);
                }
                '&' => {
                    // `2>&1` and `&>` are redirections, not list operators
                    if current.ends_with('>') || chars.peek() == Some(&'>') {
                        current.push(ch);
                        continue;
                    }
                    if chars.peek() == Some(&'&') {
                        chars.next();
                    }
                    compound = true;
                    flush(&mut current, &mut segments);
                }
                '$' if chars.peek() == Some(&'(') => {
                    chars.next();
                    compound = true;
                    let inner = take_until_close_paren(&mut chars)?;
                    segments.extend(split_compound(&inner)?.0);
                }
                '`' => {
                    compound = true;
                    let inner = take_until_backtick(&mut chars)?;
                    segments.extend(split_compound(&inner)?.0);
                }
                _ => current.push(ch),
            },
        }
    }

    if quote != Quote::None {
        return Err("unterminated quoted string".to_string());
    }
    flush(&mut current, &mut segments);

    Ok((segments, compound))
}

fn take_until_close_paren(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let mut inner = String::new();
    let mut depth = 1usize;
    let mut quote = Quote::None;

    for ch in chars.by_ref() {
        match quote {
            Quote::Single if ch == '\'' => quote = Quote::None,
            Quote::Double if ch == '"' => quote = Quote::None,
            Quote::None => match ch {
                '\'' => quote = Quote::Single,
                '"' => quote = Quote::Double,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(inner);
                    }
                }
                _ => {}
            },
            _ => {}
        }
        inner.push(ch);
    }

    Err("unterminated command substitution".to_string())
}

fn take_until_backtick(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let mut inner = String::new();
    for ch in chars.by_ref() {
        if ch == '`' {
            return Ok(inner);
        }
        inner.push(ch);
    }
    Err("unterminated backtick substitution".to_string())
}

/// Split a simple command into words, honouring quotes and escapes
fn split_words(segment: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote = Quote::None;
    let mut chars = segment.chars();

    while let Some(ch) = chars.next() {
        match quote {
            Quote::None => match ch {
                '\'' => quote = Quote::Single,
                '"' => quote = Quote::Double,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        out.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            },
            Quote::Single => {
                if ch == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(ch);
                }
            }
            Quote::Double => match ch {
                '"' => quote = Quote::None,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                _ => current.push(ch),
            },
        }
    }

    if quote != Quote::None {
        return Err("unterminated quoted string".to_string());
    }
    if !current.is_empty() {
        out.push(current);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = Policy::default();
        assert!(!policy.super_admin_mode);
        assert!(policy.shell_commands_enabled);
        assert!(policy.dangerous_commands.contains("delete"));
        assert!(policy.apply_resources.contains("namespaces"));
        assert!(policy.create_resources.contains("cm"));
        assert!(policy.custom.is_empty());
    }

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_readings_skip_known_flags() {
        let readings = kubectl_readings(&words("-n prod scale --replicas 3 deployment/web"));
        assert_eq!(readings, vec![(Some("scale".to_string()), Some("deployment".to_string()))]);

        let readings = kubectl_readings(&words("apply -f app.yaml"));
        assert_eq!(readings, vec![(Some("apply".to_string()), None)]);

        let readings = kubectl_readings(&words("-nprod --insecure-skip-tls-verify get pods"));
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn test_readings_branch_on_unknown_flag() {
        let readings = kubectl_readings(&words("--some-new-flag get delete pod"));
        assert_eq!(
            readings,
            vec![
                (Some("delete".to_string()), Some("pod".to_string())),
                (Some("get".to_string()), Some("delete".to_string())),
            ]
        );
    }

    #[test]
    fn test_readings_are_bounded() {
        let line = "--x a ".repeat(20) + "get pods";
        assert_eq!(kubectl_readings(&words(&line)).len(), MAX_READINGS + 1);
    }

    #[test]
    fn test_redirection_target() {
        assert_eq!(redirection_target("echo hi > out.txt").as_deref(), Some("out.txt"));
        assert_eq!(redirection_target("echo hi >>log").as_deref(), Some("log"));
        assert_eq!(redirection_target("kubectl get pods &>all.log").as_deref(), Some("all.log"));
        assert_eq!(redirection_target("kubectl get pods 2>/dev/null"), None);
        assert_eq!(redirection_target("kubectl logs web 2>&1"), None);
        assert_eq!(redirection_target("echo 'a > b'"), None);
    }

    #[test]
    fn test_kubectl_verb() {
        assert_eq!(kubectl_verb("kubectl -n prod logs web").as_deref(), Some("logs"));
        assert_eq!(kubectl_verb("/usr/local/bin/kubectl describe pod web").as_deref(), Some("describe"));
        assert_eq!(kubectl_verb("get pods").as_deref(), Some("get"));
        assert_eq!(kubectl_verb("echo hi"), None);
        assert!(is_bare_kubectl_subcommand("rollout status deploy/web"));
        assert!(!is_bare_kubectl_subcommand("kubectl get pods"));
    }

    #[test]
    fn test_resource_forms() {
        assert_eq!(resource_forms("Pod"), vec!["pod", "pods"]);
        assert_eq!(resource_forms("ingress"), vec!["ingress", "ingresses"]);
        assert_eq!(resource_forms("networkpolicy"), vec!["networkpolicy", "networkpolicies"]);
        assert_eq!(resource_forms("widgets"), vec!["widgets", "widget"]);
    }

    #[test]
    fn test_split_compound() {
        let (segments, compound) = split_compound("kubectl get pods | grep web && echo ok").unwrap();
        assert!(compound);
        assert_eq!(segments, vec!["kubectl get pods", "grep web", "echo ok"]);

        let (segments, compound) = split_compound("kubectl get pods -l 'a=b|c'").unwrap();
        assert!(!compound);
        assert_eq!(segments.len(), 1);

        let (segments, _) = split_compound("kubectl logs $(kubectl get pods -o name)").unwrap();
        assert!(segments.contains(&"kubectl get pods -o name".to_string()));
        assert!(segments.contains(&"kubectl logs".to_string()));

        let (segments, compound) = split_compound("kubectl logs web 2>&1").unwrap();
        assert!(!compound);
        assert_eq!(segments, vec!["kubectl logs web 2>&1"]);
    }

    #[test]
    fn test_split_words_quotes() {
        let words = split_words(r#"kubectl annotate pod web note="hello world" 'x y'"#).unwrap();
        assert_eq!(words[4], "note=hello world");
        assert_eq!(words[5], "x y");
        assert!(split_words("echo 'open").is_err());
    }

    #[test]
    fn test_merge_replaces_lists_present_in_update() {
        let base = PolicyOverrides {
            dangerous_commands: Some(vec!["scale".to_string()]),
            safe_commands: Some(vec!["wait".to_string()]),
            ..Default::default()
        };
        let update = PolicyOverrides {
            dangerous_commands: Some(vec!["Rollout".to_string(), "rollout".to_string()]),
            super_admin_mode: Some(true),
            ..Default::default()
        };

        let merged = base.merged_with(&update);
        assert_eq!(merged.dangerous_commands, Some(vec!["rollout".to_string()]));
        assert_eq!(merged.safe_commands, Some(vec!["wait".to_string()]));
        assert_eq!(merged.super_admin_mode, Some(true));
    }

    #[test]
    fn test_store_swaps_snapshots() {
        let store = PolicyStore::default();
        let before = store.snapshot();

        let after = store.update(&PolicyOverrides {
            dangerous_commands: Some(vec!["scale".to_string()]),
            ..Default::default()
        });

        assert!(!before.dangerous_commands.contains("scale"));
        assert!(after.dangerous_commands.contains("scale"));
        assert!(store.snapshot().dangerous_commands.contains("scale"));
    }

    #[test]
    fn test_decision_ordering() {
        assert!(Decision::Blocked > Decision::RequiresConfirmation);
        assert!(Decision::RequiresConfirmation > Decision::Allowed);
        assert_eq!(Decision::RequiresConfirmation.to_string(), "requires_confirmation");
    }
}
