use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use super::npm;

/// Repair-and-retry cycles allowed per build.
pub const MAX_REPAIR_ATTEMPTS: u32 = 2;

static MISSING_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:Cannot find module|Cannot find package|Can't resolve|Could not resolve|[Ff]ailed to resolve import) ['"]([^'"\s]+)['"]"#,
    )
    .expect("missing-module regex must compile")
});

static MODULE_RESOLUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"TS5095|TS5110|TS5109|Option 'bundler' can only be used when 'module' is set to|must be set to '(?:NodeNext|Node16)' when option 'moduleResolution'",
    )
    .expect("module-resolution regex must compile")
});

static IMPLICIT_ANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"TS7005|TS7006|TS7031|TS7034|TS7053|implicitly has an? '?any'? type")
        .expect("implicit-any regex must compile")
});

/// A patch that was written to disk before the retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub rule: &'static str,
    pub description: String,
    /// Dependencies changed, so the install step must run again.
    pub reinstall: bool,
}

type Matcher = fn(&str) -> Vec<String>;
type Patch = fn(&Path, &[String]) -> Result<Option<Repair>>;

/// One (error signature -> source tree patch) pair.
pub struct RepairRule {
    pub name: &'static str,
    matcher: Matcher,
    patch: Patch,
    /// Fire at most once per build.
    once: bool,
}

impl RepairRule {
    pub fn matches(&self, output: &str) -> Vec<String> {
        (self.matcher)(output)
    }

    /// Apply the patch. `Ok(None)` means the signature matched but there was
    /// nothing left to change, e.g. the package is already in the manifest.
    pub fn apply(&self, dir: &Path, details: &[String]) -> Result<Option<Repair>> {
        (self.patch)(dir, details)
    }
}

fn match_missing_modules(output: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in MISSING_MODULE_RE.captures_iter(output) {
        if let Some(pkg) = npm::package_from_import(&cap[1]) {
            if !seen.contains(&pkg) {
                seen.push(pkg);
            }
        }
    }
    seen
}

fn patch_missing_modules(dir: &Path, packages: &[String]) -> Result<Option<Repair>> {
    let mut added = Vec::new();
    for pkg in packages {
        let kind = npm::classify(pkg);
        if npm::add_dependency(dir, pkg, kind)? {
            added.push(format!("{} ({})", pkg, kind.section()));
        }
    }
    if added.is_empty() {
        return Ok(None);
    }
    Ok(Some(Repair {
        rule: "missing-module",
        description: format!("added {}", added.join(", ")),
        reinstall: true,
    }))
}

fn match_signature(re: &Regex, output: &str) -> Vec<String> {
    re.find(output)
        .map(|m| vec![m.as_str().to_string()])
        .unwrap_or_default()
}

fn match_module_resolution(output: &str) -> Vec<String> {
    match_signature(&MODULE_RESOLUTION_RE, output)
}

fn patch_module_resolution(dir: &Path, _details: &[String]) -> Result<Option<Repair>> {
    let changed = npm::patch_compiler_options(
        dir,
        &[
            ("module", json!("ESNext")),
            ("moduleResolution", json!("bundler")),
        ],
    )?;
    Ok(changed.then(|| Repair {
        rule: "module-resolution",
        description: "set compilerOptions.module=ESNext, moduleResolution=bundler".to_string(),
        reinstall: false,
    }))
}

fn match_implicit_any(output: &str) -> Vec<String> {
    match_signature(&IMPLICIT_ANY_RE, output)
}

fn patch_implicit_any(dir: &Path, _details: &[String]) -> Result<Option<Repair>> {
    let changed = npm::patch_compiler_options(dir, &[("noImplicitAny", json!(false))])?;
    Ok(changed.then(|| Repair {
        rule: "implicit-any",
        description: "set compilerOptions.noImplicitAny=false".to_string(),
        reinstall: false,
    }))
}

/// The closed rule set, evaluated in order.
pub fn default_rules() -> Vec<RepairRule> {
    vec![
        RepairRule {
            name: "missing-module",
            matcher: match_missing_modules,
            patch: patch_missing_modules,
            once: false,
        },
        RepairRule {
            name: "module-resolution",
            matcher: match_module_resolution,
            patch: patch_module_resolution,
            once: true,
        },
        RepairRule {
            name: "implicit-any",
            matcher: match_implicit_any,
            patch: patch_implicit_any,
            once: true,
        },
    ]
}

/// Per-build repair state: which rules fired and how many cycles were spent.
pub struct AutoRepair {
    rules: Vec<RepairRule>,
    max_attempts: u32,
    attempts: u32,
    fired: HashSet<&'static str>,
    applied: Vec<Repair>,
}

impl Default for AutoRepair {
    fn default() -> Self {
        Self::new(default_rules(), MAX_REPAIR_ATTEMPTS)
    }
}

impl AutoRepair {
    pub fn new(rules: Vec<RepairRule>, max_attempts: u32) -> Self {
        Self {
            rules,
            max_attempts,
            attempts: 0,
            fired: HashSet::new(),
            applied: Vec::new(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn applied(&self) -> &[Repair] {
        &self.applied
    }

    /// Patch `dir` according to the first rule that recognises `output`.
    /// Returns `None` when no rule applies or the attempt budget is spent.
    pub fn try_repair(&mut self, dir: &Path, output: &str) -> Option<Repair> {
        if self.attempts >= self.max_attempts {
            info!(attempts = self.attempts, "auto-repair budget exhausted");
            return None;
        }

        for rule in &self.rules {
            if rule.once && self.fired.contains(rule.name) {
                continue;
            }
            let details = rule.matches(output);
            if details.is_empty() {
                continue;
            }
            match rule.apply(dir, &details) {
                Ok(Some(repair)) => {
                    self.attempts += 1;
                    self.fired.insert(rule.name);
                    info!(
                        rule = rule.name,
                        attempt = self.attempts,
                        "auto-repair: {}",
                        repair.description
                    );
                    self.applied.push(repair.clone());
                    return Some(repair);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(rule = rule.name, error = %e, "auto-repair patch failed");
                }
            }
        }
        None
    }
}
