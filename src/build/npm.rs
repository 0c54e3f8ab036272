//! package.json and tsconfig manipulation shared by the static-site build
//! and the auto-repair rules.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Which section of package.json a dependency belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Runtime,
    Build,
}

impl DependencyKind {
    pub fn section(&self) -> &'static str {
        match self {
            DependencyKind::Runtime => "dependencies",
            DependencyKind::Build => "devDependencies",
        }
    }
}

const BUILD_TIME_PREFIXES: &[&str] = &[
    "@types/",
    "@vitejs/",
    "@babel/",
    "@typescript-eslint/",
    "@tailwindcss/",
    "eslint",
    "vite",
    "typescript",
    "tailwindcss",
    "postcss",
    "autoprefixer",
    "prettier",
    "sass",
    "less",
    "webpack",
    "rollup",
    "esbuild",
    "terser",
];

/// Name heuristic: toolchain packages go to devDependencies, everything the
/// bundle imports at runtime goes to dependencies.
pub fn classify(package: &str) -> DependencyKind {
    if BUILD_TIME_PREFIXES.iter().any(|p| package.starts_with(p)) {
        DependencyKind::Build
    } else {
        DependencyKind::Runtime
    }
}

const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "crypto", "events", "fs", "http", "https", "net", "os",
    "path", "process", "stream", "url", "util", "zlib",
];

/// Reduce an import specifier to the npm package that provides it:
/// `lodash/merge` -> `lodash`, `@scope/pkg/sub` -> `@scope/pkg`.
/// Relative imports, path aliases and node builtins yield `None`.
pub fn package_from_import(spec: &str) -> Option<String> {
    let spec = spec.trim();
    if spec.is_empty()
        || spec.starts_with('.')
        || spec.starts_with('/')
        || spec.starts_with("@/")
        || spec.starts_with("~/")
        || spec.starts_with("node:")
    {
        return None;
    }

    let mut parts = spec.split('/');
    let first = parts.next()?;
    let name = if first.starts_with('@') {
        let second = parts.next().filter(|s| !s.is_empty())?;
        format!("{}/{}", first, second)
    } else {
        first.to_string()
    };

    if NODE_BUILTINS.contains(&name.as_str()) {
        return None;
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '/' | '-' | '_' | '.'))
    {
        return None;
    }
    Some(name)
}

fn read_json(path: &Path) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cleaned = strip_jsonc(&content);
    serde_json::from_str(&cleaned).with_context(|| format!("parsing {}", path.display()))
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}

fn object_entry<'a>(root: &'a mut Value, key: &str) -> Result<&'a mut Map<String, Value>> {
    let obj = root
        .as_object_mut()
        .context("expected a JSON object at the top level")?;
    let entry = obj
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry
        .as_object_mut()
        .context("entry was just replaced with an object")
}

/// Add `package` to package.json. Returns `false` when it is already listed
/// in either dependency section, so a repeated failure is not "repaired" twice.
pub fn add_dependency(dir: &Path, package: &str, kind: DependencyKind) -> Result<bool> {
    let path = dir.join("package.json");
    let mut manifest = if path.exists() {
        read_json(&path)?
    } else {
        serde_json::json!({ "name": "app", "private": true })
    };

    if has_dependency(&manifest, package) {
        return Ok(false);
    }

    object_entry(&mut manifest, kind.section())?
        .insert(package.to_string(), Value::String("latest".to_string()));
    write_json(&path, &manifest)?;
    Ok(true)
}

/// Drop `--verbose` from the `build` script; several bundlers reject it.
pub fn strip_verbose_flag(dir: &Path) -> Result<bool> {
    let path = dir.join("package.json");
    if !path.exists() {
        return Ok(false);
    }
    let mut manifest = read_json(&path)?;
    let Some(script) = manifest
        .pointer_mut("/scripts/build")
        .and_then(|v| v.as_str().map(str::to_string))
    else {
        return Ok(false);
    };

    if !script.split_whitespace().any(|tok| tok == "--verbose") {
        return Ok(false);
    }
    let cleaned = script
        .split_whitespace()
        .filter(|tok| *tok != "--verbose")
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(slot) = manifest.pointer_mut("/scripts/build") {
        *slot = Value::String(cleaned);
    }
    write_json(&path, &manifest)?;
    Ok(true)
}

pub fn read_manifest(dir: &Path) -> Option<Value> {
    let path = dir.join("package.json");
    path.exists().then(|| read_json(&path).ok()).flatten()
}

pub fn has_dependency(manifest: &Value, package: &str) -> bool {
    ["dependencies", "devDependencies"].iter().any(|section| {
        manifest
            .get(section)
            .and_then(Value::as_object)
            .is_some_and(|deps| deps.contains_key(package))
    })
}

pub fn script<'a>(manifest: &'a Value, name: &str) -> Option<&'a str> {
    manifest.get("scripts")?.get(name)?.as_str()
}

/// tsconfig files a project may carry; Vite templates split the app config out.
const TSCONFIG_FILES: &[&str] = &["tsconfig.json", "tsconfig.app.json"];

/// Set `compilerOptions.<key> = value` in every tsconfig present.
/// Returns `true` if any file changed.
pub fn patch_compiler_options(dir: &Path, options: &[(&str, Value)]) -> Result<bool> {
    let mut changed = false;
    for name in TSCONFIG_FILES {
        let path = dir.join(name);
        if !path.exists() {
            continue;
        }
        let mut config = read_json(&path)?;
        let compiler = object_entry(&mut config, "compilerOptions")?;
        let mut file_changed = false;
        for (key, value) in options {
            if compiler.get(*key) != Some(value) {
                compiler.insert(key.to_string(), value.clone());
                file_changed = true;
            }
        }
        if file_changed {
            write_json(&path, &config)?;
            changed = true;
        }
    }
    Ok(changed)
}

/// tsconfig is JSONC: strip comments and trailing commas before parsing.
pub fn strip_jsonc(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
            }
            (',', _) => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
