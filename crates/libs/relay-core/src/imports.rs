//! Import Extractor (C3) and Path Resolver (C4), spec.md §4.3–4.4.
//!
//! Both are pure functions with no I/O: the extractor turns source text into
//! raw module references; the resolver turns a reference plus the set of all
//! known repo paths into a concrete path, or `None` for external packages.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Coarse language family, dispatched purely from file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JsFamily,
    Python,
    Unknown,
}

pub fn detect_language(path: &str) -> Language {
    match path.rsplit('.').next().unwrap_or("") {
        "ts" | "tsx" | "js" | "jsx" => Language::JsFamily,
        "py" => Language::Python,
        _ => Language::Unknown,
    }
}

/// Extensions the graph builder will fetch blobs for at all; anything else is
/// skipped before C3 ever sees it (spec.md §4.7 step 2).
pub fn is_supported_extension(path: &str) -> bool {
    !matches!(detect_language(path), Language::Unknown)
}

static JS_IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:import|export)\s+(?:[^'"]*?\sfrom\s+)?['"]([^'"]+)['"]"#).unwrap()
});
static JS_DYNAMIC_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static JS_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static PY_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\s*import\s+([\w.]+)"#).unwrap());
static PY_FROM_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*from\s+([\w.]+)\s+import\b"#).unwrap());

/// A raw module reference exactly as written in source — relative
/// (`./foo`), package-relative-ish (`../bar`), or a bare specifier
/// (`react`, `os.path`). Resolution into a concrete path is C4's job.
pub type ModuleRef = String;

/// Extracts module references from `content`. Language is dispatched from
/// `path`'s extension; an unrecognized extension yields no references.
/// Deterministic: iterates the source top-to-bottom and preserves that order.
pub fn extract_imports(content: &str, path: &str) -> Vec<ModuleRef> {
    match detect_language(path) {
        Language::JsFamily => extract_js_family(content),
        Language::Python => extract_python(content),
        Language::Unknown => Vec::new(),
    }
}

fn extract_js_family(content: &str) -> Vec<ModuleRef> {
    let mut refs = Vec::new();
    for re in [&*JS_IMPORT_FROM, &*JS_DYNAMIC_IMPORT, &*JS_REQUIRE] {
        for cap in re.captures_iter(content) {
            if let Some(m) = cap.get(1) {
                refs.push(m.as_str().to_string());
            }
        }
    }
    refs
}

fn extract_python(content: &str) -> Vec<ModuleRef> {
    let mut refs = Vec::new();
    for line in content.lines() {
        if let Some(cap) = PY_FROM_IMPORT.captures(line) {
            refs.push(cap[1].to_string());
        } else if let Some(cap) = PY_IMPORT.captures(line) {
            refs.push(cap[1].to_string());
        }
    }
    refs
}

/// Candidate suffixes probed in order, per spec.md §4.4 step 2.
const CANDIDATE_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".py",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
    "/__init__.py",
];

/// Resolves `module_ref` written in source file `source_path` against
/// `known_paths`. Non-relative references (no leading `./` or `../`) are
/// treated as external packages and always resolve to `None`.
pub fn resolve_module_ref(module_ref: &str, source_path: &str, known_paths: &HashSet<String>) -> Option<String> {
    if !module_ref.starts_with("./") && !module_ref.starts_with("../") {
        return None;
    }

    let base_dir = dirname(source_path);
    let joined = join_and_normalize(&base_dir, module_ref);

    CANDIDATE_SUFFIXES
        .iter()
        .map(|suffix| format!("{joined}{suffix}"))
        .find(|candidate| known_paths.contains(candidate))
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Joins `base_dir` and a relative `reference`, resolving `.`/`..` segments
/// without touching the filesystem.
fn join_and_normalize(base_dir: &str, reference: &str) -> String {
    let mut segments: Vec<&str> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').collect()
    };

    for part in reference.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}
