//! Embeds the git revision for `--version` and enforces the source rules the
//! agent is held to. A rule violation fails the build with a report.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Non-empty lines allowed in one source or document file.
const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs", "md", "toml"];

const SKIPPED_DIRS: &[&str] = &["target", ".git", "examples"];

struct SourceFile {
    path: PathBuf,
    rel: PathBuf,
    text: String,
}

impl SourceFile {
    fn is_rust(&self) -> bool {
        self.rel.extension().is_some_and(|ext| ext == "rs")
    }

    fn lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.text.lines().enumerate().map(|(i, l)| (i + 1, l))
    }
}

struct Violation {
    at: String,
    detail: String,
}

impl Violation {
    fn new(file: &SourceFile, line: usize, detail: impl Into<String>) -> Self {
        Self {
            at: format!("{}:{}", file.rel.display(), line),
            detail: detail.into(),
        }
    }
}

fn main() {
    embed_git_sha();

    let root = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-changed=build.rs");

    let mut files = Vec::new();
    collect(&root, &root, &mut files);
    let agent_sources: Vec<&SourceFile> = files
        .iter()
        .filter(|f| f.is_rust() && f.rel != Path::new("build.rs"))
        .collect();

    report(
        "FILE TOO LONG",
        "Split the module. Tests belong in the sibling tests/ directory.",
        line_limit(&files),
    );
    report(
        "DEAD CODE ALLOWED",
        "Delete unused items, or gate test helpers with #[cfg(test)].",
        dead_code_allows(&agent_sources),
    );
    report(
        "RUNTIME INSIDE A THREAD",
        "The backend client lives on the main runtime. Spawn tasks, not runtimes.",
        nested_runtimes(&agent_sources),
    );
    report(
        "ENV MUTATION WITHOUT #[serial]",
        "HOME, USER and the agent's own variables are process-global. Mark the test #[serial].",
        unserialized_env_tests(&agent_sources),
    );
    check_formatting(&root, &files);
}

fn embed_git_sha() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let sha = Command::new("git")
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=NETCONF_AGENT_GIT_SHA={}", sha);
}

fn collect(dir: &Path, root: &Path, files: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if path.is_dir() {
            if !SKIPPED_DIRS.contains(&name) {
                collect(&path, root, files);
            }
            continue;
        }
        let checked = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| CHECKED_EXTENSIONS.contains(&ext));
        if !checked {
            continue;
        }
        if let Ok(text) = fs::read_to_string(&path) {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            files.push(SourceFile { path, rel, text });
        }
    }
}

fn line_limit(files: &[SourceFile]) -> Vec<Violation> {
    files
        .iter()
        .filter_map(|file| {
            let count = file.text.lines().filter(|l| !l.trim().is_empty()).count();
            let detail = format!("{} non-empty lines (max {})", count, MAX_LINES);
            (count > MAX_LINES).then(|| Violation::new(file, 1, detail))
        })
        .collect()
}

fn dead_code_allows(files: &[&SourceFile]) -> Vec<Violation> {
    let mut found = Vec::new();
    for file in files {
        for (line_no, line) in file.lines() {
            let attr = line.trim();
            let is_lint_attr = ["#[allow(", "#![allow(", "#[expect(", "#![expect("]
                .iter()
                .any(|prefix| attr.starts_with(prefix));
            if is_lint_attr && attr.contains("dead_code") {
                found.push(Violation::new(file, line_no, attr));
            }
        }
    }
    found
}

/// Flags `thread::spawn` calls that build a tokio runtime within the next
/// few lines.
fn nested_runtimes(files: &[&SourceFile]) -> Vec<Violation> {
    const WINDOW: usize = 20;

    let mut found = Vec::new();
    for file in files {
        let lines: Vec<&str> = file.text.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            let code = line.trim();
            if code.starts_with("//") || !code.contains("thread::spawn(") {
                continue;
            }
            let builds_runtime = lines
                .iter()
                .skip(i)
                .take(WINDOW)
                .any(|l| l.contains("Runtime::new()") || l.contains("runtime::Builder"));
            if builds_runtime {
                found.push(Violation::new(file, i + 1, code));
            }
        }
    }
    found
}

/// Flags test functions that call `set_var`/`remove_var` without a
/// `#[serial]` attribute.
fn unserialized_env_tests(files: &[&SourceFile]) -> Vec<Violation> {
    let mut found = Vec::new();
    for file in files {
        let mut attrs: Vec<&str> = Vec::new();
        let mut current: Option<(usize, String, bool)> = None;
        let mut depth: i32 = 0;

        for (line_no, line) in file.lines() {
            let code = line.trim();

            if let Some((start, name, serial)) = &current {
                if !serial && !code.starts_with("//") && mutates_env(code) {
                    let detail = format!("test `{}` mutates the environment", name);
                    found.push(Violation::new(file, *start, detail));
                    current = None;
                }
            } else if code.starts_with("#[") {
                attrs.push(code);
                continue;
            } else if let Some(name) = test_fn_name(code, &attrs) {
                let serial = attrs
                    .iter()
                    .any(|a| *a == "#[serial]" || *a == "#[serial_test::serial]");
                current = Some((line_no, name, serial));
                depth = 0;
            }
            attrs.clear();

            if current.is_some() {
                depth += brace_delta(code);
                if depth == 0 && code.ends_with('}') {
                    current = None;
                }
            }
        }
    }
    found
}

fn test_fn_name(code: &str, attrs: &[&str]) -> Option<String> {
    let is_test = attrs
        .iter()
        .any(|a| *a == "#[test]" || a.starts_with("#[tokio::test"));
    if !is_test {
        return None;
    }
    let (_, rest) = code.split_once("fn ")?;
    let (name, _) = rest.split_once('(')?;
    Some(name.trim().to_string())
}

fn mutates_env(code: &str) -> bool {
    code.contains("env::set_var(") || code.contains("env::remove_var(")
}

fn brace_delta(code: &str) -> i32 {
    code.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

/// Runs `rustfmt --check` over every Rust file. Skipped when rustfmt is not
/// installed or `SKIP_FORMAT_CHECK` is set.
fn check_formatting(root: &Path, files: &[SourceFile]) {
    println!("cargo:rerun-if-env-changed=SKIP_FORMAT_CHECK");
    if std::env::var_os("SKIP_FORMAT_CHECK").is_some() {
        return;
    }
    let available = Command::new("rustfmt")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success());
    if !available {
        println!("cargo:warning=rustfmt not found, skipping format check");
        return;
    }

    let mut cmd = Command::new("rustfmt");
    cmd.args(["--check", "--edition", "2021"]);
    cmd.args(files.iter().filter(|f| f.is_rust()).map(|f| &f.path));
    let output = match cmd.output() {
        Ok(output) => output,
        Err(e) => {
            println!("cargo:warning=Failed to run rustfmt: {}", e);
            return;
        }
    };
    if output.status.success() {
        return;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let root = root.to_string_lossy();
    let mut unformatted: Vec<Violation> = Vec::new();
    for line in stdout.lines() {
        let Some(diff) = line.strip_prefix("Diff in ") else {
            continue;
        };
        let location = diff.trim_end_matches(':');
        let location = location
            .strip_prefix(&*root)
            .map(|rel| rel.trim_start_matches('/'))
            .unwrap_or(location);
        unformatted.push(Violation {
            at: location.to_string(),
            detail: "not rustfmt-formatted".to_string(),
        });
    }
    if unformatted.is_empty() {
        unformatted.push(Violation {
            at: "rustfmt".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    report("UNFORMATTED SOURCE", "Run `cargo fmt`.", unformatted);
}

fn report(title: &str, advice: &str, violations: Vec<Violation>) {
    if violations.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("netconf-agent build check failed: {}", title);
    for violation in &violations {
        eprintln!("  {}  {}", violation.at, violation.detail);
    }
    eprintln!("{}", advice);
    eprintln!();
    panic!("{}: {} violation(s)", title, violations.len());
}
