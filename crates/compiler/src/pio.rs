//! PlatformIO build-system integration.
//!
//! `--pio-install` drops a pre-build script (`cnext_build.py`) beside the
//! project's `platformio.ini` and splices `extra_scripts =
//! pre:cnext_build.py` into every `[env:*]` section, preserving whatever
//! entries are already there. The operation is idempotent: a second
//! install finds the existing entry and reports "already configured".
//! `--pio-uninstall` reverses both steps, leaving other `extra_scripts`
//! entries intact.

use std::fs;
use std::path::Path;

pub const BUILD_SCRIPT_NAME: &str = "cnext_build.py";
const SCRIPT_ENTRY: &str = "pre:cnext_build.py";

/// The generated pre-build script: transpiles every `.cnx` under `src/`
/// before PlatformIO compiles the project.
const BUILD_SCRIPT: &str = r#"# Generated by cnextc --pio-install. Safe to delete; reinstall with
# `cnextc --pio-install`.
import glob
import os
import subprocess

Import("env")


def transpile_cnext(source_dir):
    sources = glob.glob(os.path.join(source_dir, "**", "*.cnx"), recursive=True)
    board = env.get("BOARD", "")
    for source in sources:
        cmd = ["cnextc", source]
        if board:
            cmd += ["--target", board]
        result = subprocess.run(cmd, capture_output=True, text=True)
        if result.returncode != 0:
            print(result.stderr)
            env.Exit(1)


transpile_cnext(env.subst("$PROJECT_SRC_DIR"))
"#;

/// Outcome of an install request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyConfigured,
}

/// Install the integration in `project_dir`. Fails when no
/// `platformio.ini` is present.
pub fn install(project_dir: &Path) -> Result<InstallOutcome, String> {
    let ini_path = project_dir.join("platformio.ini");
    let ini = fs::read_to_string(&ini_path)
        .map_err(|_| format!("no platformio.ini found in {}", project_dir.display()))?;

    let script_path = project_dir.join(BUILD_SCRIPT_NAME);
    let script_exists = script_path.exists();

    let (updated, changed) = add_entry(&ini);
    if !changed && script_exists {
        return Ok(InstallOutcome::AlreadyConfigured);
    }

    fs::write(&script_path, BUILD_SCRIPT)
        .map_err(|e| format!("failed to write {}: {}", script_path.display(), e))?;
    if changed {
        fs::write(&ini_path, updated)
            .map_err(|e| format!("failed to update {}: {}", ini_path.display(), e))?;
    }
    Ok(InstallOutcome::Installed)
}

/// Remove the integration from `project_dir`.
pub fn uninstall(project_dir: &Path) -> Result<(), String> {
    let ini_path = project_dir.join("platformio.ini");
    let ini = fs::read_to_string(&ini_path)
        .map_err(|_| format!("no platformio.ini found in {}", project_dir.display()))?;

    let (updated, changed) = remove_entry(&ini);
    if changed {
        fs::write(&ini_path, updated)
            .map_err(|e| format!("failed to update {}: {}", ini_path.display(), e))?;
    }
    let script_path = project_dir.join(BUILD_SCRIPT_NAME);
    if script_path.exists() {
        fs::remove_file(&script_path)
            .map_err(|e| format!("failed to remove {}: {}", script_path.display(), e))?;
    }
    Ok(())
}

/// Splice the script entry into every `[env:*]` section. Returns the
/// updated text and whether anything changed.
fn add_entry(ini: &str) -> (String, bool) {
    let sections = split_sections(ini);
    let mut out = String::new();
    let mut changed = false;

    for section in &sections {
        if !section.is_env || section.contains_entry() {
            out.push_str(&section.text());
            continue;
        }
        changed = true;
        if let Some(key_line) = section.extra_scripts_line() {
            // Extend the existing key: normalise to the multi-line form
            // and append our entry after the last existing one.
            for (index, line) in section.lines.iter().enumerate() {
                out.push_str(line);
                out.push('\n');
                if index == section.last_extra_scripts_value_line(key_line) {
                    out.push_str("    ");
                    out.push_str(SCRIPT_ENTRY);
                    out.push('\n');
                }
            }
        } else {
            // Insert the key right after the section header, before any
            // trailing blank lines.
            let mut insert_at = section.lines.len();
            while insert_at > 1 && section.lines[insert_at - 1].trim().is_empty() {
                insert_at -= 1;
            }
            for (index, line) in section.lines.iter().enumerate() {
                if index == insert_at {
                    out.push_str(&format!("extra_scripts = {}\n", SCRIPT_ENTRY));
                }
                out.push_str(line);
                out.push('\n');
            }
            if insert_at == section.lines.len() {
                out.push_str(&format!("extra_scripts = {}\n", SCRIPT_ENTRY));
            }
        }
    }
    (out, changed)
}

/// Remove the script entry wherever it appears, dropping the
/// `extra_scripts` key entirely when it becomes empty.
fn remove_entry(ini: &str) -> (String, bool) {
    let mut out = String::new();
    let mut changed = false;
    let mut lines = ini.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if let Some(value) = key_value(trimmed, "extra_scripts") {
            // Gather the key line plus indented continuation lines.
            let mut entries: Vec<String> = Vec::new();
            if !value.is_empty() {
                entries.extend(value.split(',').map(|s| s.trim().to_string()));
            }
            while let Some(next) = lines.peek() {
                if next.starts_with(' ') || next.starts_with('\t') {
                    let continuation = lines.next().unwrap().trim();
                    if !continuation.is_empty() {
                        entries.push(continuation.to_string());
                    }
                } else {
                    break;
                }
            }
            let had_ours = entries.iter().any(|e| e == SCRIPT_ENTRY);
            if !had_ours {
                // Untouched key: write it back exactly as gathered.
                if entries.len() <= 1 {
                    out.push_str(&format!(
                        "extra_scripts = {}\n",
                        entries.first().map(String::as_str).unwrap_or("")
                    ));
                } else {
                    out.push_str("extra_scripts =\n");
                    for entry in entries {
                        out.push_str(&format!("    {}\n", entry));
                    }
                }
                continue;
            }
            changed = true;
            let kept: Vec<String> = entries.into_iter().filter(|e| e != SCRIPT_ENTRY).collect();
            if kept.is_empty() {
                continue;
            }
            if kept.len() == 1 {
                out.push_str(&format!("extra_scripts = {}\n", kept[0]));
            } else {
                out.push_str("extra_scripts =\n");
                for entry in kept {
                    out.push_str(&format!("    {}\n", entry));
                }
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    (out, changed)
}

fn key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=')?;
    Some(rest.trim())
}

struct Section<'a> {
    lines: Vec<&'a str>,
    is_env: bool,
}

impl Section<'_> {
    fn text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    fn contains_entry(&self) -> bool {
        self.lines.iter().any(|l| l.contains(SCRIPT_ENTRY))
    }

    fn extra_scripts_line(&self) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| key_value(l.trim(), "extra_scripts").is_some())
    }

    /// Index of the last value line of an `extra_scripts` key starting
    /// at `key_line` (the key line itself for the inline form).
    fn last_extra_scripts_value_line(&self, key_line: usize) -> usize {
        let mut last = key_line;
        for (index, line) in self.lines.iter().enumerate().skip(key_line + 1) {
            if line.starts_with(' ') || line.starts_with('\t') {
                if !line.trim().is_empty() {
                    last = index;
                }
            } else {
                break;
            }
        }
        last
    }
}

/// Split an ini file into leading text and bracketed sections.
fn split_sections(ini: &str) -> Vec<Section<'_>> {
    let mut sections: Vec<Section<'_>> = Vec::new();
    let mut current = Section { lines: Vec::new(), is_env: false };
    for line in ini.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            if !current.lines.is_empty() {
                sections.push(current);
            }
            current = Section {
                lines: vec![line],
                is_env: trimmed.starts_with("[env:"),
            };
        } else {
            current.lines.push(line);
        }
    }
    if !current.lines.is_empty() {
        sections.push(current);
    }
    sections
}
