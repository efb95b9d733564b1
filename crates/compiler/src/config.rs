//! Target profiles and project configuration files.
//!
//! A target profile names the hardware family and fixes the atomic
//! lowering strategy. Project configuration lives in one of
//! `cnext.config.json`, `.cnext.json`, or `.cnextrc` (first hit wins),
//! discovered by walking up from the source file's directory.

use crate::resolver::FileLoader;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How atomic read-modify-write operations are lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicStrategy {
    /// ARMv7-M exclusive monitors: `__LDREXW`/`__STREXW` retry loops.
    LdrexStrex,
    /// Interrupt masking via `__get_PRIMASK`/`__disable_irq`.
    PrimaskSection,
}

/// A named set of code-generation choices for a hardware family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProfile {
    pub name: String,
    pub strategy: AtomicStrategy,
}

impl TargetProfile {
    /// Look up a known profile by name.
    pub fn lookup(name: &str) -> Option<TargetProfile> {
        let strategy = match name {
            "teensy40" | "teensy41" | "cortex-m3" | "cortex-m4" | "cortex-m7" => {
                AtomicStrategy::LdrexStrex
            }
            "cortex-m0" | "cortex-m0plus" | "avr" | "host" => AtomicStrategy::PrimaskSection,
            _ => return None,
        };
        Some(TargetProfile { name: name.to_string(), strategy })
    }

    /// The fallback used for unknown targets and host builds.
    pub fn host() -> TargetProfile {
        TargetProfile {
            name: "host".to_string(),
            strategy: AtomicStrategy::PrimaskSection,
        }
    }

    /// Stable token mixed into cache keys; changing a profile's lowering
    /// invalidates entries built under it.
    pub fn hash_token(&self) -> String {
        let strategy = match self.strategy {
            AtomicStrategy::LdrexStrex => "ldrex",
            AtomicStrategy::PrimaskSection => "primask",
        };
        format!("{}:{}", self.name, strategy)
    }
}

/// Keys recognised in a project configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    pub target: Option<String>,
    /// `".c"` or `".cpp"`; a default emission mode when nothing stronger
    /// (CLI flag, source directive, detection) decides.
    pub output_extension: Option<String>,
    pub debug_mode: bool,
}

const CONFIG_NAMES: [&str; 3] = ["cnext.config.json", ".cnext.json", ".cnextrc"];

/// Walk up from `start_dir` looking for the first configuration file.
pub fn discover(start_dir: &Path, loader: &dyn FileLoader) -> Option<(PathBuf, ConfigFile)> {
    let mut dir = Some(start_dir);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let candidate = current.join(name);
            if loader.exists(&candidate) {
                let text = loader.load(&candidate).ok()?;
                match serde_json::from_str::<ConfigFile>(&text) {
                    Ok(config) => return Some((candidate, config)),
                    Err(_) => return Some((candidate, ConfigFile::default())),
                }
            }
        }
        dir = current.parent();
    }
    None
}
