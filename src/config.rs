//! YAML project description for the command line interface. Mirrors the
//! [`Project`](crate::project::Project) API surface.

use std::{num::ParseIntError, path::PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use crate::{project::Project, toolchain::ToolchainKind};

fn parse_hex(s: &str) -> Result<u32, ParseIntError> {
    if s.starts_with("0x") {
        u32::from_str_radix(s.trim_start_matches("0x"), 16)
    } else {
        s.parse::<u32>()
    }
}

fn deserialize_hex<'de, D>(deserializer: D) -> Result<u32, D::Error>
where D: Deserializer<'de> {
    let s = String::deserialize(deserializer)?;
    parse_hex(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_opt<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where D: Deserializer<'de> {
    let s = Option::<String>::deserialize(deserializer)?;
    s.map(|s| parse_hex(&s).map_err(serde::de::Error::custom)).transpose()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default = "default_true")]
    pub use_global_flags: bool,
}

fn default_true() -> bool { true }

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum HookConfig {
    Branch {
        #[serde(deserialize_with = "deserialize_hex")]
        addr: u32,
        symbol: String,
        #[serde(default)]
        link: bool,
    },
    Pointer {
        #[serde(deserialize_with = "deserialize_hex")]
        addr: u32,
        symbol: String,
    },
    String {
        #[serde(deserialize_with = "deserialize_hex")]
        addr: u32,
        value: String,
        #[serde(default)]
        max_len: Option<usize>,
    },
    File {
        #[serde(deserialize_with = "deserialize_hex")]
        addr: u32,
        path: PathBuf,
        #[serde(default)]
        start: usize,
        #[serde(default)]
        end: Option<usize>,
        #[serde(default)]
        max_size: Option<usize>,
    },
    Immediate16 {
        #[serde(deserialize_with = "deserialize_hex")]
        addr: u32,
        symbol: String,
        modifier: String,
    },
    Immediate12 {
        #[serde(deserialize_with = "deserialize_hex")]
        addr: u32,
        symbol: String,
        modifier: String,
        w: u8,
        i: u8,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_hex_opt")]
    pub base_addr: Option<u32>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub src_dir: PathBuf,
    #[serde(default)]
    pub obj_dir: PathBuf,
    #[serde(default)]
    pub compiler: ToolchainKind,
    #[serde(default)]
    pub assembler: ToolchainKind,
    #[serde(default)]
    pub linker: ToolchainKind,
    #[serde(default)]
    pub tool_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_hex_opt")]
    pub sda_base: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_hex_opt")]
    pub sda2_base: Option<u32>,
    #[serde(default)]
    pub c_files: Vec<SourceConfig>,
    #[serde(default)]
    pub cpp_files: Vec<SourceConfig>,
    #[serde(default)]
    pub asm_files: Vec<SourceConfig>,
    #[serde(default)]
    pub obj_files: Vec<PathBuf>,
    #[serde(default)]
    pub linker_scripts: Vec<PathBuf>,
    #[serde(default)]
    pub gecko_files: Vec<PathBuf>,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

fn default_name() -> String { "project".to_string() }

impl ProjectConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open config file '{}'", path.display()))?;
        let config: ProjectConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    pub fn into_project(self) -> Result<Project> {
        let mut project =
            Project::with_toolchains(self.compiler, self.assembler, self.linker, self.tool_path);
        project.project_name = self.name;
        project.base_addr = self.base_addr;
        project.verbose = self.verbose;
        project.src_dir = self.src_dir;
        project.obj_dir = self.obj_dir;
        match (self.sda_base, self.sda2_base) {
            (Some(sda), Some(sda2)) => project.set_sda_bases(sda, sda2),
            (None, None) => {}
            _ => bail!("sda_base and sda2_base must be configured together"),
        }
        for file in self.c_files {
            project.add_c_file(file.path, file.flags, file.use_global_flags);
        }
        for file in self.cpp_files {
            project.add_cpp_file(file.path, file.flags, file.use_global_flags);
        }
        for file in self.asm_files {
            project.add_asm_file(file.path, file.flags, file.use_global_flags);
        }
        for path in self.obj_files {
            project.add_obj_file(path, false);
        }
        for path in self.linker_scripts {
            project.add_linker_script_file(path);
        }
        for path in self.gecko_files {
            match path.extension().and_then(|e| e.to_str()) {
                Some("gct") => project.add_gecko_gct_file(&path)?,
                _ => project.add_gecko_txt_file(&path)?,
            }
        }
        for hook in self.hooks {
            match hook {
                HookConfig::Branch { addr, symbol, link } => {
                    project.hook_branch(addr, &symbol, link)
                }
                HookConfig::Pointer { addr, symbol } => project.hook_pointer(addr, &symbol),
                HookConfig::String { addr, value, max_len } => {
                    project.hook_string(addr, &value, max_len)
                }
                HookConfig::File { addr, path, start, end, max_size } => {
                    project.hook_file(addr, path, start, end, max_size)
                }
                HookConfig::Immediate16 { addr, symbol, modifier } => {
                    project.hook_immediate16(addr, &symbol, &modifier)
                }
                HookConfig::Immediate12 { addr, symbol, modifier, w, i } => {
                    project.hook_immediate12(addr, w, i, &symbol, &modifier)
                }
            }
        }
        Ok(project)
    }
}
