//! External toolchain profiles. The pipeline only depends on the
//! [`Toolchain`] trait; concrete profiles spawn the devkitPPC or CodeWarrior
//! command line tools. Exit statuses are not inspected: a failed tool leaves
//! no output file, which surfaces at the point of use.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainKind {
    #[default]
    DevkitPpc,
    CodeWarrior,
}

impl ToolchainKind {
    pub fn profile(self, path: Option<PathBuf>) -> Box<dyn Toolchain> {
        match self {
            ToolchainKind::DevkitPpc => Box::new(DevkitPpc::new(path)),
            ToolchainKind::CodeWarrior => Box::new(CodeWarrior::new(path)),
        }
    }
}

pub trait Toolchain {
    fn compile(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()>;
    fn compile_cpp(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()>;
    fn assemble(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()>;
    fn link(&self, objects: &[PathBuf], out: &Path, map: &Path, flags: &[String]) -> Result<()>;

    fn default_c_flags(&self) -> Vec<String>;
    fn default_cpp_flags(&self) -> Vec<String>;
    fn default_asm_flags(&self) -> Vec<String>;
    fn default_link_flags(&self) -> Vec<String>;
}

fn run(mut command: Command) -> Result<()> {
    log::debug!("Running {command:?}");
    // The exit status is deliberately not checked; a missing output file is
    // reported by the consumer instead.
    let _ = command
        .status()
        .with_context(|| format!("Failed to execute {:?}", command.get_program()))?;
    Ok(())
}

fn to_strings(strs: &[&str]) -> Vec<String> { strs.iter().map(|s| s.to_string()).collect() }

pub struct DevkitPpc {
    pub path: PathBuf,
}

impl DevkitPpc {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| {
                if cfg!(windows) {
                    PathBuf::from("C:/devkitPro/devkitPPC/bin")
                } else {
                    PathBuf::from("/opt/devkitpro/devkitPPC/bin")
                }
            }),
        }
    }

    fn tool(&self, name: &str) -> PathBuf { self.path.join(name) }
}

impl Toolchain for DevkitPpc {
    fn compile(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("powerpc-eabi-gcc"));
        command.arg("-c").arg(src).arg("-o").arg(out).arg("-I").arg(include).args(flags);
        run(command)
    }

    fn compile_cpp(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("powerpc-eabi-g++"));
        command.arg("-c").arg(src).arg("-o").arg(out).arg("-I").arg(include).args(flags);
        run(command)
    }

    fn assemble(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("powerpc-eabi-as"));
        command.arg(src).arg("-o").arg(out).arg("-I").arg(include).args(flags);
        run(command)
    }

    fn link(&self, objects: &[PathBuf], out: &Path, map: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("powerpc-eabi-ld"));
        command.arg("-o").arg(out);
        command.args(objects);
        command.arg("-Map").arg(map);
        command.args(flags);
        run(command)
    }

    fn default_c_flags(&self) -> Vec<String> {
        to_strings(&["-w", "-std=c99", "-O1", "-fno-asynchronous-unwind-tables"])
    }

    fn default_cpp_flags(&self) -> Vec<String> {
        to_strings(&["-w", "-std=c++98", "-O1", "-fno-asynchronous-unwind-tables", "-fno-rtti"])
    }

    fn default_asm_flags(&self) -> Vec<String> { to_strings(&["-w"]) }

    fn default_link_flags(&self) -> Vec<String> { Vec::new() }
}

pub struct CodeWarrior {
    pub path: PathBuf,
}

impl CodeWarrior {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| {
                if cfg!(windows) {
                    PathBuf::from(
                        "C:/Program Files (x86)/Metrowerks/CodeWarrior/PowerPC_EABI_Tools/Command_Line_Tools",
                    )
                } else {
                    PathBuf::from("/")
                }
            }),
        }
    }

    fn tool(&self, name: &str) -> PathBuf { self.path.join(name) }
}

impl Toolchain for CodeWarrior {
    fn compile(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("mwcceppc"));
        command
            .args(["-lang", "c", "-c"])
            .arg(src)
            .arg("-o")
            .arg(out)
            .arg("-i")
            .arg(include)
            .args(flags);
        run(command)
    }

    fn compile_cpp(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("mwcceppc"));
        command
            .args(["-lang", "c++", "-c"])
            .arg(src)
            .arg("-o")
            .arg(out)
            .arg("-i")
            .arg(include)
            .args(flags);
        run(command)
    }

    fn assemble(&self, src: &Path, out: &Path, include: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("mwasmeppc"));
        command.arg("-c").arg(src).arg("-o").arg(out).arg("-i").arg(include).args(flags);
        run(command)
    }

    fn link(&self, objects: &[PathBuf], out: &Path, map: &Path, flags: &[String]) -> Result<()> {
        let mut command = Command::new(self.tool("mwldeppc"));
        command.arg("-o").arg(out);
        command.args(objects);
        command.arg("-map").arg(map);
        command.args(flags);
        run(command)
    }

    fn default_c_flags(&self) -> Vec<String> {
        to_strings(&[
            "-proc", "gekko", "-Cpp_exceptions", "off", "-use_lmw_stmw", "on", "-fp", "fmadd",
            "-schedule", "on",
        ])
    }

    fn default_cpp_flags(&self) -> Vec<String> {
        to_strings(&[
            "-proc", "gekko", "-Cpp_exceptions", "off", "-fp_contract", "on", "-inline", "auto",
            "-rostr", "-use_lmw_stmw", "on", "-nodefaults", "-msgstyle", "gcc", "-gccinc", "-fp",
            "hard", "-schedule", "on",
        ])
    }

    fn default_asm_flags(&self) -> Vec<String> { to_strings(&["-proc", "gekko"]) }

    fn default_link_flags(&self) -> Vec<String> { to_strings(&["-fp", "fmadd", "-nodefaults"]) }
}
