//! The build pipeline: compiles and links patch sources through an external
//! toolchain, relocates Gecko ASM inserts, resolves hooks, and produces
//! either a patched DOL or a Gecko code text file, plus a symbol map.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};

use crate::{
    gecko::{relocate_codetable, GeckoCodeMeta, GeckoCodeTable, GeckoCommand},
    hook::Hook,
    obj::SymbolTable,
    toolchain::{Toolchain, ToolchainKind},
    util::{
        align_up,
        dol::DolFile,
        elf::{map_symbols, process_object},
        file::{buf_writer, map_file, try_remove},
        map::write_map,
    },
};

/// Computes the default base address for appended content: the end of the
/// highest-addressed section, rounded up to the platform's 32-byte section
/// alignment.
pub fn auto_base_addr(dol: &DolFile) -> u32 { align_up(dol.rom_end(), 32) }

struct SourceFile {
    path: PathBuf,
    flags: Vec<String>,
    use_global_flags: bool,
}

type ArenaPatcher = Box<dyn Fn(&mut DolFile, u32)>;

pub struct Project {
    pub base_addr: Option<u32>,
    pub verbose: bool,
    pub project_name: String,
    pub src_dir: PathBuf,
    pub obj_dir: PathBuf,
    pub c_flags: Vec<String>,
    pub cpp_flags: Vec<String>,
    pub asm_flags: Vec<String>,
    pub linker_flags: Vec<String>,
    pub hooks: Vec<Hook>,
    pub gecko_table: GeckoCodeTable,

    compiler: Box<dyn Toolchain>,
    assembler: Box<dyn Toolchain>,
    linker: Box<dyn Toolchain>,
    sda_base: Option<u32>,
    sda2_base: Option<u32>,
    c_files: Vec<SourceFile>,
    cpp_files: Vec<SourceFile>,
    asm_files: Vec<SourceFile>,
    obj_files: Vec<(PathBuf, bool)>,
    linker_script_files: Vec<PathBuf>,
    gecko_meta: Vec<GeckoCodeMeta>,
    osarena_patcher: Option<ArenaPatcher>,
    symbols: SymbolTable,
}

impl Default for Project {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("base_addr", &self.base_addr)
            .field("verbose", &self.verbose)
            .field("project_name", &self.project_name)
            .field("src_dir", &self.src_dir)
            .field("obj_dir", &self.obj_dir)
            .finish_non_exhaustive()
    }
}

impl Project {
    pub fn new() -> Self {
        Self::with_toolchains(ToolchainKind::DevkitPpc, ToolchainKind::DevkitPpc, ToolchainKind::DevkitPpc, None)
    }

    /// Creates a project with per-stage toolchain selections. `tool_path`
    /// overrides the profile's default install location.
    pub fn with_toolchains(
        compiler: ToolchainKind,
        assembler: ToolchainKind,
        linker: ToolchainKind,
        tool_path: Option<PathBuf>,
    ) -> Self {
        let compiler = compiler.profile(tool_path.clone());
        let assembler = assembler.profile(tool_path.clone());
        let linker = linker.profile(tool_path);
        Self {
            base_addr: None,
            verbose: false,
            project_name: "project".to_string(),
            src_dir: PathBuf::new(),
            obj_dir: PathBuf::new(),
            c_flags: compiler.default_c_flags(),
            cpp_flags: compiler.default_cpp_flags(),
            asm_flags: assembler.default_asm_flags(),
            linker_flags: linker.default_link_flags(),
            hooks: Vec::new(),
            gecko_table: GeckoCodeTable::new(),
            compiler,
            assembler,
            linker,
            sda_base: None,
            sda2_base: None,
            c_files: Vec::new(),
            cpp_files: Vec::new(),
            asm_files: Vec::new(),
            obj_files: Vec::new(),
            linker_script_files: Vec::new(),
            gecko_meta: Vec::new(),
            osarena_patcher: None,
            symbols: SymbolTable::new(),
        }
    }

    pub fn add_c_file(&mut self, path: PathBuf, flags: Vec<String>, use_global_flags: bool) {
        self.c_files.push(SourceFile { path, flags, use_global_flags });
    }

    pub fn add_cpp_file(&mut self, path: PathBuf, flags: Vec<String>, use_global_flags: bool) {
        self.cpp_files.push(SourceFile { path, flags, use_global_flags });
    }

    pub fn add_asm_file(&mut self, path: PathBuf, flags: Vec<String>, use_global_flags: bool) {
        self.asm_files.push(SourceFile { path, flags, use_global_flags });
    }

    pub fn add_obj_file(&mut self, path: PathBuf, do_cleanup: bool) {
        self.obj_files.push((path, do_cleanup));
    }

    pub fn add_linker_script_file(&mut self, path: PathBuf) {
        self.linker_script_files.push(path);
    }

    pub fn add_gecko_txt_file(&mut self, path: &Path) -> Result<()> {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open Gecko text file '{}'", path.display()))?;
        self.gecko_table.parse_text(std::io::BufReader::new(file))
    }

    pub fn add_gecko_gct_file(&mut self, path: &Path) -> Result<()> {
        let buf = map_file(path)?;
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("gct");
        self.gecko_table.parse_gct(&buf, name)
    }

    pub fn hook_branch(&mut self, addr: u32, symbol: &str, lk: bool) {
        self.hooks.push(Hook::branch(addr, symbol, lk));
    }

    pub fn hook_branchlink(&mut self, addr: u32, symbol: &str) {
        self.hook_branch(addr, symbol, true);
    }

    pub fn hook_pointer(&mut self, addr: u32, symbol: &str) {
        self.hooks.push(Hook::pointer(addr, symbol));
    }

    pub fn hook_string(&mut self, addr: u32, string: &str, max_len: Option<usize>) {
        self.hooks.push(Hook::string(addr, string, max_len));
    }

    pub fn hook_file(
        &mut self,
        addr: u32,
        path: PathBuf,
        start: usize,
        end: Option<usize>,
        max_size: Option<usize>,
    ) {
        self.hooks.push(Hook::file(addr, path, start, end, max_size));
    }

    pub fn hook_immediate16(&mut self, addr: u32, symbol: &str, modifier: &str) {
        self.hooks.push(Hook::immediate16(addr, symbol, modifier));
    }

    pub fn hook_immediate12(&mut self, addr: u32, w: u8, i: u8, symbol: &str, modifier: &str) {
        self.hooks.push(Hook::immediate12(addr, w, i, symbol, modifier));
    }

    pub fn set_sda_bases(&mut self, sda_base: u32, sda2_base: u32) {
        self.sda_base = Some(sda_base);
        self.sda2_base = Some(sda2_base);
    }

    pub fn set_osarena_patcher<F>(&mut self, patcher: F)
    where F: Fn(&mut DolFile, u32) + 'static {
        self.osarena_patcher = Some(Box::new(patcher));
    }

    /// Builds the patched DOL: compile and link sources, relocate ASM
    /// inserts, apply Gecko write commands and hooks, then append the blob
    /// as a new section.
    pub fn build_dol(&mut self, in_dol_path: &Path, out_dol_path: &Path) -> Result<()> {
        let buf = map_file(in_dol_path)?;
        let mut dol = DolFile::parse(&buf)?;
        drop(buf);

        let base_addr = match self.base_addr {
            Some(addr) => addr,
            None => {
                let addr = auto_base_addr(&dol);
                log::info!(
                    "Base address auto-set from ROM end: {addr:#X}. \
                     Do not rely on this feature if your DOL uses .sbss2"
                );
                self.base_addr = Some(addr);
                addr
            }
        };
        if base_addr % 32 != 0 {
            log::warn!(
                "DOL sections must be 32-byte aligned for OSResetSystem to work properly!"
            );
        }

        let mut blob = self.build_project()?.unwrap_or_default();
        // The section contents must stay 4-byte aligned so relocated code
        // lands on instruction boundaries.
        blob.resize(align_up(blob.len() as u32, 4) as usize, 0);

        self.gecko_meta = relocate_codetable(&mut dol, &self.gecko_table, base_addr, &mut blob)?;
        self.gecko_table.apply_dol(&mut dol)?;

        self.symbols.set_sda_bases(self.sda_base, self.sda2_base);
        for hook in &mut self.hooks {
            hook.resolve(&self.symbols)?;
            hook.apply_dol(&mut dol)?;
            if self.verbose {
                log::info!("{}", hook.describe());
            }
        }

        if !blob.is_empty() {
            dol.append_section(base_addr, &blob)?;
            if let Some(patcher) = &self.osarena_patcher {
                patcher(&mut dol, base_addr + blob.len() as u32);
            }
        }

        let mut out = buf_writer(out_dol_path)?;
        dol.save(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Emits the whole patch set as one Gecko code text file. The base image
    /// is not touched; ASM inserts pass through in their native form.
    pub fn build_gecko(&mut self, gecko_path: &Path) -> Result<()> {
        let blob = self.build_project()?.unwrap_or_default();

        let mut out = buf_writer(gecko_path)?;
        writeln!(out, "[Gecko]")?;
        // Everything gets shoved into one large Gecko code named after the project
        writeln!(out, "${}", self.project_name)?;
        for code in self.gecko_table.iter() {
            let status = if code.is_enabled() { "ENABLED" } else { "DISABLED" };
            log::info!("[GeckoCode]   {status:12} ${}", code.name);
            if code.is_enabled() {
                writeln!(out, "* {}", code.name)?;
                writeln!(out, "{}", code.as_text())?;
            }
        }
        if !blob.is_empty() {
            let base_addr =
                self.base_addr.ok_or_else(|| anyhow!("Base address not set! New code cannot be emitted."))?;
            writeln!(out, "* Program Data")?;
            let command =
                GeckoCommand::WriteString { addr: base_addr & 0x01FF_FFFF, data: blob };
            writeln!(out, "{}", command.as_text())?;
        }
        writeln!(out, "* Hooks")?;
        self.symbols.set_sda_bases(self.sda_base, self.sda2_base);
        for hook in &mut self.hooks {
            hook.resolve(&self.symbols)?;
            hook.write_gecko(&mut out)?;
            if self.verbose {
                log::info!("{}", hook.describe());
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Writes the symbol map for the last build. An unreadable linked object
    /// only drops the object-symbol section; the Gecko placement records and
    /// the Dolphin workaround entry are always written.
    pub fn save_map(&self, map_path: &Path) -> Result<()> {
        let symbols = match map_file(self.linked_object_path()) {
            Ok(buf) => map_symbols(&buf).unwrap_or_else(|e| {
                log::warn!("Failed to read linked object for map: {e:#}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        let mut out = buf_writer(map_path)?;
        write_map(&mut out, &symbols, self.base_addr.unwrap_or(0), &self.gecko_meta)?;
        out.flush()?;
        Ok(())
    }

    /// Removes intermediate build products and cached state.
    pub fn cleanup(&mut self) {
        for (path, do_cleanup) in &self.obj_files {
            if *do_cleanup {
                try_remove(path);
            }
        }
        try_remove(self.linked_object_path());
        try_remove(self.obj_dir.join(format!("{}.map", self.project_name)));
        self.obj_files.clear();
        self.symbols.clear();
        self.gecko_meta.clear();
    }

    fn linked_object_path(&self) -> PathBuf {
        self.obj_dir.join(format!("{}.o", self.project_name))
    }

    fn object_path_for(&self, src: &Path) -> PathBuf {
        let name = src.file_name().and_then(|s| s.to_str()).unwrap_or("src");
        self.obj_dir.join(format!("{name}.o"))
    }

    fn stage_flags(global: &[String], file: &SourceFile) -> Vec<String> {
        let mut flags = Vec::new();
        if file.use_global_flags {
            flags.extend_from_slice(global);
        }
        flags.extend_from_slice(&file.flags);
        flags
    }

    /// Compiles, links, and processes the project sources. Returns `None`
    /// when there is nothing to compile; the symbol table then keeps
    /// whatever a previous pass produced.
    fn build_project(&mut self) -> Result<Option<Vec<u8>>> {
        if self.c_files.is_empty() && self.cpp_files.is_empty() && self.asm_files.is_empty() {
            return Ok(None);
        }
        if !self.src_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.src_dir)?;
        }
        if !self.obj_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.obj_dir)?;
        }

        let mut new_objects = Vec::new();
        for file in &self.c_files {
            let src = self.src_dir.join(&file.path);
            let out = self.object_path_for(&file.path);
            self.compiler.compile(&src, &out, &self.src_dir, &Self::stage_flags(&self.c_flags, file))?;
            new_objects.push(out);
        }
        for file in &self.cpp_files {
            let src = self.src_dir.join(&file.path);
            let out = self.object_path_for(&file.path);
            self.compiler.compile_cpp(&src, &out, &self.src_dir, &Self::stage_flags(&self.cpp_flags, file))?;
            new_objects.push(out);
        }
        for file in &self.asm_files {
            let src = self.src_dir.join(&file.path);
            let out = self.object_path_for(&file.path);
            self.assembler.assemble(&src, &out, &self.src_dir, &Self::stage_flags(&self.asm_flags, file))?;
            new_objects.push(out);
        }
        for out in new_objects {
            self.obj_files.push((out, true));
        }

        let base_addr = self
            .base_addr
            .ok_or_else(|| anyhow!("Base address not set! New code cannot be linked."))?;

        let mut link_flags = Vec::new();
        for script in &self.linker_script_files {
            link_flags.push("-T".to_string());
            link_flags.push(script.display().to_string());
        }
        link_flags.extend_from_slice(&self.linker_flags);
        let objects: Vec<PathBuf> = self.obj_files.iter().map(|(path, _)| path.clone()).collect();
        let linked = self.linked_object_path();
        let link_map = self.obj_dir.join(format!("{}.map", self.project_name));
        self.linker.link(&objects, &linked, &link_map, &link_flags)?;

        let buf = map_file(&linked)
            .with_context(|| format!("Linker produced no output '{}'", linked.display()))?;
        let (blob, symbols) = process_object(&buf, base_addr)?;
        self.symbols = symbols;
        Ok(Some(blob))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        gecko::{GeckoCode, GeckoStatus},
        ppc::assemble_branch,
        util::dol::tests::test_dol,
    };

    fn temp_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dolkit-{}-{}", test, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_test_dol(path: &Path) {
        let dol = test_dol(&[0u8; 0x1000]);
        let mut out = buf_writer(path).unwrap();
        dol.save(&mut out).unwrap();
        out.flush().unwrap();
    }

    #[test]
    fn test_auto_base_addr() {
        // Section [0x80003000, 0x80004000): already 32-byte aligned.
        let dol = test_dol(&[0u8; 0x1000]);
        assert_eq!(auto_base_addr(&dol), 0x8000_4000);
        // Unaligned end rounds up.
        let dol = test_dol(&[0u8; 0xFF4]);
        assert_eq!(auto_base_addr(&dol), 0x8000_4000);
    }

    #[test]
    fn test_build_dol_relocates_and_appends() {
        let dir = temp_dir("build-dol");
        let in_dol = dir.join("in.dol");
        let out_dol = dir.join("out.dol");
        write_test_dol(&in_dol);

        let mut project = Project::new();
        project.gecko_table.add(GeckoCode {
            name: "Insert".to_string(),
            enabled: true,
            commands: vec![crate::gecko::GeckoCommand::AsmInsert {
                addr: 0x3040,
                code: vec![
                    0x38, 0x60, 0x00, 0x01, // li r3, 1
                    0x00, 0x00, 0x00, 0x00, // placeholder
                ],
                xor: None,
            }],
        });
        project.hook_string(0x8000_3100, "patched", None);
        project.build_dol(&in_dol, &out_dol).unwrap();

        // Auto base address from ROM end.
        assert_eq!(project.base_addr, Some(0x8000_4000));

        let buf = fs::read(&out_dol).unwrap();
        let dol = DolFile::parse(&buf).unwrap();
        // Origin branches into the appended section.
        assert_eq!(
            dol.read_u32(0x8000_3040).unwrap(),
            assemble_branch(0x8000_3040, 0x8000_4000, false)
        );
        // Relocated payload and the branch back to origin+4.
        assert_eq!(dol.read_u32(0x8000_4000).unwrap(), 0x3860_0001);
        assert_eq!(
            dol.read_u32(0x8000_4004).unwrap(),
            assemble_branch(0x8000_4004, 0x8000_3044, false)
        );
        // String hook applied in place.
        assert_eq!(dol.read_u32(0x8000_3100).unwrap(), u32::from_be_bytes(*b"patc"));

        // Placement metadata feeds the map.
        let map_path = dir.join("out.map");
        project.save_map(&map_path).unwrap();
        let map = fs::read_to_string(&map_path).unwrap();
        assert!(map.contains("Insert$0"));
        assert!(map.ends_with(
            "  00000000 000000 81200000  0 Workaround for Dolphin's bad symbol map loader\n"
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_build_dol_without_blob_appends_nothing() {
        let dir = temp_dir("build-dol-empty");
        let in_dol = dir.join("in.dol");
        let out_dol = dir.join("out.dol");
        write_test_dol(&in_dol);

        let mut project = Project::new();
        project.hook_pointer(0x8000_3010, "Missing");
        project.build_dol(&in_dol, &out_dol).unwrap();

        let buf = fs::read(&out_dol).unwrap();
        let dol = DolFile::parse(&buf).unwrap();
        assert_eq!(dol.sections.len(), 1);
        // Unresolved hook wrote nothing.
        assert_eq!(dol.read_u32(0x8000_3010).unwrap(), 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_build_gecko_output() {
        let dir = temp_dir("build-gecko");
        let out = dir.join("patch.txt");

        let mut project = Project::new();
        project.project_name = "demo".to_string();
        project.gecko_table.add(GeckoCode {
            name: "Tweak".to_string(),
            enabled: true,
            commands: vec![crate::gecko::GeckoCommand::Write32 {
                addr: 0x3010,
                value: 0x6000_0000,
            }],
        });
        project.gecko_table.add(GeckoCode {
            name: "Off".to_string(),
            enabled: false,
            commands: vec![],
        });
        project.hook_string(0x8000_3100, "hi", None);
        project.build_gecko(&out).unwrap();

        let text = fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("[Gecko]\n$demo\n"));
        assert!(text.contains("* Tweak\n04003010 60000000\n"));
        assert!(!text.contains("Off"));
        // String hook: 3 bytes ("hi\0"), one padded line.
        assert!(text.contains("* Hooks\n06003100 00000003\n68690000 00000000\n"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_gecko_meta_statuses() {
        let dir = temp_dir("gecko-meta");
        let in_dol = dir.join("in.dol");
        let out_dol = dir.join("out.dol");
        write_test_dol(&in_dol);

        let mut project = Project::new();
        project.gecko_table.add(GeckoCode {
            name: "Disabled".to_string(),
            enabled: false,
            commands: vec![crate::gecko::GeckoCommand::AsmInsert {
                addr: 0x3040,
                code: vec![0; 8],
                xor: None,
            }],
        });
        project.build_dol(&in_dol, &out_dol).unwrap();
        assert_eq!(project.gecko_meta.len(), 1);
        assert_eq!(project.gecko_meta[0].status, GeckoStatus::Disabled);

        fs::remove_dir_all(&dir).unwrap();
    }
}
