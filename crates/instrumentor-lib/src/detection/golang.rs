//! Go runtime detection from the process's ELF binary

use super::{Inspector, ProcessSample};
use crate::models::Language;
use elf::abi::{PF_W, PF_X, PT_LOAD};
use elf::endian::AnyEndian;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Inspects an executable to identify the runtime it was built with
pub trait BinaryIntrospector: Send + Sync {
    fn detect_runtime(&self, path: &Path) -> Option<Language>;
}

/// Recognizes Go binaries from their ELF sections or build info blob
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfRuntimeIntrospector;

const GO_SECTIONS: &[&str] = &[".go.buildinfo", ".gosymtab", ".gopclntab"];
const ELF_READ_LIMIT: usize = 64 * 1024;
const BUILD_INFO_MAGIC: &[u8] = b"\xff Go buildinf:";
const BUILD_INFO_SIZE: usize = 32;
const BUILD_INFO_ALIGN: usize = 16;

impl BinaryIntrospector for ElfRuntimeIntrospector {
    fn detect_runtime(&self, path: &Path) -> Option<Language> {
        if !is_executable(path) {
            return None;
        }
        let mut file = File::open(path).ok()?;
        let mut elf = elf::ElfStream::<AnyEndian, _>::open_stream(&mut file).ok()?;

        for section in GO_SECTIONS {
            if elf.section_header_by_name(section).ok()?.is_some() {
                return Some(Language::Go);
            }
        }

        // Stripped binaries keep the build info near the start of the data segment
        let (offset, size) = elf
            .segments()
            .iter()
            .find(|p| p.p_type == PT_LOAD && p.p_flags & (PF_X | PF_W) == PF_W)
            .map(|p| (p.p_offset, p.p_filesz))?;

        let read_size = std::cmp::min(size as usize, ELF_READ_LIMIT);
        let mut buffer = vec![0u8; read_size];
        let mut file = File::open(path).ok()?;
        file.seek(SeekFrom::Start(offset)).ok()?;
        file.read_exact(&mut buffer).ok()?;

        has_build_info(&buffer).then_some(Language::Go)
    }
}

/// Regular file with any execute bit set; symlinks are followed
fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn has_build_info(data: &[u8]) -> bool {
    (0..data.len())
        .step_by(BUILD_INFO_ALIGN)
        .any(|i| data.len() - i >= BUILD_INFO_SIZE && data[i..].starts_with(BUILD_INFO_MAGIC))
}

/// Go has no telltale process name, so the binary itself is inspected
pub struct GoInspector {
    proc_root: PathBuf,
    introspector: Box<dyn BinaryIntrospector>,
}

impl GoInspector {
    pub fn new(proc_root: impl Into<PathBuf>, introspector: Box<dyn BinaryIntrospector>) -> Self {
        Self {
            proc_root: proc_root.into(),
            introspector,
        }
    }
}

impl Inspector for GoInspector {
    type Output = Language;

    fn name(&self) -> &'static str {
        "go"
    }

    fn inspect(&self, sample: &ProcessSample) -> Option<Language> {
        let exe = self.proc_root.join(sample.pid.to_string()).join("exe");
        self.introspector.detect_runtime(&exe)
    }
}
