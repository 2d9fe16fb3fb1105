//! Amstrad CPC disk analysis.
//!
//! Two questions: does track 0 carry a CP/M boot record, in which case the
//! machine should be told `|cpm`; and if not, which catalogue entry is the
//! most plausible thing to `run"`? Candidate selection walks the AMSDOS
//! catalogue: hidden files are dropped when visible ones exist, a lone
//! file wins outright, then BASIC files and files whose extension can be
//! omitted are preferred.

use crate::{Machine, MachineOptions, Media, Target};

/// A catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueFile {
    pub name: String,
    pub file_type: String,
    pub system: bool,
}

/// What the disk inspection concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmstradCpcAnalysis {
    pub bootable: bool,
    pub files: Vec<CatalogueFile>,
}

const SECTOR_SIZE: usize = 512;
const CATALOGUE_SECTORS: usize = 4;

/// Reads the AMSDOS catalogue from the head of a raw sector dump.
fn read_catalogue(data: &[u8]) -> Vec<CatalogueFile> {
    let mut files = Vec::new();
    let catalogue = &data[..(SECTOR_SIZE * CATALOGUE_SECTORS).min(data.len())];

    for entry in catalogue.chunks(32) {
        if entry.len() < 16 {
            break;
        }
        let user = entry[0];
        // 0xE5 marks an erased entry; only extent 0 names the file.
        if user == 0xE5 || entry[12] != 0 {
            continue;
        }

        let name_bytes: Vec<u8> = entry[1..9].iter().map(|byte| byte & 0x7F).collect();
        let type_bytes: Vec<u8> = entry[9..12].iter().map(|byte| byte & 0x7F).collect();
        // Untypable characters disqualify an entry.
        if name_bytes
            .iter()
            .chain(type_bytes.iter())
            .any(|&byte| byte < 32)
        {
            continue;
        }

        let system = entry[10] & 0x80 != 0;
        files.push(CatalogueFile {
            name: String::from_utf8_lossy(&name_bytes).trim_end().to_string(),
            file_type: String::from_utf8_lossy(&type_bytes).trim_end().to_string(),
            system,
        });
    }
    files
}

/// A CP/M boot record check: the first sector must contain something
/// other than catalogue or blank filler.
fn has_boot_sector(data: &[u8]) -> bool {
    if data.len() < SECTOR_SIZE {
        return false;
    }
    let sector = &data[..SECTOR_SIZE];
    // Catalogue-looking or erased-fill first sectors are not boot code.
    let filler = sector.iter().all(|&byte| byte == 0xE5 || byte == 0);
    let looks_like_catalogue = sector[0] < 16 && sector[1].is_ascii_uppercase();
    !filler && !looks_like_catalogue
}

fn is_implied_extension(extension: &str) -> bool {
    extension.is_empty()
        || extension.eq_ignore_ascii_case("BAS")
        || extension.eq_ignore_ascii_case("BIN")
}

fn run_command_for(file: &CatalogueFile) -> String {
    let mut command = format!("run\"{}", file.name);
    if !is_implied_extension(&file.file_type) {
        command.push('.');
        command.push_str(&file.file_type);
    }
    command.push('\n');
    command
}

/// Chooses a loading command from the catalogue, mirroring the priorities
/// a user would apply at the keyboard.
fn loading_command(files: &[CatalogueFile]) -> Option<String> {
    let mut candidates: Vec<&CatalogueFile> = files.iter().collect();

    // Hidden files lose to visible ones.
    if candidates.iter().any(|file| !file.system) {
        candidates.retain(|file| !file.system);
    }
    // Nameless files cannot be typed.
    candidates.retain(|file| !file.name.is_empty());

    match candidates.len() {
        0 => None,
        1 => Some(run_command_for(candidates[0])),
        _ => {
            let basic: Vec<&&CatalogueFile> = candidates
                .iter()
                .filter(|file| file.file_type.eq_ignore_ascii_case("BAS"))
                .collect();
            if basic.len() == 1 {
                return Some(run_command_for(basic[0]));
            }
            let implicit: Vec<&&CatalogueFile> = candidates
                .iter()
                .filter(|file| is_implied_extension(&file.file_type))
                .collect();
            if implicit.len() == 1 {
                return Some(run_command_for(implicit[0]));
            }
            // No clear winner: take the first candidate as the best guess.
            Some(run_command_for(candidates[0]))
        }
    }
}

#[must_use]
pub fn inspect(data: &[u8]) -> AmstradCpcAnalysis {
    AmstradCpcAnalysis {
        bootable: has_boot_sector(data),
        files: read_catalogue(data),
    }
}

#[must_use]
pub fn analyse(data: &[u8]) -> Option<Target> {
    if data.len() < SECTOR_SIZE {
        return None;
    }

    let analysis = inspect(data);
    let loading_command = if analysis.bootable {
        "|cpm\n".to_string()
    } else {
        loading_command(&analysis.files)?
    };

    Some(Target {
        machine: Machine::AmstradCpc,
        media: Media {
            disks: vec![data.to_vec()],
            ..Media::default()
        },
        loading_command,
        confidence: 0.5,
        options: MachineOptions::None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue_entry(name: &str, extension: &str, system: bool) -> [u8; 32] {
        let mut entry = [0u8; 32];
        entry[0] = 0; // user 0
        for (index, byte) in entry[1..9].iter_mut().enumerate() {
            *byte = *name.as_bytes().get(index).unwrap_or(&b' ');
        }
        for (index, byte) in entry[9..12].iter_mut().enumerate() {
            *byte = *extension.as_bytes().get(index).unwrap_or(&b' ');
        }
        if system {
            entry[10] |= 0x80;
        }
        entry
    }

    fn disk_with_files(files: &[(&str, &str, bool)]) -> Vec<u8> {
        let mut image = vec![0xE5u8; 180 * 1024];
        // An erased-fill boot sector keeps the disk non-bootable.
        for (index, file) in files.iter().enumerate() {
            let entry = catalogue_entry(file.0, file.1, file.2);
            image[index * 32..index * 32 + 32].copy_from_slice(&entry);
        }
        image
    }

    #[test]
    fn single_file_is_run_directly() {
        let image = disk_with_files(&[("GAME", "BAS", false)]);
        let Some(target) = analyse(&image) else {
            panic!("catalogue disk should be recognised");
        };
        assert_eq!(target.loading_command, "run\"GAME\n");
    }

    #[test]
    fn non_implied_extension_is_spelled_out() {
        let image = disk_with_files(&[("LOADER", "SCR", false)]);
        let Some(target) = analyse(&image) else {
            panic!();
        };
        assert_eq!(target.loading_command, "run\"LOADER.SCR\n");
    }

    #[test]
    fn lone_basic_file_beats_binaries() {
        let image = disk_with_files(&[
            ("DATA", "DAT", false),
            ("MENU", "BAS", false),
            ("CODE", "SCR", false),
        ]);
        let Some(target) = analyse(&image) else {
            panic!();
        };
        assert_eq!(target.loading_command, "run\"MENU\n");
    }

    #[test]
    fn hidden_files_lose_to_visible_ones() {
        let image = disk_with_files(&[("SYSTEM", "SYS", true), ("HELLO", "BAS", false)]);
        let Some(target) = analyse(&image) else {
            panic!();
        };
        assert_eq!(target.loading_command, "run\"HELLO\n");
    }

    #[test]
    fn boot_sector_chooses_cpm() {
        let mut image = disk_with_files(&[("GAME", "BAS", false)]);
        // Overwrite the first sector with something code-like.
        for (index, byte) in image[..SECTOR_SIZE].iter_mut().enumerate() {
            *byte = (0x31 + index as u8) | 0x80;
        }
        let Some(target) = analyse(&image) else {
            panic!();
        };
        assert_eq!(target.loading_command, "|cpm\n");
    }

    #[test]
    fn empty_catalogue_yields_nothing() {
        let image = vec![0xE5u8; 180 * 1024];
        assert!(analyse(&image).is_none());
    }
}
