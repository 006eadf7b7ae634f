//! Test Helper Utilities
//!
//! Shell-script stand-ins for the separation model and the converter, laid
//! out like a real toolkit in a temporary directory. Unix only.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vrb_batch::ResolverSettings;
use vrb_common::config::{ToolConfig, ToolOverrides};

/// Separator: prints progress on stderr and writes both stems for the input
/// given as the last argument
pub const SEPARATOR_SCRIPT: &str = r#"
for last in "$@"; do :; done
name=$(basename "$last")
stem="${name%.*}"
echo "Loading model weights"
printf ' 10%%|#         |\r 42%%|####      |\r100%%|##########|\n' >&2
mkdir -p separated
printf 'RIFFinstrumental' > "separated/${stem}_MGM-v5-KAROKEE-32000-BETA1_Instruments.wav"
printf 'RIFFvocals' > "separated/${stem}_MGM-v5-KAROKEE-32000-BETA1_Vocals.wav"
"#;

/// Converter: three progress ticks, then copies `-infile` to `-outfile`
pub const CONVERTER_SCRIPT: &str = r#"#!/bin/sh
echo "dBpoweramp CoreConverter"
echo "* 1"
echo "* 2"
echo "* 3"
cp "$2" "$4"
"#;

/// Converter that ticks but never produces an output file
pub const BROKEN_CONVERTER_SCRIPT: &str = r#"#!/bin/sh
echo "* 1"
echo "encoder crashed" >&2
exit 1
"#;

/// Temporary toolkit root plus a music folder
pub struct FakeToolkit {
    pub dir: TempDir,
    pub config: ToolConfig,
}

impl FakeToolkit {
    /// Toolkit with working separator and converter
    pub fn new() -> Self {
        Self::with_converter(CONVERTER_SCRIPT)
    }

    /// Toolkit whose converter runs `converter_script`
    pub fn with_converter(converter_script: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let toolkit = dir.path().join("toolkit");
        std::fs::create_dir_all(&toolkit).unwrap();
        std::fs::create_dir_all(dir.path().join("music")).unwrap();

        // Run through sh so the entrypoint needs no exec bit
        std::fs::write(toolkit.join("inference.py"), SEPARATOR_SCRIPT).unwrap();

        let converter = dir.path().join("convert.sh");
        write_executable(&converter, converter_script);

        let config = ToolConfig::resolve(
            &ToolOverrides {
                python_path: Some(PathBuf::from("sh")),
                vocal_remover_path: Some(toolkit),
                converter_path: Some(converter),
                debug: false,
            },
            None,
        )
        .unwrap();

        Self { dir, config }
    }

    pub fn music_dir(&self) -> PathBuf {
        self.dir.path().join("music")
    }

    pub fn separated_root(&self) -> PathBuf {
        self.config.separated_root()
    }

    pub fn settings(&self) -> ResolverSettings {
        ResolverSettings {
            separated_root: self.config.separated_root(),
            model_tag: self.config.separation.model_tag(),
        }
    }

    /// Create a file in the music folder
    pub fn add_input(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.music_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn write_executable(path: &Path, content: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, content).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}
