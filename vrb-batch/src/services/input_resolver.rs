//! Input resolver
//!
//! Turns the `--input` path into job descriptors: enumerates candidate audio
//! files, reads their tags and derives every path a job will touch.
//!
//! Derivation ([`derive_job`]) is pure; identical input path, tags and
//! settings always produce an identical descriptor.

use crate::services::tag_io::{TagReader, TrackTags, INSTRUMENTAL_SUFFIX};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use vrb_common::{Error, Result};

/// Extensions accepted as input, compared case-insensitively
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac"];

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Everything one pipeline job needs to know about its file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    /// Absolute source path
    pub input: PathBuf,
    /// Instrumental stem written by the separation model
    pub intermediate_instrumental_path: PathBuf,
    /// Vocal stem written by the separation model
    pub intermediate_vocals_path: PathBuf,
    /// Tagged MP3 produced by the converter
    pub final_output_path: PathBuf,
    /// `"<Artist> - <Album>"` grouping folder, when both are known
    pub output_directory: Option<String>,
    /// File name of `final_output_path`
    pub file_name: String,
    /// Short name for the progress display
    pub display_name: String,
    /// Source tags, album and title already carrying the instrumental suffix
    pub metadata: Option<TrackTags>,
}

/// Settings that shape derived paths
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Root for intermediates and outputs (`<toolkit>/separated`)
    pub separated_root: PathBuf,
    /// Model name the separator inserts into its output file names
    pub model_tag: String,
}

/// Enumerates input files and derives their job descriptors
pub struct InputResolver {
    settings: ResolverSettings,
    tag_reader: Arc<dyn TagReader>,
}

impl InputResolver {
    pub fn new(settings: ResolverSettings, tag_reader: Arc<dyn TagReader>) -> Self {
        Self {
            settings,
            tag_reader,
        }
    }

    /// Resolve `path` (file or directory) into job descriptors
    ///
    /// A file yields itself if it has an audio extension, otherwise nothing.
    /// A directory yields its direct audio children (no recursion) in
    /// enumeration order.
    pub async fn parse(&self, path: &Path) -> Result<Vec<JobDescriptor>> {
        let path = std::path::absolute(path)?;
        let stats = match tokio::fs::metadata(&path).await {
            Ok(stats) => stats,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let candidates = if stats.is_file() {
            if is_audio_file(&path) {
                vec![path.clone()]
            } else {
                debug!("Input is not an audio file: {}", path.display());
                Vec::new()
            }
        } else {
            list_audio_files(&path).await?
        };

        let mut jobs = Vec::with_capacity(candidates.len());
        let mut claimed = HashSet::new();
        for candidate in candidates {
            let tags = self.read_tags(&candidate).await;
            let job = derive_job(&candidate, tags, &self.settings);
            if claim_paths(&mut claimed, &job) {
                jobs.push(job);
            } else {
                warn!(
                    "Skipping {}: its output paths are already used by another input",
                    candidate.display()
                );
            }
        }

        debug!("Resolved {} job(s) from {}", jobs.len(), path.display());
        Ok(jobs)
    }

    async fn read_tags(&self, path: &Path) -> Option<TrackTags> {
        let reader = Arc::clone(&self.tag_reader);
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || reader.read(&owned)).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Tag reading task failed for {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Reserve every path `job` writes; false if any is already taken
///
/// The separator names its stems after the input stem only, so `song.mp3`
/// and `song.wav` would overwrite and delete each other's files.
fn claim_paths(claimed: &mut HashSet<PathBuf>, job: &JobDescriptor) -> bool {
    let paths = [
        &job.intermediate_instrumental_path,
        &job.intermediate_vocals_path,
        &job.final_output_path,
    ];
    if paths.iter().any(|p| claimed.contains(*p)) {
        return false;
    }
    claimed.extend(paths.into_iter().cloned());
    true
}

async fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_file = match entry.file_type().await {
            Ok(ft) if ft.is_symlink() => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Ok(ft) => ft.is_file(),
            Err(e) => {
                warn!("Error accessing entry {}: {}", path.display(), e);
                false
            }
        };
        if is_file && is_audio_file(&path) {
            files.push(path);
        }
    }

    Ok(files)
}

/// Check the extension against [`AUDIO_EXTENSIONS`]
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// Derive the descriptor for one input file
///
/// When `tags` is present the album and title get the instrumental suffix
/// here, exactly once.
pub fn derive_job(
    input: &Path,
    tags: Option<TrackTags>,
    settings: &ResolverSettings,
) -> JobDescriptor {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let intermediate = |kind: &str| {
        settings
            .separated_root
            .join(format!("{}_{}_{}.wav", stem, settings.model_tag, kind))
    };
    let intermediate_instrumental_path = intermediate("Instruments");
    let intermediate_vocals_path = intermediate("Vocals");

    let output_directory = tags.as_ref().and_then(|t| match (&t.artist, &t.album) {
        (Some(artist), Some(album)) => Some(format!(
            "{} - {}",
            sanitize_component(artist),
            sanitize_component(album)
        )),
        _ => None,
    });

    let file_name = match &tags {
        Some(t) => tagged_file_name(t, &stem),
        None => format!("{}.mp3", stem),
    };

    let final_output_path = match &output_directory {
        Some(dir) => settings.separated_root.join(dir).join(&file_name),
        None => settings.separated_root.join(&file_name),
    };

    let metadata = tags.map(|mut t| {
        t.mark_instrumental();
        t
    });

    let display_name = metadata
        .as_ref()
        .and_then(|t| t.title.clone())
        .unwrap_or_else(|| file_name.clone());

    JobDescriptor {
        input: input.to_path_buf(),
        intermediate_instrumental_path,
        intermediate_vocals_path,
        final_output_path,
        output_directory,
        file_name,
        display_name,
        metadata,
    }
}

/// `<track>. <artist> - <album> - <title> (Instrumental).mp3`
fn tagged_file_name(tags: &TrackTags, stem: &str) -> String {
    let artist = tags.effective_artist().unwrap_or(UNKNOWN_ARTIST);
    let album = tags.album.as_deref().unwrap_or(UNKNOWN_ALBUM);
    let title = tags.title.as_deref().unwrap_or(stem);

    let body = format!(
        "{} - {} - {}{}.mp3",
        sanitize_component(artist),
        sanitize_component(album),
        sanitize_component(title),
        INSTRUMENTAL_SUFFIX
    );

    match tags.track {
        Some(track) => format!("{}. {}", track, body),
        None => body,
    }
}

/// Replace characters that cannot appear in a file name component
fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ResolverSettings {
        ResolverSettings {
            separated_root: PathBuf::from("/toolkit/separated"),
            model_tag: "MGM-v5-KAROKEE-32000-BETA1".to_string(),
        }
    }

    fn abc_tags() -> TrackTags {
        TrackTags {
            artist: Some("A".to_string()),
            album_artist: None,
            album: Some("B".to_string()),
            title: Some("C".to_string()),
            track: Some(1),
        }
    }

    struct NoTags;

    impl TagReader for NoTags {
        fn read(&self, _path: &Path) -> Option<TrackTags> {
            None
        }
    }

    fn resolver(root: &Path) -> InputResolver {
        InputResolver::new(
            ResolverSettings {
                separated_root: root.join("separated"),
                model_tag: "MGM-v5-KAROKEE-32000-BETA1".to_string(),
            },
            Arc::new(NoTags),
        )
    }

    #[tokio::test]
    async fn test_parse_single_audio_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"audio").unwrap();

        let jobs = resolver(dir.path()).parse(&input).await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].input, input);
        assert_eq!(jobs[0].file_name, "song.mp3");
    }

    #[tokio::test]
    async fn test_parse_single_non_audio_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("cover.jpg");
        std::fs::write(&input, b"image").unwrap();

        let jobs = resolver(dir.path()).parse(&input).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_parse_missing_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nowhere");

        let result = resolver(dir.path()).parse(&missing).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_parse_skips_inputs_sharing_a_stem() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["song.mp3", "song.wav", "other.wav"] {
            std::fs::write(dir.path().join(name), b"audio").unwrap();
        }

        let jobs = resolver(dir.path()).parse(dir.path()).await.unwrap();

        assert_eq!(jobs.len(), 2);
        let songs: Vec<_> = jobs.iter().filter(|j| j.file_name == "song.mp3").collect();
        assert_eq!(songs.len(), 1);
        assert!(jobs.iter().any(|j| j.file_name == "other.mp3"));

        let mut claimed = HashSet::new();
        for job in &jobs {
            assert!(claim_paths(&mut claimed, job));
        }
    }

    #[test]
    fn test_claim_paths_rejects_shared_stem() {
        let mut claimed = HashSet::new();
        let mp3 = derive_job(Path::new("/music/song.mp3"), None, &settings());
        let wav = derive_job(Path::new("/music/song.wav"), None, &settings());
        let other = derive_job(Path::new("/music/other.mp3"), None, &settings());

        assert!(claim_paths(&mut claimed, &mp3));
        assert!(!claim_paths(&mut claimed, &wav));
        assert!(claim_paths(&mut claimed, &other));
    }

    #[test]
    fn test_audio_extension_detection() {
        assert!(is_audio_file(Path::new("/x/song.mp3")));
        assert!(is_audio_file(Path::new("/x/SONG.FLAC")));
        assert!(is_audio_file(Path::new("/x/take.Wav")));
        assert!(!is_audio_file(Path::new("/x/cover.jpg")));
        assert!(!is_audio_file(Path::new("/x/mp3")));
    }

    #[test]
    fn test_tagged_file_layout() {
        let job = derive_job(Path::new("/music/song.mp3"), Some(abc_tags()), &settings());

        assert_eq!(
            job.final_output_path,
            PathBuf::from("/toolkit/separated/A - B/1. A - B - C (Instrumental).mp3")
        );
        assert_eq!(job.output_directory.as_deref(), Some("A - B"));
        assert_eq!(job.file_name, "1. A - B - C (Instrumental).mp3");

        let meta = job.metadata.unwrap();
        assert_eq!(meta.album.as_deref(), Some("B (Instrumental)"));
        assert_eq!(meta.title.as_deref(), Some("C (Instrumental)"));
        assert_eq!(job.display_name, "C (Instrumental)");
    }

    #[test]
    fn test_untagged_file_layout() {
        let job = derive_job(Path::new("/music/My Track.flac"), None, &settings());

        assert_eq!(
            job.final_output_path,
            PathBuf::from("/toolkit/separated/My Track.mp3")
        );
        assert!(job.output_directory.is_none());
        assert_eq!(job.display_name, "My Track.mp3");
        assert!(job.metadata.is_none());
    }

    #[test]
    fn test_intermediate_paths() {
        let job = derive_job(Path::new("/music/song.mp3"), None, &settings());

        assert_eq!(
            job.intermediate_instrumental_path,
            PathBuf::from("/toolkit/separated/song_MGM-v5-KAROKEE-32000-BETA1_Instruments.wav")
        );
        assert_eq!(
            job.intermediate_vocals_path,
            PathBuf::from("/toolkit/separated/song_MGM-v5-KAROKEE-32000-BETA1_Vocals.wav")
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_job(Path::new("/music/song.mp3"), Some(abc_tags()), &settings());
        let b = derive_job(Path::new("/music/song.mp3"), Some(abc_tags()), &settings());
        assert_eq!(a, b);
    }

    #[test]
    fn test_partial_tags_fill_gaps() {
        let tags = TrackTags {
            artist: None,
            album_artist: Some("Band".to_string()),
            album: None,
            title: Some("AC/DC cover".to_string()),
            track: None,
        };
        let job = derive_job(Path::new("/music/x.wav"), Some(tags), &settings());

        // No artist+album pair, so no grouping folder
        assert!(job.output_directory.is_none());
        assert_eq!(
            job.file_name,
            "Band - Unknown Album - AC_DC cover (Instrumental).mp3"
        );
    }
}
