//! Audio tag reading and writing
//!
//! Tags are read from any format lofty understands and written back as an
//! ID3v2.4 tag prepended to the converted MP3 bytes.

use id3::{TagLike, Version};
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use vrb_common::{Error, Result};

/// Suffix appended to album and title of every processed track
pub const INSTRUMENTAL_SUFFIX: &str = " (Instrumental)";

/// Tags read from a source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track: Option<u32>,
}

impl TrackTags {
    /// True when none of artist, album or title is set
    pub fn is_empty(&self) -> bool {
        self.artist.is_none() && self.album.is_none() && self.title.is_none()
    }

    /// Artist, falling back to album artist
    pub fn effective_artist(&self) -> Option<&str> {
        self.artist.as_deref().or(self.album_artist.as_deref())
    }

    /// Append [`INSTRUMENTAL_SUFFIX`] to album and title where present
    pub fn mark_instrumental(&mut self) {
        for field in [&mut self.album, &mut self.title] {
            if let Some(value) = field.as_mut() {
                value.push_str(INSTRUMENTAL_SUFFIX);
            }
        }
    }

    /// Tag set written to the converted file
    pub fn tag_set(&self) -> TagSet {
        TagSet {
            track: self.track.map(|n| n.to_string()),
            album: self.album.clone(),
            artist: self.effective_artist().map(str::to_string),
            title: self.title.clone(),
        }
    }
}

/// Fields written into the output file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    pub track: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Reads tags from a file; absence of tags is not an error
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Option<TrackTags>;
}

/// Writes a tag set into an in-memory audio file
pub trait TagWriter: Send + Sync {
    fn write(&self, tags: &TagSet, audio: &[u8]) -> Result<Vec<u8>>;
}

/// [`TagReader`] backed by lofty
#[derive(Debug, Clone, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read(&self, path: &Path) -> Option<TrackTags> {
        let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
            Ok(file) => file,
            Err(e) => {
                debug!(file = %path.display(), "No readable tags: {}", e);
                return None;
            }
        };

        // Primary tag preferred, falls back to whatever the file carries
        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag())?;

        let tags = TrackTags {
            artist: tag.artist().map(|s| s.to_string()),
            album_artist: tag.get_string(&ItemKey::AlbumArtist).map(str::to_string),
            album: tag.album().map(|s| s.to_string()),
            title: tag.title().map(|s| s.to_string()),
            track: tag.track(),
        };

        if tags.is_empty() {
            debug!(file = %path.display(), "Tag present but has no artist/album/title");
            return None;
        }

        debug!(
            file = %path.display(),
            artist = ?tags.artist,
            album = ?tags.album,
            title = ?tags.title,
            "Read tags"
        );
        Some(tags)
    }
}

/// [`TagWriter`] producing an ID3v2.4 tag
///
/// Any ID3v2 tags already at the start of the audio are replaced.
#[derive(Debug, Clone, Default)]
pub struct Id3TagWriter;

impl TagWriter for Id3TagWriter {
    fn write(&self, tags: &TagSet, audio: &[u8]) -> Result<Vec<u8>> {
        let mut tag = id3::Tag::new();
        if let Some(track) = &tags.track {
            tag.set_text("TRCK", track.clone());
        }
        if let Some(album) = &tags.album {
            tag.set_album(album.clone());
        }
        if let Some(artist) = &tags.artist {
            tag.set_artist(artist.clone());
        }
        if let Some(title) = &tags.title {
            tag.set_title(title.clone());
        }

        let body = strip_id3v2(audio);
        let mut out = Vec::with_capacity(body.len() + 1024);
        tag.write_to(&mut out, Version::Id3v24)
            .map_err(|e| Error::Tag(format!("ID3 encode failed: {}", e)))?;
        out.extend_from_slice(body);
        Ok(out)
    }
}

/// Skip every ID3v2 tag at the start of `bytes`
///
/// A header announcing more bytes than are available is left in place.
pub fn strip_id3v2(mut bytes: &[u8]) -> &[u8] {
    const HEADER_LEN: usize = 10;
    const FOOTER_FLAG: u8 = 0x10;

    while bytes.len() >= HEADER_LEN && &bytes[..3] == b"ID3" {
        let size = bytes[6..10]
            .iter()
            .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7f) as usize);
        let footer = if bytes[5] & FOOTER_FLAG != 0 { HEADER_LEN } else { 0 };
        let total = HEADER_LEN + size + footer;
        if total > bytes.len() {
            break;
        }
        bytes = &bytes[total..];
    }
    bytes
}
