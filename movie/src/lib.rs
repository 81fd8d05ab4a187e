pub mod header;
pub mod tags;

pub use header::{Header, Rect};
pub use tags::{Frame, Tag};

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MovieError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad signature: expected FWS or CWS, got {0:02X?}")]
    BadSignature([u8; 3]),

    #[error("declared file length {declared} does not match actual length {actual}")]
    LengthMismatch { declared: u32, actual: u64 },

    #[error("zlib body failed to inflate: {0}")]
    BadCompression(String),

    #[error("truncated {context} at offset {offset}")]
    Truncated {
        context: &'static str,
        offset: usize,
    },
}

pub type Result<T> = std::result::Result<T, MovieError>;

/// A parsed SWF movie: the fixed header plus the flat tag stream.
#[derive(Debug)]
pub struct Movie {
    pub header: Header,
    pub tags: Vec<Tag>,
}

impl Movie {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Movie> {
        let bytes = std::fs::read(path)?;
        Movie::read(&bytes)
    }

    /// Parses a complete movie from memory, inflating CWS bodies first.
    pub fn read(bytes: &[u8]) -> Result<Movie> {
        if bytes.len() < 8 {
            return Err(MovieError::Truncated {
                context: "file header",
                offset: bytes.len(),
            });
        }
        let signature = [bytes[0], bytes[1], bytes[2]];
        let compressed = match &signature {
            b"FWS" => false,
            b"CWS" => true,
            _ => return Err(MovieError::BadSignature(signature)),
        };
        let version = bytes[3];
        let declared = (&bytes[4..8]).read_u32::<LittleEndian>()?;

        let body;
        if compressed {
            let mut decoder = flate2::read::ZlibDecoder::new(&bytes[8..]);
            let mut inflated = Vec::new();
            decoder
                .read_to_end(&mut inflated)
                .map_err(|e| MovieError::BadCompression(e.to_string()))?;
            log::debug!("inflated CWS body: {} bytes", inflated.len());
            body = inflated;
        } else {
            body = bytes[8..].to_vec();
        }

        let actual = 8 + body.len() as u64;
        if u64::from(declared) != actual {
            return Err(MovieError::LengthMismatch { declared, actual });
        }

        let (header, used) = Header::parse(version, &body)?;
        let tags = tags::parse(&body[used..])?;
        log::info!(
            "movie v{}: {} frames declared, {} tags",
            version,
            header.frame_count,
            tags.len()
        );
        Ok(Movie {
            header,
            tags,
        })
    }

    /// Groups the tag stream into frames at `ShowFrame` boundaries.
    /// A trailing run of tags without a closing `ShowFrame` still forms a frame.
    pub fn frames(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut current = Frame::default();
        for tag in &self.tags {
            match tag {
                Tag::DoAction(code) => current.scripts.push(code.clone()),
                Tag::FrameLabel(label) => current.label = Some(label.clone()),
                Tag::ShowFrame => {
                    frames.push(std::mem::take(&mut current));
                }
                Tag::End => break,
                _ => (),
            }
        }
        if !current.scripts.is_empty() || current.label.is_some() {
            frames.push(current);
        }
        frames
    }
}
