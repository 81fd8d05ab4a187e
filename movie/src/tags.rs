use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::WINDOWS_1252;

use crate::{MovieError, Result};

pub const TAG_END: u16 = 0;
pub const TAG_SHOW_FRAME: u16 = 1;
pub const TAG_SET_BACKGROUND_COLOR: u16 = 9;
pub const TAG_DO_ACTION: u16 = 12;
pub const TAG_FRAME_LABEL: u16 = 43;

#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    DoAction(Vec<u8>),
    ShowFrame,
    SetBackgroundColor(u8, u8, u8),
    FrameLabel(String),
    End,
    Unknown { code: u16, body: Vec<u8> },
}

/// One frame's worth of tags, grouped by `Movie::frames`.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub label: Option<String>,
    pub scripts: Vec<Vec<u8>>,
}

/// Splits the tag stream. Headers are u16 LE with the code in the upper 10
/// bits; a 6-bit length of 0x3F means a u32 long length follows.
pub fn parse(mut data: &[u8]) -> Result<Vec<Tag>> {
    let total = data.len();
    let mut tags = Vec::new();
    loop {
        let offset = total - data.len();
        if data.is_empty() {
            // Stream ended without an End tag; tolerated.
            log::debug!("tag stream ended without End tag");
            return Ok(tags);
        }
        if data.len() < 2 {
            return Err(MovieError::Truncated {
                context: "tag header",
                offset,
            });
        }
        let header = data.read_u16::<LittleEndian>()?;
        let code = header >> 6;
        let mut length = usize::from(header & 0x3F);
        if length == 0x3F {
            if data.len() < 4 {
                return Err(MovieError::Truncated {
                    context: "long tag length",
                    offset,
                });
            }
            length = data.read_u32::<LittleEndian>()? as usize;
        }
        if data.len() < length {
            return Err(MovieError::Truncated {
                context: "tag body",
                offset,
            });
        }
        let (body, rest) = data.split_at(length);
        data = rest;

        match code {
            TAG_END => {
                tags.push(Tag::End);
                return Ok(tags);
            }
            TAG_SHOW_FRAME => tags.push(Tag::ShowFrame),
            TAG_DO_ACTION => tags.push(Tag::DoAction(body.to_vec())),
            TAG_SET_BACKGROUND_COLOR => {
                if body.len() < 3 {
                    return Err(MovieError::Truncated {
                        context: "background color",
                        offset,
                    });
                }
                tags.push(Tag::SetBackgroundColor(body[0], body[1], body[2]));
            }
            TAG_FRAME_LABEL => {
                let text = &body[..body.iter().position(|&b| b == 0).unwrap_or(body.len())];
                // Valid UTF-8 wins whatever the file version claims, anything
                // else decodes as WINDOWS_1252.
                let label = match std::str::from_utf8(text) {
                    Ok(label) => label.to_owned(),
                    Err(_) => WINDOWS_1252.decode(text).0.into_owned(),
                };
                tags.push(Tag::FrameLabel(label));
            }
            _ => {
                log::debug!("skipping unknown tag {} ({} bytes)", code, length);
                tags.push(Tag::Unknown {
                    code,
                    body: body.to_vec(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Movie;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn tag_header(code: u16, length: usize) -> Vec<u8> {
        let mut out = Vec::new();
        if length >= 0x3F {
            out.write_u16::<LittleEndian>((code << 6) | 0x3F).unwrap();
            out.write_u32::<LittleEndian>(length as u32).unwrap();
        } else {
            out.write_u16::<LittleEndian>((code << 6) | length as u16)
                .unwrap();
        }
        out
    }

    fn test_movie_bytes(compressed: bool) -> Vec<u8> {
        let mut body = vec![0x78, 0x00, 0x03, 0xE8, 0x00, 0x00, 0x0F, 0xA0, 0x00];
        body.extend_from_slice(&[0x00, 0x18]); // 24 fps
        body.extend_from_slice(&[0x01, 0x00]); // 1 frame

        let script = vec![0x26, 0x00]; // Trace, End
        body.extend(tag_header(TAG_DO_ACTION, script.len()));
        body.extend_from_slice(&script);
        body.extend(tag_header(TAG_SHOW_FRAME, 0));
        body.extend(tag_header(TAG_END, 0));

        let mut file = Vec::new();
        file.extend_from_slice(if compressed { b"CWS" } else { b"FWS" });
        file.push(4);
        file.write_u32::<LittleEndian>(8 + body.len() as u32).unwrap();
        if compressed {
            let mut encoder =
                flate2::write::ZlibEncoder::new(&mut file, flate2::Compression::default());
            encoder.write_all(&body).unwrap();
            encoder.finish().unwrap();
        } else {
            file.extend_from_slice(&body);
        }
        file
    }

    #[test]
    fn parses_uncompressed_movie() {
        let movie = Movie::read(&test_movie_bytes(false)).unwrap();
        assert_eq!(movie.header.version, 4);
        assert_eq!(movie.header.frame_count, 1);
        assert_eq!(
            movie.tags,
            vec![
                Tag::DoAction(vec![0x26, 0x00]),
                Tag::ShowFrame,
                Tag::End,
            ]
        );
    }

    #[test]
    fn parses_zlib_compressed_movie() {
        let movie = Movie::read(&test_movie_bytes(true)).unwrap();
        assert_eq!(movie.tags.len(), 3);
        assert_eq!(movie.frames().len(), 1);
    }

    #[test]
    fn rejects_wrong_declared_length() {
        let mut bytes = test_movie_bytes(false);
        bytes[4] = bytes[4].wrapping_add(1);
        assert!(matches!(
            Movie::read(&bytes),
            Err(MovieError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unknown_signature() {
        let err = Movie::read(b"XWS\x04\x08\x00\x00\x00").unwrap_err();
        assert!(matches!(err, MovieError::BadSignature(_)));
    }

    #[test]
    fn groups_trailing_actions_into_a_frame() {
        let tags = vec![
            Tag::DoAction(vec![0x00]),
            Tag::ShowFrame,
            Tag::DoAction(vec![0x00]),
        ];
        let movie = Movie {
            header: crate::Header {
                version: 4,
                stage: crate::Rect {
                    x_min: 0,
                    x_max: 8000,
                    y_min: 0,
                    y_max: 8000,
                },
                frame_rate: 24.0,
                frame_count: 2,
            },
            tags,
        };
        let frames = movie.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].scripts.len(), 1);
        assert_eq!(frames[1].scripts.len(), 1);
    }

    #[test]
    fn long_tag_headers_round_trip() {
        let body = vec![0u8; 100];
        let mut stream = tag_header(TAG_DO_ACTION, body.len());
        stream.extend_from_slice(&body);
        stream.extend(tag_header(TAG_END, 0));
        let tags = parse(&stream).unwrap();
        assert_eq!(tags[0], Tag::DoAction(body));
    }

    #[test]
    fn frame_labels_strip_the_terminator() {
        let mut stream = tag_header(TAG_FRAME_LABEL, 6);
        stream.extend_from_slice(b"intro\x00");
        stream.extend(tag_header(TAG_END, 0));
        let tags = parse(&stream).unwrap();
        assert_eq!(tags[0], Tag::FrameLabel("intro".to_string()));
    }

    #[test]
    fn non_utf8_frame_labels_fall_back_to_windows_1252() {
        let mut stream = tag_header(TAG_FRAME_LABEL, 5);
        stream.extend_from_slice(&[b'f', b'i', b'n', 0xE9, 0x00]);
        stream.extend(tag_header(TAG_END, 0));
        let tags = parse(&stream).unwrap();
        assert_eq!(tags[0], Tag::FrameLabel("finé".to_string()));
    }
}
