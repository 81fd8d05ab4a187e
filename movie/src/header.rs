use byteorder::{LittleEndian, ReadBytesExt};

use crate::{MovieError, Result};

/// Stage bounds in twips (1/20 pixel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl Rect {
    pub fn width_px(&self) -> f32 {
        (self.x_max - self.x_min) as f32 / 20.0
    }

    pub fn height_px(&self) -> f32 {
        (self.y_max - self.y_min) as f32 / 20.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u8,
    pub stage: Rect,
    /// Frames per second, stored as 8.8 fixed point in the file.
    pub frame_rate: f32,
    pub frame_count: u16,
}

impl Header {
    /// Parses the variable-size part of the header (RECT, frame rate, frame
    /// count) from the start of the movie body. Returns the header and the
    /// number of body bytes consumed.
    pub fn parse(version: u8, body: &[u8]) -> Result<(Header, usize)> {
        let mut bits = BitReader::new(body);
        let nbits = bits.read_ub(5)?;
        let x_min = bits.read_sb(nbits)?;
        let x_max = bits.read_sb(nbits)?;
        let y_min = bits.read_sb(nbits)?;
        let y_max = bits.read_sb(nbits)?;
        let rect_len = bits.bytes_consumed();

        let mut rest = &body[rect_len..];
        if rest.len() < 4 {
            return Err(MovieError::Truncated {
                context: "frame rate",
                offset: rect_len,
            });
        }
        let raw_rate = rest.read_u16::<LittleEndian>()?;
        let frame_count = rest.read_u16::<LittleEndian>()?;

        Ok((
            Header {
                version,
                stage: Rect {
                    x_min,
                    x_max,
                    y_min,
                    y_max,
                },
                frame_rate: raw_rate as f32 / 256.0,
                frame_count,
            },
            rect_len + 4,
        ))
    }
}

/// MSB-first bit reader for the RECT field.
struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    fn read_ub(&mut self, count: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self
                .data
                .get(self.bit_pos / 8)
                .ok_or(MovieError::Truncated {
                    context: "stage rect",
                    offset: self.bit_pos / 8,
                })?;
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | u32::from(bit);
            self.bit_pos += 1;
        }
        Ok(value)
    }

    fn read_sb(&mut self, count: u32) -> Result<i32> {
        let raw = self.read_ub(count)?;
        if count == 0 {
            return Ok(0);
        }
        // Sign-extend from `count` bits.
        let shift = 32 - count;
        Ok(((raw << shift) as i32) >> shift)
    }

    fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }
}
