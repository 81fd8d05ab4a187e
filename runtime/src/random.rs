use std::time::{SystemTime, UNIX_EPOCH};

const PURE_MAX: i32 = 0x7FFFFFFF;

// Feedback masks for LFSR periods 2^2-1 through 2^32-1; a 31-bit register
// uses entry 29.
const XOR_MASKS: [u32; 31] = [
    0x00000003, 0x00000006, 0x0000000C, 0x00000014, 0x00000030, 0x00000060, 0x000000B8, 0x00000110,
    0x00000240, 0x00000500, 0x00000CA0, 0x00001B00, 0x00003500, 0x00006000, 0x0000B400, 0x00012000,
    0x00020400, 0x00072000, 0x00090000, 0x00140000, 0x00300000, 0x00400000, 0x00D80000, 0x01200000,
    0x03880000, 0x07200000, 0x09000000, 0x14000000, 0x32800000, 0x48000000, 0xA3000000,
];

/// The player's random source, a 31-bit linear feedback shift register with a
/// scrambling hash on top. Identical seeds replay identical sequences.
pub struct Random {
    value: u32,
    xor_mask: u32,
}

impl Random {
    pub fn new(seed: u32) -> Self {
        Self {
            value: seed,
            xor_mask: XOR_MASKS[29],
        }
    }

    pub fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(1);
        Self::new(seed)
    }

    fn step(&mut self) -> i32 {
        if self.value & 1 != 0 {
            self.value = (self.value >> 1) ^ self.xor_mask;
        } else {
            self.value >>= 1;
        }
        self.value as i32
    }

    fn generate(&mut self) -> i32 {
        // A zero register never leaves zero; reseed it like a generator that
        // was never initialized.
        if self.value == 0 {
            *self = Random::from_clock();
        }
        pure_hash(self.step().wrapping_mul(71)) & PURE_MAX
    }

    /// `random(range)`: an integer in `[0, range)`, or 0 when the range is
    /// not positive.
    pub fn next_below(&mut self, range: i32) -> i32 {
        if range <= 0 {
            return 0;
        }
        self.generate() % range
    }
}

fn pure_hash(seed: i32) -> i32 {
    const C1: i32 = 1376312589;
    const C2: i32 = 789221;
    const C3: i32 = 15731;

    let seed = (seed.wrapping_shl(13) ^ seed).wrapping_sub(seed >> 21);
    let result = seed
        .wrapping_mul(seed.wrapping_mul(seed).wrapping_mul(C3).wrapping_add(C2))
        .wrapping_add(C1)
        & PURE_MAX;
    let result = result.wrapping_add(seed);
    (result.wrapping_shl(13) ^ result).wrapping_sub(result >> 21)
}
