//! Rockchip CRC32.
//!
//! MSB-first CRC32 with polynomial `0x04C10DB7`, zero initial value and no
//! final xor. Note the polynomial differs from IEEE 802.3 (`0x04C11DB7`)
//! in a single bit.

/// Generator polynomial.
pub const POLYNOMIAL: u32 = 0x04C1_0DB7;

/// Lookup table, one entry per leading byte.
pub const TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Continue a Rockchip CRC32 over `data`, starting from `crc`.
pub fn rkcrc32_update(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ TABLE[usize::from((crc >> 24) as u8 ^ byte)]
    })
}

/// Rockchip CRC32 of `data`.
pub fn rkcrc32(data: &[u8]) -> u32 {
    rkcrc32_update(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_seed_entries() {
        assert_eq!(TABLE[0], 0);
        assert_eq!(TABLE[1], POLYNOMIAL);
        assert_eq!(TABLE[2], 0x0982_1B6E);
        assert_eq!(TABLE[255], 0xB1F8_80B4);
    }

    #[test]
    fn test_check_value() {
        assert_eq!(rkcrc32(b"123456789"), 0x889A_9615);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(rkcrc32(&[]), 0);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data = b"CMDLINE:mtdparts=rk29xxnand:0x00002000@0x00004000(boot)";
        let (a, b) = data.split_at(17);
        assert_eq!(rkcrc32_update(rkcrc32(a), b), rkcrc32(data));
    }
}
