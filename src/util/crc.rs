//! CRC32 checksum utilities.

use crc32fast::Hasher;

/// Compute CRC32 checksum of the given data.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute CRC32 checksum of multiple data slices.
pub fn crc32_multi(slices: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for slice in slices {
        hasher.update(slice);
    }
    hasher.finalize()
}

/// Mask a CRC value for storage.
///
/// This helps avoid problems with CRCs that happen to contain
/// the same bytes as common data patterns.
pub fn mask_crc(crc: u32) -> u32 {
    // Rotate right by 15 bits and add a constant.
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282ead8)
}

/// Unmask a masked CRC value.
pub fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(0xa282ead8);
    (rot >> 17) | (rot << 15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc32_stable() {
        let data = b"hello world";
        let crc = crc32(data);
        assert_ne!(crc, 0);
        assert_eq!(crc32(data), crc);
        assert_ne!(crc32(b"hello"), crc32(b"world"));
    }

    #[test]
    fn test_crc32_multi() {
        assert_eq!(crc32(b"hello world"), crc32_multi(&[b"hello ", b"world"]));
    }

    #[test]
    fn test_mask_unmask() {
        let original = 0x12345678u32;
        let masked = mask_crc(original);

        assert_ne!(masked, original);
        assert_eq!(unmask_crc(masked), original);
    }
}
