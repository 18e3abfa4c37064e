pub mod elevation;
pub mod entry;
pub mod materialize;

/// Length of the packed Unix security descriptor: mode, uid, gid (little endian u32s)
pub const UNIX_DESCRIPTOR_LEN: usize = 12;

/// Namespace alternate streams are stored under as extended attributes
pub const STREAM_XATTR_PREFIX: &str = "user.";

pub fn pack_descriptor(mode: u32, uid: u32, gid: u32) -> Vec<u8> {
    let mut sd = Vec::with_capacity(UNIX_DESCRIPTOR_LEN);
    sd.extend_from_slice(&mode.to_le_bytes());
    sd.extend_from_slice(&uid.to_le_bytes());
    sd.extend_from_slice(&gid.to_le_bytes());
    sd
}

/// Returns (mode, uid, gid) or None for descriptors not produced on Unix.
pub fn unpack_descriptor(sd: &[u8]) -> Option<(u32, u32, u32)> {
    if sd.len() != UNIX_DESCRIPTOR_LEN {
        return None;
    }
    let word = |i: usize| u32::from_le_bytes([sd[i], sd[i + 1], sd[i + 2], sd[i + 3]]);
    Some((word(0), word(4), word(8)))
}
