//! Little-endian scalar access over byte slices.

/// Read an `i32` at `offset`, or `None` if the slice is too short.
pub fn get_i32_le(buf: &[u8], offset: usize) -> Option<i32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(i32::from_le_bytes(bytes.try_into().ok()?))
}

/// Read a `u16` at `offset`, or `None` if the slice is too short.
pub fn get_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

/// Read a `u64` at `offset`, or `None` if the slice is too short.
pub fn get_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Write an `i32` at `offset`. The slice must hold at least `offset + 4` bytes.
pub fn put_i32_le(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Write a `u16` at `offset`. The slice must hold at least `offset + 2` bytes.
pub fn put_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write a `u64` at `offset`. The slice must hold at least `offset + 8` bytes.
pub fn put_u64_le(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
