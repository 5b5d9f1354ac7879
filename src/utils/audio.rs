use std::io::{Read, Write};

/// Merges encoded audio streams via simple binary concatenation.
/// Suitable for MP3 or other frame-based formats.
pub fn merge_binary<R: Read, W: Write>(inputs: &mut [R], output: &mut W) -> std::io::Result<u64> {
    let mut written = 0;
    for input in inputs.iter_mut() {
        written += std::io::copy(input, output)?;
    }
    Ok(written)
}

/// In-memory variant of [`merge_binary`].
pub fn merge_encoded_parts(parts: &[Vec<u8>]) -> std::io::Result<Vec<u8>> {
    let mut readers: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    let mut out = Vec::with_capacity(parts.iter().map(Vec::len).sum());
    merge_binary(&mut readers, &mut out)?;
    Ok(out)
}
