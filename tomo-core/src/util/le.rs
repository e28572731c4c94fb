use std::io::{self, Write};

#[inline]
fn le64(x: &[u8]) -> [u8; 8] {
    let mut b = [0u8; 8];
    b.copy_from_slice(x);
    b
}

/// Decode a flat little-endian f64 stream. Length must be a multiple of 8.
pub fn read_f64s(buf: &[u8]) -> io::Result<Vec<f64>> {
    if buf.len() % 8 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("f64 stream length {} is not a multiple of 8", buf.len()),
        ));
    }
    Ok(buf
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(le64(c)))
        .collect())
}

pub fn read_f32s(buf: &[u8]) -> io::Result<Vec<f32>> {
    if buf.len() % 4 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("f32 stream length {} is not a multiple of 4", buf.len()),
        ));
    }
    Ok(buf
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn read_u16s(buf: &[u8]) -> io::Result<Vec<u16>> {
    if buf.len() % 2 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("u16 stream length {} is odd", buf.len()),
        ));
    }
    Ok(buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

pub fn write_f64s(mut w: impl Write, values: &[f64]) -> io::Result<()> {
    for v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

pub fn write_f32s(mut w: impl Write, values: &[f32]) -> io::Result<()> {
    for v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

pub fn write_u16s(mut w: impl Write, values: &[u16]) -> io::Result<()> {
    for v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}
