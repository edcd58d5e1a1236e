//! `vectors.f16.bin`: row-major, little-endian float16 matrix (§3, §4.2 step 7). One row per
//! chunk, in the same order as `docs.jsonl`; row count must equal `manifest.counts.vectors`.

use anyhow::{bail, Result};
use half::f16;

pub fn encode(rows: &[Vec<f32>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows.iter().map(|r| r.len() * 2).sum());
    for row in rows {
        for &v in row {
            out.extend_from_slice(&f16::from_f32(v).to_le_bytes());
        }
    }
    out
}

pub fn decode(bytes: &[u8], dim: usize) -> Result<Vec<Vec<f32>>> {
    if dim == 0 {
        bail!("vector dim must be nonzero");
    }
    let row_bytes = dim * 2;
    if bytes.len() % row_bytes != 0 {
        bail!("vectors.f16.bin length {} is not a multiple of row size {row_bytes}", bytes.len());
    }
    let mut rows = Vec::with_capacity(bytes.len() / row_bytes);
    for chunk in bytes.chunks_exact(row_bytes) {
        let mut row = Vec::with_capacity(dim);
        for pair in chunk.chunks_exact(2) {
            row.push(f16::from_le_bytes([pair[0], pair[1]]).to_f32());
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_f16_within_tolerance() {
        let rows = vec![vec![0.1, 0.2, -0.3], vec![1.0, -1.0, 0.0]];
        let bytes = encode(&rows);
        let back = decode(&bytes, 3).unwrap();
        assert_eq!(back.len(), 2);
        for (a, b) in rows.iter().zip(back.iter()) {
            for (x, y) in a.iter().zip(b.iter()) {
                assert!((x - y).abs() < 1e-3, "{x} vs {y}");
            }
        }
    }

    #[test]
    fn rejects_length_not_a_multiple_of_row_size() {
        let bytes = vec![0u8; 5];
        assert!(decode(&bytes, 3).is_err());
    }

    #[test]
    fn byte_length_matches_rows_times_dim_times_two() {
        let rows = vec![vec![0.0; 4]; 3];
        let bytes = encode(&rows);
        assert_eq!(bytes.len(), 3 * 4 * 2);
    }
}
