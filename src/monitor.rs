//! Solver monitoring persistence.
//!
//! A compact append-only binary record of per-solver convergence summaries,
//! written at checkpoint time and read back on restart to seed iteration
//! budgets. No matrix or vector data is ever persisted.

use crate::error::{FvError, Result};
use std::io::{Read, Write};

const MAGIC: u32 = 0x4656_5348;
const VERSION: u16 = 1;

/// One solver's convergence summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorRecord {
    pub name: String,
    pub n_iter: u64,
    pub last_residual: f64,
    pub rhs_norm: f64,
}

/// Write all records as one little-endian stream.
pub fn write_monitoring<W: Write>(w: &mut W, records: &[MonitorRecord]) -> Result<()> {
    w.write_all(&MAGIC.to_le_bytes())?;
    w.write_all(&VERSION.to_le_bytes())?;
    let n = u32::try_from(records.len())
        .map_err(|_| FvError::Usage("too many monitoring records".into()))?;
    w.write_all(&n.to_le_bytes())?;
    for rec in records {
        let name_len = u16::try_from(rec.name.len()).map_err(|_| {
            FvError::Usage(format!("solver name too long: {} bytes", rec.name.len()))
        })?;
        w.write_all(&name_len.to_le_bytes())?;
        w.write_all(rec.name.as_bytes())?;
        w.write_all(&rec.n_iter.to_le_bytes())?;
        w.write_all(&rec.last_residual.to_le_bytes())?;
        w.write_all(&rec.rhs_norm.to_le_bytes())?;
    }
    Ok(())
}

/// Read a stream produced by [`write_monitoring`]. An unknown version or a
/// bad magic number is a usage error, not a panic.
pub fn read_monitoring<R: Read>(r: &mut R) -> Result<Vec<MonitorRecord>> {
    let magic = u32::from_le_bytes(read_array(r)?);
    if magic != MAGIC {
        return Err(FvError::Format(format!(
            "bad monitoring magic {magic:#010x}"
        )));
    }
    let version = u16::from_le_bytes(read_array(r)?);
    if version != VERSION {
        return Err(FvError::Usage(format!(
            "unsupported monitoring version {version}"
        )));
    }
    let n = u32::from_le_bytes(read_array(r)?) as usize;
    let mut records = Vec::with_capacity(n.min(1 << 16));
    for _ in 0..n {
        let name_len = u16::from_le_bytes(read_array(r)?) as usize;
        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| FvError::Format("solver name is not valid utf-8".into()))?;
        records.push(MonitorRecord {
            name,
            n_iter: u64::from_le_bytes(read_array(r)?),
            last_residual: f64::from_le_bytes(read_array(r)?),
            rhs_norm: f64::from_le_bytes(read_array(r)?),
        });
    }
    Ok(records)
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
