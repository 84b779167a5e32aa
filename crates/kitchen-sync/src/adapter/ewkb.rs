//! Geometry value conversion.
//!
//! The canonical row representation of a spatial value is a 4-byte
//! little-endian SRID followed by standard WKB. PostGIS returns EWKB (which
//! embeds the SRID behind a flag bit in the geometry type word); MySQL's
//! native storage is already SRID-then-WKB, so it passes through untouched.

use crate::error::{Result, SyncError};

use super::{hex_decode, hex_encode};

/// EWKB geometry-type flag indicating an embedded SRID.
const EWKB_SRID_FLAG: u32 = 0x2000_0000;

fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let word = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if little_endian {
        u32::from_le_bytes(word)
    } else {
        u32::from_be_bytes(word)
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32, little_endian: bool) {
    if little_endian {
        out.extend_from_slice(&value.to_le_bytes());
    } else {
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Convert PostGIS EWKB hex output into the canonical SRID-prefixed form.
pub fn ewkb_hex_to_canonical(hex: &[u8]) -> Result<Vec<u8>> {
    let bytes =
        hex_decode(hex).ok_or_else(|| SyncError::wire("geometry value is not valid hex"))?;
    if bytes.len() < 5 {
        return Err(SyncError::wire("geometry value is too short"));
    }
    let little_endian = match bytes[0] {
        0 => false,
        1 => true,
        other => {
            return Err(SyncError::wire(format!(
                "geometry value has unknown byte order {other}"
            )))
        }
    };
    let geometry_type = read_u32(&bytes[1..5], little_endian);
    let (srid, body_start) = if geometry_type & EWKB_SRID_FLAG != 0 {
        if bytes.len() < 9 {
            return Err(SyncError::wire("geometry value is missing its SRID"));
        }
        (read_u32(&bytes[5..9], little_endian), 9)
    } else {
        (0, 5)
    };

    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&srid.to_le_bytes());
    out.push(bytes[0]);
    write_u32(&mut out, geometry_type & !EWKB_SRID_FLAG, little_endian);
    out.extend_from_slice(&bytes[body_start..]);
    Ok(out)
}

/// Split a canonical spatial value into its SRID and WKB body.
pub fn split_canonical(value: &[u8]) -> Result<(u32, &[u8])> {
    if value.len() < 4 {
        return Err(SyncError::wire("spatial value is missing its SRID prefix"));
    }
    let srid = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    Ok((srid, &value[4..]))
}

/// Hex-encode a WKB body for embedding in SQL text.
pub fn wkb_hex(wkb: &[u8]) -> String {
    hex_encode(wkb)
}
