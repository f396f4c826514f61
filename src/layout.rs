//! Binary ticket layout.
//!
//! All integers are little-endian:
//!
//! ```text
//! [salt: 8 random bytes]
//! [version: u8]
//! [persistent: u8, 0 or 1]
//! [name][user_data][cookie_path]   LEB128 UTF-16 unit count, then UTF-16LE units
//! [issue_date: i64][expiration: i64]   FILETIME ticks (100ns since 1601-01-01 UTC)
//! ```
//!
//! Parsing is strict. Anything that does not match the layout exactly,
//! including trailing bytes, yields `None`.

use crate::ticket::AuthTicket;
use chrono::{DateTime, Utc};
use rand::Rng;

pub const SALT_LENGTH: usize = 8;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;
const TICKS_PER_SEC: i64 = 10_000_000;

/// Serialize a ticket with a fresh random salt. Returns `None` when a date
/// falls outside the FILETIME range (before 1601 or after year 30828).
pub fn serialize(ticket: &AuthTicket) -> Option<Vec<u8>> {
    let salt: [u8; SALT_LENGTH] = rand::rng().random();
    serialize_with_salt(ticket, salt)
}

pub fn serialize_with_salt(ticket: &AuthTicket, salt: [u8; SALT_LENGTH]) -> Option<Vec<u8>> {
    let issue_date = to_filetime(ticket.issue_date)?;
    let expiration = to_filetime(ticket.expiration)?;

    let mut buf = Vec::with_capacity(
        SALT_LENGTH
            + 2
            + 2 * (ticket.name.len() + ticket.user_data.len() + ticket.cookie_path.len())
            + 3 * 5
            + 16,
    );
    buf.extend_from_slice(&salt);
    buf.push(ticket.version);
    buf.push(u8::from(ticket.is_persistent));
    write_string(&mut buf, &ticket.name);
    write_string(&mut buf, &ticket.user_data);
    write_string(&mut buf, &ticket.cookie_path);
    buf.extend_from_slice(&issue_date.to_le_bytes());
    buf.extend_from_slice(&expiration.to_le_bytes());
    Some(buf)
}

/// Parse a serialized ticket. The salt is discarded.
pub fn parse(data: &[u8]) -> Option<AuthTicket> {
    let mut reader = Reader { data, pos: 0 };

    reader.take(SALT_LENGTH)?;
    let version = reader.u8()?;
    let is_persistent = match reader.u8()? {
        0 => false,
        1 => true,
        _ => return None,
    };
    let name = reader.string()?;
    let user_data = reader.string()?;
    let cookie_path = reader.string()?;
    let issue_date = from_filetime(reader.i64()?)?;
    let expiration = from_filetime(reader.i64()?)?;

    if reader.pos != data.len() {
        return None;
    }

    Some(AuthTicket {
        version,
        name,
        issue_date,
        expiration,
        is_persistent,
        user_data,
        cookie_path,
    })
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    write_varint(buf, units.len() as u32);
    for unit in units {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
}

fn write_varint(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Ticks are truncated to 100ns. `None` outside the non-negative i64 range.
fn to_filetime(dt: DateTime<Utc>) -> Option<i64> {
    let secs = dt.timestamp().checked_add(FILETIME_UNIX_OFFSET_SECS)?;
    if secs < 0 {
        return None;
    }
    secs.checked_mul(TICKS_PER_SEC)?
        .checked_add(i64::from(dt.timestamp_subsec_nanos() / 100))
}

fn from_filetime(ticks: i64) -> Option<DateTime<Utc>> {
    if ticks < 0 {
        return None;
    }
    let secs = ticks / TICKS_PER_SEC - FILETIME_UNIX_OFFSET_SECS;
    let nanos = (ticks % TICKS_PER_SEC) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn i64(&mut self) -> Option<i64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }

    fn varint(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.u8()?;
            let bits = u32::from(byte & 0x7f);
            // The fifth byte may only carry the top four bits
            if shift == 28 && bits > 0x0f {
                return None;
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }

    fn string(&mut self) -> Option<String> {
        let count = self.varint()? as usize;
        let bytes = self.take(count.checked_mul(2)?)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).ok()
    }
}
