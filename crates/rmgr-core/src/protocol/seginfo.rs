//! Self-describing binary layout for segment info.
//!
//! ```text
//! +--------------------------- 40-byte head ----------------------------+
//! | size u32 | id i32 | port u16 | addr count u16 | master standby alive |
//! | addr attr off | addr content off | host off | host len               |
//! | grm host off/len | grm rack off/len | failed dir off/len | reserved  |
//! +----------------------------------------------------------------------+
//! | address table: (offset u16, attr u16) * count, 64-bit aligned        |
//! | address entries: len u32, bytes, NUL, 64-bit aligned each            |
//! | hostname NUL | grm host NUL | grm rack NUL | failed dirs NUL         |
//! +----------------------------------------------------------------------+
//! ```
//!
//! All offsets are relative to the start of the segment info block.

use super::{MessageBuilder, MessageReader, WireError};
use crate::respool::SegInfo;

pub const SEGINFO_HEAD_SIZE: usize = 40;

/// Address attribute bit: the entry holds a dotted address string.
pub const ADDR_ATTR_STRING: u16 = 0x0001;

const OFF_SIZE: usize = 0;
const OFF_ADDR_ATTR: usize = 16;
const OFF_ADDR_CONTENT: usize = 18;
const OFF_HOST: usize = 20;
const OFF_HOST_LEN: usize = 22;
const OFF_GRM_HOST: usize = 24;
const OFF_GRM_HOST_LEN: usize = 26;
const OFF_GRM_RACK: usize = 28;
const OFF_GRM_RACK_LEN: usize = 30;
const OFF_FAILED_DIR: usize = 32;
const OFF_FAILED_DIR_LEN: usize = 34;

/// Builds the binary block for a [`SegInfo`]: head first with zeroed
/// offsets, then each variable section appended and its offset patched in.
pub struct SegInfoBuilder<'a> {
    info: &'a SegInfo,
    b: MessageBuilder,
}

impl<'a> SegInfoBuilder<'a> {
    pub fn new(info: &'a SegInfo) -> Self {
        Self {
            info,
            b: MessageBuilder::with_capacity(256),
        }
    }

    fn offset16(&self) -> Result<u16, WireError> {
        u16::try_from(self.b.len())
            .map_err(|_| WireError::Invalid("segment info exceeds 64KiB".to_string()))
    }

    fn len16(s: &str) -> Result<u16, WireError> {
        u16::try_from(s.len())
            .map_err(|_| WireError::Invalid(format!("string too long: {} bytes", s.len())))
    }

    fn append_str(&mut self, off_at: usize, len_at: usize, s: &str) -> Result<(), WireError> {
        let off = self.offset16()?;
        let len = Self::len16(s)?;
        self.b.put_cstr(s).pad64();
        self.b.patch_u16(off_at, off);
        self.b.patch_u16(len_at, len);
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>, WireError> {
        let info = self.info;
        let count = u16::try_from(info.addresses.len())
            .map_err(|_| WireError::Invalid("too many host addresses".to_string()))?;

        self.b
            .put_u32(0)
            .put_i32(info.id)
            .put_u16(info.port)
            .put_u16(count)
            .put_bool(info.master)
            .put_bool(info.standby)
            .put_bool(info.alive)
            .put_u8(0);
        // Offset/length slots, patched below.
        for _ in 0..12 {
            self.b.put_u16(0);
        }
        self.b.put_u32(0);
        debug_assert_eq!(self.b.len(), SEGINFO_HEAD_SIZE);

        let table = self.b.len();
        self.b.patch_u16(OFF_ADDR_ATTR, self.offset16()?);
        for _ in &info.addresses {
            self.b.put_u16(0).put_u16(ADDR_ATTR_STRING);
        }
        self.b.pad64();

        self.b.patch_u16(OFF_ADDR_CONTENT, self.offset16()?);
        for (i, addr) in info.addresses.iter().enumerate() {
            let off = self.offset16()?;
            self.b.patch_u16(table + i * 4, off);
            self.b.put_u32(addr.len() as u32).put_cstr(addr).pad64();
        }

        self.append_str(OFF_HOST, OFF_HOST_LEN, &info.hostname)?;
        if let Some(h) = info.grm_hostname.as_deref() {
            self.append_str(OFF_GRM_HOST, OFF_GRM_HOST_LEN, h)?;
        }
        if let Some(r) = info.grm_rackname.as_deref() {
            self.append_str(OFF_GRM_RACK, OFF_GRM_RACK_LEN, r)?;
        }
        if let Some(d) = info.failed_tmp_dirs.as_deref() {
            self.append_str(OFF_FAILED_DIR, OFF_FAILED_DIR_LEN, d)?;
        }

        let size = self.b.len() as u32;
        self.b.patch_u32(OFF_SIZE, size);
        Ok(self.b.into_vec())
    }
}

/// Read a segment info block. Returns the info and the number of bytes the
/// block occupies.
pub fn decode_seginfo(raw: &[u8]) -> Result<(SegInfo, usize), WireError> {
    let mut r = MessageReader::new(raw);
    let size = r.u32()? as usize;
    if size < SEGINFO_HEAD_SIZE || size > raw.len() {
        return Err(WireError::BadOffset {
            offset: 0,
            len: size,
            size: raw.len(),
        });
    }
    let region = &raw[..size];

    let id = r.i32()?;
    let port = r.u16()?;
    let count = r.u16()? as usize;
    let master = r.bool()?;
    let standby = r.bool()?;
    let alive = r.bool()?;
    r.skip(1)?;
    let addr_attr = r.u16()? as usize;
    let _addr_content = r.u16()?;
    let host_off = r.u16()? as usize;
    let host_len = r.u16()? as usize;
    let grm_host_off = r.u16()? as usize;
    let grm_host_len = r.u16()? as usize;
    let grm_rack_off = r.u16()? as usize;
    let grm_rack_len = r.u16()? as usize;
    let failed_off = r.u16()? as usize;
    let failed_len = r.u16()? as usize;

    let mut addresses = Vec::with_capacity(count);
    for i in 0..count {
        let slot = addr_attr + i * 4;
        let mut t = MessageReader::new(slice(region, slot, 4)?);
        let off = t.u16()? as usize;
        let attr = t.u16()?;
        if attr & ADDR_ATTR_STRING == 0 {
            return Err(WireError::Invalid(format!(
                "address {i} has unsupported attribute {attr:#x}"
            )));
        }
        let mut a = MessageReader::new(slice(region, off, 4)?);
        let len = a.u32()? as usize;
        addresses.push(str_at(region, off + 4, len)?);
    }

    let hostname = str_at(region, host_off, host_len)?;
    let optional = |off: usize, len: usize| -> Result<Option<String>, WireError> {
        if len == 0 {
            Ok(None)
        } else {
            str_at(region, off, len).map(Some)
        }
    };

    let info = SegInfo {
        id,
        port,
        hostname,
        addresses,
        master,
        standby,
        alive,
        grm_hostname: optional(grm_host_off, grm_host_len)?,
        grm_rackname: optional(grm_rack_off, grm_rack_len)?,
        failed_tmp_dirs: optional(failed_off, failed_len)?,
    };
    Ok((info, size))
}

fn slice(region: &[u8], off: usize, len: usize) -> Result<&[u8], WireError> {
    region.get(off..off + len).ok_or(WireError::BadOffset {
        offset: off,
        len,
        size: region.len(),
    })
}

fn str_at(region: &[u8], off: usize, len: usize) -> Result<String, WireError> {
    let raw = slice(region, off, len)?;
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| WireError::BadUtf8(off))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SegInfo {
        SegInfo {
            id: 3,
            port: 5437,
            hostname: "sdw3".to_string(),
            addresses: vec!["10.0.0.3".to_string(), "127.0.0.1".to_string()],
            master: false,
            standby: false,
            alive: true,
            grm_hostname: None,
            grm_rackname: Some("/rack1".to_string()),
            failed_tmp_dirs: None,
        }
    }

    #[test]
    fn block_is_aligned_and_decodes() {
        let raw = SegInfoBuilder::new(&sample()).finish().unwrap();
        assert_eq!(raw.len() % 8, 0);
        let (info, size) = decode_seginfo(&raw).unwrap();
        assert_eq!(size, raw.len());
        assert_eq!(info, sample());
    }

    #[test]
    fn address_table_points_into_content() {
        let raw = SegInfoBuilder::new(&sample()).finish().unwrap();
        let attr_off = u16::from_le_bytes([raw[OFF_ADDR_ATTR], raw[OFF_ADDR_ATTR + 1]]) as usize;
        let content_off =
            u16::from_le_bytes([raw[OFF_ADDR_CONTENT], raw[OFF_ADDR_CONTENT + 1]]) as usize;
        assert_eq!(attr_off, SEGINFO_HEAD_SIZE);
        // Two 4-byte slots pad to one 8-byte word.
        assert_eq!(content_off, SEGINFO_HEAD_SIZE + 8);
        let first = u16::from_le_bytes([raw[attr_off], raw[attr_off + 1]]) as usize;
        assert_eq!(first, content_off);
    }

    #[test]
    fn bad_size_is_rejected() {
        let mut raw = SegInfoBuilder::new(&sample()).finish().unwrap();
        raw[0..4].copy_from_slice(&9999u32.to_le_bytes());
        assert!(matches!(
            decode_seginfo(&raw),
            Err(WireError::BadOffset { .. })
        ));
    }

    #[test]
    fn hostname_offset_out_of_range_is_rejected() {
        let mut raw = SegInfoBuilder::new(&sample()).finish().unwrap();
        raw[OFF_HOST..OFF_HOST + 2].copy_from_slice(&4000u16.to_le_bytes());
        assert!(decode_seginfo(&raw).is_err());
    }
}
