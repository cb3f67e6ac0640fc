//! Uevent wire formats
//!
//! The kernel broadcasts
//!
//! ```text
//! <action>@<devpath>\0KEY=VALUE\0KEY=VALUE\0...
//! ```
//!
//! udev re-broadcasts processed events behind a fixed header, see
//! [`UEvent::encode_udev`].
use crate::{
    device::Device,
    error::{Error, Result},
};
use std::str;

/// Start of every udev message
const UDEV_PREFIX: &[u8; 8] = b"libudev\0";

/// Sent in network byte order
const UDEV_MAGIC: u32 = 0xfeed_cafe;

/// Size of the udev message header
///
/// `prefix[8]`, then the `u32` fields magic, header size, properties
/// offset, properties length, subsystem hash, devtype hash, and the tag
/// bloom filter split into high and low halves.
const UDEV_HEADER_LEN: usize = 40;

/// One uevent, as its `KEY=VALUE` properties
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UEvent {
    properties: Vec<(String, String)>,
}

// Constructors
impl UEvent {
    pub fn new<I, K, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Event describing `dev`
    ///
    /// `ACTION` and `SEQNUM` are added from the device if its properties
    /// lack them.
    pub fn from_device(dev: &Device) -> Self {
        let mut properties: Vec<(String, String)> = dev
            .properties()
            .iter()
            .filter_map(|e| Some((e.name().to_owned(), e.value()?.to_owned())))
            .collect();
        let has = |p: &[(String, String)], key: &str| p.iter().any(|(k, _)| k == key);
        if let Some(action) = dev.action() {
            if !has(&properties, "ACTION") {
                properties.insert(0, ("ACTION".into(), action.as_str().into()));
            }
        }
        if let Some(seqnum) = dev.seqnum() {
            if !has(&properties, "SEQNUM") {
                properties.push(("SEQNUM".into(), seqnum.to_string()));
            }
        }
        Self { properties }
    }

    /// Decode either framing
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if `buf` is neither a kernel nor a udev message
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.starts_with(UDEV_PREFIX) {
            Self::decode_udev(buf)
        } else {
            Self::decode_kernel(buf)
        }
    }
}

// Attributes
impl UEvent {
    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn into_properties(self) -> Vec<(String, String)> {
        self.properties
    }
}

// Operations
impl UEvent {
    /// Encode in the kernel framing
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if `ACTION` or `DEVPATH` is missing
    pub fn encode_kernel(&self) -> Result<Vec<u8>> {
        let action = self
            .get("ACTION")
            .ok_or_else(|| Error::Malformed("missing ACTION".into()))?;
        let devpath = self
            .get("DEVPATH")
            .ok_or_else(|| Error::Malformed("missing DEVPATH".into()))?;
        let mut buf = format!("{action}@{devpath}\0").into_bytes();
        self.write_properties(&mut buf);
        Ok(buf)
    }

    /// Encode in the udev framing
    ///
    /// The header carries hashes of `SUBSYSTEM` and `DEVTYPE` and a bloom
    /// filter of `TAGS`, so receivers can filter in the kernel.
    pub fn encode_udev(&self) -> Vec<u8> {
        let mut props = Vec::new();
        self.write_properties(&mut props);

        let hash = |key| self.get(key).map_or(0, string_hash32);
        let bloom = self.get("TAGS").map_or(0, |tags| {
            tags.split(':')
                .filter(|t| !t.is_empty())
                .fold(0u64, |b, t| b | string_bloom64(t))
        });

        let mut buf = Vec::with_capacity(UDEV_HEADER_LEN + props.len());
        buf.extend_from_slice(UDEV_PREFIX);
        buf.extend_from_slice(&UDEV_MAGIC.to_be_bytes());
        buf.extend_from_slice(&(UDEV_HEADER_LEN as u32).to_ne_bytes());
        buf.extend_from_slice(&(UDEV_HEADER_LEN as u32).to_ne_bytes());
        buf.extend_from_slice(&(props.len() as u32).to_ne_bytes());
        buf.extend_from_slice(&hash("SUBSYSTEM").to_be_bytes());
        buf.extend_from_slice(&hash("DEVTYPE").to_be_bytes());
        buf.extend_from_slice(&((bloom >> 32) as u32).to_be_bytes());
        buf.extend_from_slice(&(bloom as u32).to_be_bytes());
        buf.extend_from_slice(&props);
        buf
    }
}

// Private
impl UEvent {
    fn write_properties(&self, buf: &mut Vec<u8>) {
        for (k, v) in &self.properties {
            buf.extend_from_slice(k.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(v.as_bytes());
            buf.push(0);
        }
    }

    fn decode_kernel(buf: &[u8]) -> Result<Self> {
        let mut fields = buf.split(|b| *b == 0);
        let header = fields
            .next()
            .and_then(|h| str::from_utf8(h).ok())
            .ok_or_else(|| Error::Malformed("missing kernel header".into()))?;
        let (action, devpath) = header
            .split_once('@')
            .ok_or_else(|| Error::Malformed(format!("bad kernel header `{header}`")))?;
        if action.is_empty() || !devpath.starts_with('/') {
            return Err(Error::Malformed(format!("bad kernel header `{header}`")));
        }

        let mut ev = Self::parse_properties(fields)?;
        // The kernel always sends both, but don't rely on it
        if ev.get("ACTION").is_none() {
            ev.properties.insert(0, ("ACTION".into(), action.into()));
        }
        if ev.get("DEVPATH").is_none() {
            ev.properties.insert(1, ("DEVPATH".into(), devpath.into()));
        }
        Ok(ev)
    }

    fn decode_udev(buf: &[u8]) -> Result<Self> {
        let header = buf
            .get(..UDEV_HEADER_LEN)
            .ok_or_else(|| Error::Malformed("short udev header".into()))?;
        let field = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&header[8 + i * 4..12 + i * 4]);
            b
        };
        let magic = u32::from_be_bytes(field(0));
        if magic != UDEV_MAGIC {
            return Err(Error::Malformed(format!("bad udev magic {magic:#x}")));
        }
        let header_size = u32::from_ne_bytes(field(1)) as usize;
        let off = u32::from_ne_bytes(field(2)) as usize;
        let len = u32::from_ne_bytes(field(3)) as usize;
        if header_size < UDEV_HEADER_LEN || off < header_size {
            return Err(Error::Malformed("bad udev header size".into()));
        }
        let props = off
            .checked_add(len)
            .and_then(|end| buf.get(off..end))
            .ok_or_else(|| Error::Malformed("udev properties out of bounds".into()))?;
        Self::parse_properties(props.split(|b| *b == 0))
    }

    fn parse_properties<'a, I>(fields: I) -> Result<Self>
    where
        I: Iterator<Item = &'a [u8]>,
    {
        let mut properties = Vec::new();
        for field in fields.filter(|f| !f.is_empty()) {
            let field = str::from_utf8(field)
                .map_err(|e| Error::Malformed(format!("property is not utf-8: {e}")))?;
            if let Some((k, v)) = field.split_once('=') {
                properties.push((k.to_owned(), v.to_owned()));
            }
        }
        Ok(Self { properties })
    }
}

/// MurmurHash2, seed 0, as udev hashes filter keys
fn string_hash32(s: &str) -> u32 {
    const M: u32 = 0x5bd1_e995;
    let data = s.as_bytes();
    let mut h = data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for c in &mut chunks {
        let mut k = u32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> 24;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, b) in tail.iter().enumerate() {
            h ^= (*b as u32) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Four bits of a 64 bit bloom filter
fn string_bloom64(s: &str) -> u64 {
    let hash = string_hash32(s);
    (0..4).fold(0, |bits, i| bits | 1u64 << ((hash >> (6 * i)) & 63))
}
