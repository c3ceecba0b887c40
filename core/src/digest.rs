//! [`Digest`]: a tagged hash value with two equivalent wire forms — raw hex
//! and a CIDv1 string — per §3's "both forms must round-trip" requirement.
//!
//! midhash256 and BTIHv2 always wire-encode as CIDv1 (custom multicodecs
//! `0x1000` / `0x10B7`, pinned by §4.1). The other algorithms get an
//! internal multicodec assignment so the same CID machinery covers them
//! too; callers that only care about the canonical catalog contract use
//! [`Digest::to_hex`].

use std::fmt;
use std::str::FromStr;

use cid::multihash::Multihash;
use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

/// Multihash function code for sha2-256. Every digest is CID-wrapped with
/// this code as its multihash tag, regardless of which algorithm actually
/// produced the bytes — the content type lives in the CID's outer
/// multicodec, not in the multihash function code.
pub(crate) const SHA256_MULTIHASH_CODE: u64 = 0x12;

/// The digest algorithms HashKit knows how to produce (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha3_256,
    Sha3_384,
    Md5,
    Crc32,
    Midhash256,
    Btihv2,
}

impl Algorithm {
    /// Multicodec used to wrap this algorithm's output as a CIDv1.
    /// `Midhash256` (`0x1000`) and `Btihv2` (`0x10b7`) are pinned by §4.1;
    /// the rest are an internal convention for the "CID-wrapped form" §3
    /// allows for other algorithms.
    pub const fn multicodec(self) -> u64 {
        match self {
            Algorithm::Sha1 => 0x11,
            Algorithm::Sha256 => 0x12,
            Algorithm::Sha3_256 => 0x16,
            Algorithm::Sha3_384 => 0x15,
            Algorithm::Md5 => 0xd5,
            Algorithm::Crc32 => 0x0132,
            Algorithm::Midhash256 => 0x1000,
            Algorithm::Btihv2 => 0x10b7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha3_256 => "sha3-256",
            Algorithm::Sha3_384 => "sha3-384",
            Algorithm::Md5 => "md5",
            Algorithm::Crc32 => "crc32",
            Algorithm::Midhash256 => "midhash256",
            Algorithm::Btihv2 => "btihv2",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha3-256" => Ok(Algorithm::Sha3_256),
            "sha3-384" => Ok(Algorithm::Sha3_384),
            "md5" => Ok(Algorithm::Md5),
            "crc32" => Ok(Algorithm::Crc32),
            "midhash256" => Ok(Algorithm::Midhash256),
            "btihv2" => Ok(Algorithm::Btihv2),
            other => Err(CatalogError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Algorithm {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        Algorithm::parse(&name).map_err(serde::de::Error::custom)
    }
}

/// A complete digest: which algorithm produced it, and the raw bytes.
/// Serializes as `{"algo": "sha256", "hex": "..."}` — self-contained, since
/// a serde map deserializer doesn't hand the key to the value visitor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algo: Algorithm,
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct DigestWire {
    algo: Algorithm,
    hex: String,
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        DigestWire { algo: self.algo, hex: self.to_hex() }.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let wire = DigestWire::deserialize(d)?;
        let bytes = hex_decode(&wire.hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex digest: {}", wire.hex)))?;
        Ok(Digest::new(wire.algo, bytes))
    }
}

impl Digest {
    pub fn new(algo: Algorithm, bytes: Vec<u8>) -> Self {
        Self { algo, bytes }
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.bytes)
    }

    /// Wrap the raw digest bytes as a CIDv1 string (base32, multibase
    /// prefix `b`). This does not re-hash the bytes — the multihash tags
    /// them with the sha2-256 function code (§4.1) while the CID's outer
    /// multicodec carries the content type (`algo.multicodec()`); the two
    /// fields are distinct and must not be conflated.
    pub fn to_cid(&self) -> Result<String> {
        let mh = Multihash::<64>::wrap(SHA256_MULTIHASH_CODE, &self.bytes).map_err(|e| {
            CatalogError::UnsupportedAlgorithm(format!("{}: digest too long ({e})", self.algo))
        })?;
        let cid = Cid::new_v1(self.algo.multicodec(), mh);
        Ok(cid.to_string())
    }

    /// Parse either wire form back into a `Digest`, given the expected
    /// algorithm (hex strings carry no algorithm tag of their own).
    pub fn parse(algo: Algorithm, s: &str) -> Result<Self> {
        if let Ok(cid) = Cid::from_str(s) {
            if cid.codec() != algo.multicodec() {
                return Err(CatalogError::InvalidIndex {
                    path: Default::default(),
                    reason: format!(
                        "CID codec 0x{:x} does not match expected algorithm {algo}",
                        cid.codec()
                    ),
                });
            }
            return Ok(Self::new(algo, cid.hash().digest().to_vec()));
        }
        let bytes = hex_decode(s).ok_or_else(|| CatalogError::InvalidIndex {
            path: Default::default(),
            reason: format!("'{s}' is neither a valid CID nor hex digest"),
        })?;
        Ok(Self::new(algo, bytes))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let d = Digest::new(Algorithm::Sha256, vec![0xde, 0xad, 0xbe, 0xef]);
        let hex = d.to_hex();
        assert_eq!(hex, "deadbeef");
        let back = Digest::parse(Algorithm::Sha256, &hex).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn cid_round_trips() {
        let d = Digest::new(Algorithm::Midhash256, vec![0x11; 32]);
        let cid = d.to_cid().unwrap();
        assert!(cid.starts_with('b'));
        let back = Digest::parse(Algorithm::Midhash256, &cid).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn cid_algorithm_mismatch_is_rejected() {
        let d = Digest::new(Algorithm::Btihv2, vec![0x22; 32]);
        let cid = d.to_cid().unwrap();
        assert!(Digest::parse(Algorithm::Midhash256, &cid).is_err());
    }
}
