//! C1 — HashKit: streaming digests, midhash256 content identity, and the
//! BitTorrent v2 (BEP 52) info-hash.

use std::path::Path;

use digest::Digest as _;
use sha1::Sha1;
use sha2::Sha256;
use sha3::{Sha3_256, Sha3_384};

use crate::bytes_source::ByteSource;
use crate::digest::{Algorithm, Digest, SHA256_MULTIHASH_CODE};
use crate::error::{CatalogError, Result};

/// 16 KiB — BEP 52's fixed block size for the merkle leaf layer.
const BLOCK_SIZE: u64 = 16 * 1024;
/// 1 MiB — the midhash256 sample window.
const SAMPLE_SIZE: u64 = 1024 * 1024;
/// BEP 52 requires `ceil(size / piece_length) < 2048`.
const MAX_PIECES: u64 = 2048;

/// An incremental streaming hasher for one of the simple (non-composite)
/// algorithms. `finalize` consumes it, matching the RustCrypto `Digest`
/// trait's own ownership shape.
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha3_256(Sha3_256),
    Sha3_384(Sha3_384),
    Md5(md5::Md5),
    Crc32(crc32fast::Hasher),
}

impl Hasher {
    pub fn new(algo: Algorithm) -> Result<Self> {
        Ok(match algo {
            Algorithm::Sha1 => Hasher::Sha1(Sha1::default()),
            Algorithm::Sha256 => Hasher::Sha256(Sha256::default()),
            Algorithm::Sha3_256 => Hasher::Sha3_256(Sha3_256::default()),
            Algorithm::Sha3_384 => Hasher::Sha3_384(Sha3_384::default()),
            Algorithm::Md5 => Hasher::Md5(md5::Md5::default()),
            Algorithm::Crc32 => Hasher::Crc32(crc32fast::Hasher::new()),
            other @ (Algorithm::Midhash256 | Algorithm::Btihv2) => {
                return Err(CatalogError::UnsupportedAlgorithm(format!(
                    "{other} is a composite algorithm, not a streaming `Hasher` — use \
                     `midhash256`/`btihv2` directly"
                )))
            }
        })
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Sha1(h) => digest::Digest::update(h, bytes),
            Hasher::Sha256(h) => digest::Digest::update(h, bytes),
            Hasher::Sha3_256(h) => digest::Digest::update(h, bytes),
            Hasher::Sha3_384(h) => digest::Digest::update(h, bytes),
            Hasher::Md5(h) => digest::Digest::update(h, bytes),
            Hasher::Crc32(h) => h.update(bytes),
        }
    }

    pub fn finalize(self) -> Digest {
        match self {
            Hasher::Sha1(h) => Digest::new(Algorithm::Sha1, h.finalize().to_vec()),
            Hasher::Sha256(h) => Digest::new(Algorithm::Sha256, h.finalize().to_vec()),
            Hasher::Sha3_256(h) => Digest::new(Algorithm::Sha3_256, h.finalize().to_vec()),
            Hasher::Sha3_384(h) => Digest::new(Algorithm::Sha3_384, h.finalize().to_vec()),
            Hasher::Md5(h) => Digest::new(Algorithm::Md5, h.finalize().to_vec()),
            Hasher::Crc32(h) => Digest::new(Algorithm::Crc32, h.finalize().to_be_bytes().to_vec()),
        }
    }
}

/// Construct a CIDv1 string from an arbitrary content multicodec and
/// pre-computed bytes (does not hash `bytes` — it's assumed to already be a
/// digest). The multihash is tagged with the sha2-256 function code; `codec`
/// only sets the CID's outer content-type field.
pub fn cid_encode(codec: u64, bytes: &[u8]) -> Result<String> {
    let mh = cid::multihash::Multihash::<64>::wrap(SHA256_MULTIHASH_CODE, bytes)
        .map_err(|e| CatalogError::UnsupportedAlgorithm(e.to_string()))?;
    Ok(cid::Cid::new_v1(codec, mh).to_string())
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut h = Sha256::default();
    digest::Digest::update(&mut h, bytes);
    digest::Digest::finalize(h).into()
}

/// C1 — midhash256: `SHA-256(size_u64_BE || middle_sample)`.
///
/// `middle_sample` is the whole file when `size <= 1 MiB`, otherwise
/// exactly 1 MiB starting at `floor((size - 1 MiB) / 2)`. Reads only the
/// size and that one byte range — no full scan.
pub async fn midhash256(source: &dyn ByteSource, path: &Path) -> Result<Digest> {
    let size = source.size(path).await?;
    let sample = if size <= SAMPLE_SIZE {
        source.read_range(path, 0, size).await?
    } else {
        let offset = (size - SAMPLE_SIZE) / 2;
        source.read_range(path, offset, SAMPLE_SIZE).await?
    };

    let mut input = Vec::with_capacity(8 + sample.len());
    input.extend_from_slice(&size.to_be_bytes());
    input.extend_from_slice(&sample);

    Ok(Digest::new(Algorithm::Midhash256, sha256(&input).to_vec()))
}

/// C1 — BTIHv2 (BEP 52 subset, single-file torrent). Partitions the file
/// into 16 KiB blocks, SHA-256s each, pads to a power of two, and reduces
/// pairwise up to a single "pieces root". The info-hash is
/// `SHA-256(bencode(info_dict))`.
pub async fn btihv2(source: &dyn ByteSource, path: &Path) -> Result<Digest> {
    let size = source.size(path).await?;
    let piece_length = choose_piece_length(size);

    let mut leaves = Vec::new();
    if size == 0 {
        leaves.push(sha256(&[]));
    } else {
        let mut offset = 0u64;
        while offset < size {
            let len = BLOCK_SIZE.min(size - offset);
            let block = source.read_range(path, offset, len).await?;
            leaves.push(sha256(&block));
            offset += len;
        }
    }

    let root = merkle_root(leaves);

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();

    let info = bencode_info_dict(&name, size, piece_length, &root);
    let bencoded =
        serde_bencode::to_bytes(&info).map_err(|e| CatalogError::TransientIo(e.to_string()))?;

    Ok(Digest::new(Algorithm::Btihv2, sha256(&bencoded).to_vec()))
}

/// `piece_length = 16 KiB * 2^n`, `n` the smallest integer such that
/// `ceil(size / piece_length) < 2048`. `16 KiB` when `size == 0`.
fn choose_piece_length(size: u64) -> u64 {
    if size == 0 {
        return BLOCK_SIZE;
    }
    let mut piece_length = BLOCK_SIZE;
    loop {
        let pieces = size.div_ceil(piece_length);
        if pieces < MAX_PIECES {
            return piece_length;
        }
        piece_length *= 2;
    }
}

/// Pad the leaf list to the next power of two with zero-32-byte leaves,
/// then pairwise-hash adjacent leaves until one root remains.
fn merkle_root(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    let target = leaves.len().next_power_of_two();
    leaves.resize(target, [0u8; 32]);

    while leaves.len() > 1 {
        leaves = leaves
            .chunks(2)
            .map(|pair| {
                let mut buf = Vec::with_capacity(64);
                buf.extend_from_slice(&pair[0]);
                buf.extend_from_slice(&pair[1]);
                sha256(&buf)
            })
            .collect();
    }
    leaves[0]
}

#[derive(serde::Serialize)]
// serde_bencode serializes struct fields in declaration order, so the
// fields here are declared in the dictionary's canonical (sorted-key) order
// directly: "length" < "meta version" < "name" < "piece length" < "pieces
// root".
struct InfoDict {
    length: u64,
    #[serde(rename = "meta version")]
    meta_version: u64,
    name: serde_bytes::ByteBuf,
    #[serde(rename = "piece length")]
    piece_length: u64,
    #[serde(rename = "pieces root")]
    pieces_root: serde_bytes::ByteBuf,
}

fn bencode_info_dict(name: &str, length: u64, piece_length: u64, root: &[u8; 32]) -> InfoDict {
    InfoDict {
        length,
        meta_version: 2,
        name: serde_bytes::ByteBuf::from(name.as_bytes().to_vec()),
        piece_length,
        pieces_root: serde_bytes::ByteBuf::from(root.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes_source::LocalByteSource;
    use std::io::Write;

    async fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        std::path::PathBuf::from(name)
    }

    #[tokio::test]
    async fn midhash256_is_deterministic_and_ignores_unsampled_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = vec![0u8; 3 * 1024 * 1024];
        content[0] = 0xff; // outside the sampled middle window
        let rel = write_file(&dir, "a.bin", &content).await;
        let src = LocalByteSource::new(dir.path());

        let d1 = midhash256(&src, &rel).await.unwrap();

        content[0] = 0x00; // flip the byte outside the window
        write_file(&dir, "a.bin", &content).await;
        let d2 = midhash256(&src, &rel).await.unwrap();

        assert_eq!(d1, d2);
        assert_eq!(d1.bytes.len(), 32);
    }

    #[tokio::test]
    async fn midhash256_changes_when_sampled_bytes_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = vec![0u8; 3 * 1024 * 1024];
        let rel = write_file(&dir, "a.bin", &content).await;
        let src = LocalByteSource::new(dir.path());
        let d1 = midhash256(&src, &rel).await.unwrap();

        let mid = content.len() / 2;
        content[mid] = 0xaa;
        write_file(&dir, "a.bin", &content).await;
        let d2 = midhash256(&src, &rel).await.unwrap();

        assert_ne!(d1, d2);
    }

    #[tokio::test]
    async fn btihv2_of_two_zero_blocks_matches_bep52_example() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![0u8; 32 * 1024];
        let rel = write_file(&dir, "z.bin", &content).await;
        let src = LocalByteSource::new(dir.path());

        let leaf = sha256(&vec![0u8; 16 * 1024]);
        let mut buf = Vec::new();
        buf.extend_from_slice(&leaf);
        buf.extend_from_slice(&leaf);
        let expected_root = sha256(&buf);

        let info =
            bencode_info_dict("z.bin", 32 * 1024, choose_piece_length(32 * 1024), &expected_root);
        let bencoded = serde_bencode::to_bytes(&info).unwrap();
        let expected = sha256(&bencoded);

        let got = btihv2(&src, &rel).await.unwrap();
        assert_eq!(got.bytes, expected.to_vec());
        let cid = got.to_cid().unwrap();
        assert!(cid.starts_with('b'));
    }

    #[tokio::test]
    async fn btihv2_empty_file_has_well_defined_root() {
        let dir = tempfile::tempdir().unwrap();
        let rel = write_file(&dir, "empty.bin", &[]).await;
        let src = LocalByteSource::new(dir.path());
        let got = btihv2(&src, &rel).await.unwrap();
        assert_eq!(got.bytes.len(), 32);
    }

    #[tokio::test]
    async fn btihv2_single_byte_flip_changes_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = vec![0u8; 40 * 1024];
        let rel = write_file(&dir, "f.bin", &content).await;
        let src = LocalByteSource::new(dir.path());
        let d1 = btihv2(&src, &rel).await.unwrap();

        content[20_000] ^= 0x01;
        write_file(&dir, "f.bin", &content).await;
        let d2 = btihv2(&src, &rel).await.unwrap();

        assert_ne!(d1, d2);
    }

    #[test]
    fn piece_length_doubles_until_under_2048_pieces() {
        assert_eq!(choose_piece_length(0), BLOCK_SIZE);
        assert_eq!(choose_piece_length(1), BLOCK_SIZE);
        // Exactly at the boundary: 2048 * 16KiB pieces would be disallowed.
        let big = BLOCK_SIZE * 2048;
        assert_eq!(choose_piece_length(big), BLOCK_SIZE * 2);
    }

    #[test]
    fn hasher_rejects_composite_algorithms() {
        assert!(Hasher::new(Algorithm::Midhash256).is_err());
        assert!(Hasher::new(Algorithm::Btihv2).is_err());
    }

    #[test]
    fn crc32_streaming_matches_oneshot() {
        let mut h = Hasher::new(Algorithm::Crc32).unwrap();
        h.update(b"hello ");
        h.update(b"world");
        let streamed = h.finalize();

        let mut oneshot = crc32fast::Hasher::new();
        oneshot.update(b"hello world");
        assert_eq!(streamed.bytes, oneshot.finalize().to_be_bytes().to_vec());
    }
}
