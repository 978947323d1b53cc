//! The `%viac%` binary image format
//!
//! Layout:
//! ```text
//! "%viac%"   magic
//! u16        format version (little-endian)
//! i64        compilation timestamp, unix seconds
//! [u8; 32]   sha-256 of the source text
//! [u8; 16]   platform string, NUL-padded
//! [u8; 8]    flags string, NUL-padded
//! u32        code section offset    u32  code section length (bytes)
//! [u8; 4]    header checksum (leading bytes of sha-256 over the header)
//! code       instructions, 7 bytes each
//! data       bincode(constants, globals, protos)
//! [u8; 4]    trailing checksum (leading bytes of sha-256 over code+data)
//! ```

use crate::constant::Constant;
use crate::instruction::{Instruction, INSTRUCTION_BYTES};
use crate::unit::{FuncProto, GlobalSpec, Unit};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use via_common::{ViaError, ViaResult};

pub const IMAGE_MAGIC: &[u8; 6] = b"%viac%";
pub const IMAGE_VERSION: u16 = 1;

const HEADER_LEN: usize = 6 + 2 + 8 + 32 + 16 + 8 + 4 + 4 + 4;
const PLATFORM_LEN: usize = 16;
const FLAGS_LEN: usize = 8;
const CHECKSUM_LEN: usize = 4;

#[derive(Serialize, Deserialize)]
struct DataSection {
    constants: Vec<Constant>,
    globals: Vec<GlobalSpec>,
    protos: Vec<FuncProto>,
}

/// Whether `bytes` begin with the image sentinel.
pub fn is_image(bytes: &[u8]) -> bool {
    bytes.len() >= IMAGE_MAGIC.len() && &bytes[..IMAGE_MAGIC.len()] == IMAGE_MAGIC
}

fn checksum(bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = text.as_bytes();
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Serialize a unit. `source` feeds the source hash; `flags` records the
/// compile options (e.g. `-O1`).
pub fn encode(unit: &Unit, source: &str, flags: &str) -> ViaResult<Vec<u8>> {
    let code: Vec<u8> = unit
        .instructions
        .iter()
        .flat_map(|i| i.encode())
        .collect();
    let data = bincode::serialize(&DataSection {
        constants: unit.constants.clone(),
        globals: unit.globals.clone(),
        protos: unit.protos.clone(),
    })
    .map_err(|e| ViaError::image(format!("data section serialization failed: {}", e)))?;

    let mut out = Vec::with_capacity(HEADER_LEN + code.len() + data.len() + CHECKSUM_LEN);
    out.extend_from_slice(IMAGE_MAGIC);
    out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    out.extend_from_slice(&chrono::Utc::now().timestamp().to_le_bytes());
    out.extend_from_slice(&Sha256::digest(source.as_bytes()));
    out.extend_from_slice(&padded::<PLATFORM_LEN>(&format!(
        "{}-{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )));
    out.extend_from_slice(&padded::<FLAGS_LEN>(flags));
    out.extend_from_slice(&(HEADER_LEN as u32).to_le_bytes());
    out.extend_from_slice(&(code.len() as u32).to_le_bytes());
    let header_sum = checksum(&out);
    out.extend_from_slice(&header_sum);
    debug_assert_eq!(out.len(), HEADER_LEN);

    out.extend_from_slice(&code);
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&[code, data].concat()));
    Ok(out)
}

/// Deserialize and validate an image back into a runnable unit. The dump
/// comments are not stored; the decoded unit carries empty ones.
pub fn decode(bytes: &[u8]) -> ViaResult<Unit> {
    if !is_image(bytes) {
        return Err(ViaError::image("missing %viac% magic"));
    }
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(ViaError::image("truncated header"));
    }

    let version = u16::from_le_bytes([bytes[6], bytes[7]]);
    if version != IMAGE_VERSION {
        return Err(ViaError::image(format!(
            "unsupported format version {} (expected {})",
            version, IMAGE_VERSION
        )));
    }

    let header_sum_at = HEADER_LEN - CHECKSUM_LEN;
    let expected = checksum(&bytes[..header_sum_at]);
    if bytes[header_sum_at..HEADER_LEN] != expected {
        return Err(ViaError::image("header checksum mismatch"));
    }

    let code_off =
        u32::from_le_bytes(bytes[header_sum_at - 8..header_sum_at - 4].try_into().unwrap())
            as usize;
    let code_len =
        u32::from_le_bytes(bytes[header_sum_at - 4..header_sum_at].try_into().unwrap()) as usize;
    if code_off != HEADER_LEN || code_len % INSTRUCTION_BYTES != 0 {
        return Err(ViaError::image("malformed code section geometry"));
    }
    let data_end = bytes.len().saturating_sub(CHECKSUM_LEN);
    if code_off + code_len > data_end {
        return Err(ViaError::image("code section out of bounds"));
    }

    let body = &bytes[code_off..data_end];
    if bytes[data_end..] != checksum(body) {
        return Err(ViaError::image("trailing checksum mismatch"));
    }

    let code = &bytes[code_off..code_off + code_len];
    let instructions = code
        .chunks_exact(INSTRUCTION_BYTES)
        .map(Instruction::decode)
        .collect::<ViaResult<Vec<_>>>()?;

    let data: DataSection = bincode::deserialize(&bytes[code_off + code_len..data_end])
        .map_err(|e| ViaError::image(format!("data section corrupt: {}", e)))?;
    if data.protos.is_empty() {
        return Err(ViaError::image("image has no function protos"));
    }

    let comments = vec![String::new(); instructions.len()];
    let unit = Unit {
        instructions,
        constants: data.constants,
        globals: data.globals,
        protos: data.protos,
        comments,
    };
    unit.validate().map_err(ViaError::image)?;
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::compile;
    use pretty_assertions::assert_eq;

    fn sample_unit() -> (Unit, &'static str) {
        let source = "var x = 1\nprint(x + 2)";
        let unit = compile(source).unit.expect("sample compiles");
        (unit, source)
    }

    #[test]
    fn encode_decode_round_trip() {
        let (unit, source) = sample_unit();
        let image = encode(&unit, source, "-O1").unwrap();
        assert!(is_image(&image));
        let decoded = decode(&image).unwrap();
        assert_eq!(decoded.instructions, unit.instructions);
        assert_eq!(decoded.constants, unit.constants);
        assert_eq!(decoded.protos.len(), unit.protos.len());
        assert_eq!(decoded.globals.len(), unit.globals.len());
    }

    #[test]
    fn corrupted_code_fails_the_checksum() {
        let (unit, source) = sample_unit();
        let mut image = encode(&unit, source, "-O1").unwrap();
        let body_at = 90; // inside the code section
        image[body_at] ^= 0x5A;
        assert!(decode(&image).is_err());
    }

    #[test]
    fn corrupted_header_is_rejected() {
        let (unit, source) = sample_unit();
        let mut image = encode(&unit, source, "-O1").unwrap();
        image[10] ^= 0x01; // timestamp byte
        assert!(decode(&image).is_err());
    }

    #[test]
    fn bad_version_is_rejected() {
        let (unit, source) = sample_unit();
        let mut image = encode(&unit, source, "-O1").unwrap();
        image[6] = 0x7F;
        assert!(decode(&image).is_err());
    }

    #[test]
    fn plain_source_is_not_an_image() {
        assert!(!is_image(b"print(1)"));
    }
}
