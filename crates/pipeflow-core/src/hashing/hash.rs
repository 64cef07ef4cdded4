//! Helpers de hashing.
//!
//! - blake3 (hex) para fingerprints: `hash_str` / `hash_value`.
//! - sha256 con prefijo `sha256:` para contenido de archivos.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use blake3::Hasher;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::canonical_json::to_canonical_json;
use crate::constants::{CONTENT_HASH_PREFIX, HASH_CHUNK_SIZE};

/// Hashea un string y devuelve hex.
pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Hash de la forma canónica de un JSON.
pub fn hash_value(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}

fn format_digest(digest: &[u8]) -> String {
    let mut out = String::with_capacity(CONTENT_HASH_PREFIX.len() + digest.len() * 2);
    out.push_str(CONTENT_HASH_PREFIX);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

pub fn hash_bytes(data: &[u8]) -> String {
    format_digest(&Sha256::digest(data))
}

/// Hashea un reader completo en bloques de `HASH_CHUNK_SIZE`.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format_digest(&hasher.finalize()))
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    hash_reader(File::open(path)?)
}
