use serde::{Deserialize, Serialize};

use crate::fingerprint::combine;

/// Identidad de una invocación: hash de datos, de código y de config, y su
/// combinación (`input_hash`), que es la clave de memoización.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub data_hash: String,
    pub code_hash: String,
    pub config_hash: String,
    pub input_hash: String,
}

impl Fingerprint {
    pub fn new(data_hash: String, code_hash: String, config_hash: String) -> Self {
        let input_hash = combine(&data_hash, &code_hash, &config_hash);
        Self { data_hash,
               code_hash,
               config_hash,
               input_hash }
    }
}
