//! Registro transaccional de artifacts.
//!
//! Invariantes que toda implementación debe garantizar:
//! - A lo sumo un artifact `Valid` por stage.
//! - `commit` es atómico: o se marca la versión vigente como `Superseded` y
//!   se inserta la nueva con `version + 1`, o no cambia nada.
//! - Las versiones por stage crecen estrictamente y nunca se reutilizan
//!   (tampoco tras marcar zombies).
//! - Las filas nunca se borran; el historial completo queda auditable.

pub mod memory;

use std::collections::{HashSet, VecDeque};

use log::{info, warn};

use crate::constants::CONTENT_HASH_PREFIX;
use crate::errors::RegistryError;
use crate::hashing::hash_file;
use crate::model::{Artifact, NewArtifact};

pub use memory::InMemoryArtifactRegistry;

pub trait ArtifactRegistry: Send + Sync {
    /// Artifact `Valid` del stage cuyo `input_hash` coincide.
    fn lookup(&self, stage_name: &str, input_hash: &str) -> Result<Option<Artifact>, RegistryError>;

    /// Artifact `Valid` del stage, sea cual sea su fingerprint.
    fn latest_valid(&self, stage_name: &str) -> Result<Option<Artifact>, RegistryError>;

    /// Confirma una versión nueva respetando `new.guard`.
    fn commit(&self, new: NewArtifact) -> Result<Artifact, RegistryError>;

    fn get(&self, id: i64) -> Result<Option<Artifact>, RegistryError>;

    /// Historial completo del stage, de la versión más nueva a la más antigua.
    fn list_versions(&self, stage_name: &str) -> Result<Vec<Artifact>, RegistryError>;

    fn list_valid(&self) -> Result<Vec<Artifact>, RegistryError>;

    /// Artifact más reciente (cualquier estado) con ese content hash.
    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Artifact>, RegistryError>;

    /// `Valid` -> `Zombie`. Sin efecto sobre filas en otro estado.
    fn mark_zombie(&self, id: i64) -> Result<(), RegistryError>;

    /// Cadena upstream del artifact para auditoría: el propio artifact
    /// primero y luego sus inputs en anchura, sin repetidos.
    fn lineage_of(&self, id: i64) -> Result<Vec<Artifact>, RegistryError> {
        let root = self.get(id)?.ok_or(RegistryError::NotFound(id))?;
        let mut seen = HashSet::from([root.id]);
        let mut queue: VecDeque<i64> = root.inputs.iter().copied().collect();
        let mut out = vec![root];
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            let art = self.get(next)?
                          .ok_or_else(|| RegistryError::Corrupt(format!("artifact {id} references missing input {next}")))?;
            queue.extend(art.inputs.iter().copied());
            out.push(art);
        }
        Ok(out)
    }

    /// Resuelve una referencia textual:
    /// - `<stage>:v<N>`: versión N del stage, en cualquier estado.
    /// - `<stage>:latest`: versión vigente.
    /// - `sha256:<hex>`: por content hash.
    fn resolve(&self, reference: &str) -> Result<Option<Artifact>, RegistryError> {
        if reference.starts_with(CONTENT_HASH_PREFIX) {
            return self.find_by_content_hash(reference);
        }
        let invalid = || RegistryError::InvalidReference(reference.to_string());
        let (stage, selector) = reference.rsplit_once(':').ok_or_else(invalid)?;
        if stage.is_empty() {
            return Err(invalid());
        }
        if selector == "latest" {
            return self.latest_valid(stage);
        }
        let version: i64 = selector.strip_prefix('v')
                                   .and_then(|v| v.parse().ok())
                                   .ok_or_else(invalid)?;
        Ok(self.list_versions(stage)?.into_iter().find(|a| a.version == version))
    }

    /// Marca como `Zombie` todo artifact `Valid` cuyo archivo no existe o no
    /// coincide con su content hash. Devuelve los afectados.
    fn reconcile(&self) -> Result<Vec<Artifact>, RegistryError> {
        let mut zombies = Vec::new();
        for art in self.list_valid()? {
            let healthy = match hash_file(&art.output_path) {
                Ok(h) => h == art.content_hash,
                Err(e) => {
                    warn!("reconcile:unreadable stage={} id={} path={} err={e}",
                          art.stage_name,
                          art.id,
                          art.output_path.display());
                    false
                }
            };
            if !healthy {
                self.mark_zombie(art.id)?;
                info!("reconcile:zombie stage={} id={} version={}", art.stage_name, art.id, art.version);
                if let Some(updated) = self.get(art.id)? {
                    zombies.push(updated);
                }
            }
        }
        Ok(zombies)
    }
}
