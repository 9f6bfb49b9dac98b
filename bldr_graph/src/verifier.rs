use std::collections::{BTreeMap, BTreeSet, HashMap};

use bldr_core::TargetId;
use bldr_sandbox::spec::SandboxSpec;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::graph::{BuildGraph, GraphError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("hermeticity violation for target {target}: {reason}")]
    Hermeticity { target: TargetId, reason: String },
    #[error("determinism violation for target {target}: identical inputs produced different output hashes")]
    Determinism { target: TargetId },
    #[error("race condition: targets {a} and {b} may write to {path} concurrently")]
    Race {
        a: TargetId,
        b: TargetId,
        path: String,
    },
    #[error("certificate signature mismatch")]
    BadSignature,
}

/// Evidence that the topological order `order` is total and every edge
/// `u -> v` satisfies `pos(u) < pos(v)`.
#[derive(Debug, Clone)]
pub struct AcyclicityProof {
    pub order: Vec<TargetId>,
}

/// Evidence that every target's inputs/outputs form disjoint path sets, its
/// network policy is hermetic, and its output directories don't overlap
/// source/input directories.
#[derive(Debug, Clone, Default)]
pub struct HermeticityProof {
    pub checked_targets: usize,
}

/// Evidence that content hashes over (inputs, command line, environment)
/// determine the output hash.
#[derive(Debug, Clone, Default)]
pub struct DeterminismProof {
    pub checked_pairs: usize,
}

/// Evidence that the edge set defines a happens-before partial order under
/// which concurrently-executable targets have disjoint write sets.
#[derive(Debug, Clone, Default)]
pub struct RaceFreedomProof {
    pub checked_pairs: usize,
}

#[derive(Debug, Clone)]
pub struct Proof {
    pub acyclicity: AcyclicityProof,
    pub hermeticity: HermeticityProof,
    pub determinism: DeterminismProof,
    pub race_freedom: RaceFreedomProof,
}

/// A `Proof` bundled with an HMAC signature over its hash and a workspace
/// identifier, so a `Certificate` minted for one workspace can't silently be
/// replayed against another.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub proof: Proof,
    pub workspace_id: String,
    signature: Vec<u8>,
}

impl Certificate {
    fn proof_hash(proof: &Proof, workspace_id: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(workspace_id.as_bytes());
        for id in &proof.acyclicity.order {
            buf.extend_from_slice(id.as_str().as_bytes());
            buf.push(0);
        }
        buf.extend_from_slice(&proof.hermeticity.checked_targets.to_le_bytes());
        buf.extend_from_slice(&proof.determinism.checked_pairs.to_le_bytes());
        buf.extend_from_slice(&proof.race_freedom.checked_pairs.to_le_bytes());
        buf
    }

    pub fn sign(proof: Proof, workspace_id: String, key: &[u8]) -> Self {
        let payload = Self::proof_hash(&proof, &workspace_id);
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(&payload);
        let signature = mac.finalize().into_bytes().to_vec();
        Certificate {
            proof,
            workspace_id,
            signature,
        }
    }

    pub fn verify(&self, key: &[u8]) -> Result<(), VerifyError> {
        let payload = Self::proof_hash(&self.proof, &self.workspace_id);
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(&payload);
        mac.verify_slice(&self.signature)
            .map_err(|_| VerifyError::BadSignature)
    }
}

/// A target's view for determinism checking: the content hash over its
/// (inputs, command line, environment) tuple, and the output hash it
/// produced when last built with that tuple.
#[derive(Debug, Clone)]
pub struct DeterminismRecord {
    pub input_hash: String,
    pub output_hash: String,
}

pub struct Verifier;

impl Verifier {
    /// Produces a full [`Proof`] for `graph`. `specs` supplies each target's
    /// [`SandboxSpec`] for the hermeticity check; `determinism_records`
    /// supplies prior build results to cross-check reproducibility.
    pub fn verify(
        graph: &BuildGraph,
        specs: &HashMap<TargetId, SandboxSpec>,
        determinism_records: &HashMap<TargetId, DeterminismRecord>,
    ) -> Result<Proof, VerifyError> {
        let order = graph.topological_sort()?;
        for id in &order {
            let node = graph.node(id).expect("order only lists real nodes");
            for dep in &node.deps {
                let dep_pos = order.iter().position(|x| x == dep);
                let cur_pos = order.iter().position(|x| x == id);
                if let (Some(dep_pos), Some(cur_pos)) = (dep_pos, cur_pos) {
                    debug_assert!(dep_pos < cur_pos);
                }
            }
        }
        let acyclicity = AcyclicityProof { order };

        let hermeticity = Self::verify_hermeticity(specs)?;
        let determinism = Self::verify_determinism(determinism_records)?;
        let race_freedom = Self::verify_race_freedom(graph, specs)?;

        Ok(Proof {
            acyclicity,
            hermeticity,
            determinism,
            race_freedom,
        })
    }

    fn verify_hermeticity(
        specs: &HashMap<TargetId, SandboxSpec>,
    ) -> Result<HermeticityProof, VerifyError> {
        for (target, spec) in specs {
            if let Err(e) = spec.validate() {
                return Err(VerifyError::Hermeticity {
                    target: target.clone(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(HermeticityProof {
            checked_targets: specs.len(),
        })
    }

    fn verify_determinism(
        records: &HashMap<TargetId, DeterminismRecord>,
    ) -> Result<DeterminismProof, VerifyError> {
        // Group by input hash: any two targets sharing an input hash must
        // share an output hash.
        let mut by_input: BTreeMap<&str, Vec<(&TargetId, &str)>> = BTreeMap::new();
        for (id, rec) in records {
            by_input
                .entry(rec.input_hash.as_str())
                .or_default()
                .push((id, rec.output_hash.as_str()));
        }
        let mut checked_pairs = 0;
        for group in by_input.values() {
            for window in group.windows(2) {
                checked_pairs += 1;
                if window[0].1 != window[1].1 {
                    return Err(VerifyError::Determinism {
                        target: window[1].0.clone(),
                    });
                }
            }
        }
        Ok(DeterminismProof { checked_pairs })
    }

    fn verify_race_freedom(
        graph: &BuildGraph,
        specs: &HashMap<TargetId, SandboxSpec>,
    ) -> Result<RaceFreedomProof, VerifyError> {
        let mut checked_pairs = 0;
        let ids: Vec<&TargetId> = specs.keys().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (ids[i], ids[j]);
                if Self::ordered(graph, a, b) {
                    continue; // happens-before: not concurrent.
                }
                checked_pairs += 1;
                let spec_a = &specs[a];
                let spec_b = &specs[b];
                if let Some(path) = spec_a.outputs.first_intersection(&spec_b.outputs) {
                    return Err(VerifyError::Race {
                        a: a.clone(),
                        b: b.clone(),
                        path,
                    });
                }
            }
        }
        Ok(RaceFreedomProof { checked_pairs })
    }

    /// Whether `a` and `b` are ordered by the happens-before relation (one
    /// is a transitive dependency of the other), as opposed to concurrently
    /// dispatchable.
    fn ordered(graph: &BuildGraph, a: &TargetId, b: &TargetId) -> bool {
        Self::depends_on(graph, a, b) || Self::depends_on(graph, b, a)
    }

    fn depends_on(graph: &BuildGraph, from: &TargetId, to: &TargetId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = BTreeSet::new();
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur.clone()) {
                continue;
            }
            if let Some(node) = graph.node(&cur) {
                if node.deps.contains(to) {
                    return true;
                }
                for dep in &node.deps {
                    stack.push(dep.clone());
                }
            }
        }
        false
    }
}
