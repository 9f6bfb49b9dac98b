//! The typed build DAG: topology, dynamic extension, and the verifier that
//! proves acyclicity, hermeticity, determinism and race-freedom before a run
//! starts.

pub mod dynamic;
pub mod graph;
pub mod verifier;

pub use dynamic::{Discovery, DynamicBuildGraph};
pub use graph::{BuildGraph, GraphError, GraphStats, ValidationMode};
pub use verifier::{
    AcyclicityProof, Certificate, DeterminismProof, DeterminismRecord, HermeticityProof, Proof,
    RaceFreedomProof, VerifyError, Verifier,
};
