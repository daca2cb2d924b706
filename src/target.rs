//! Host target introspection.
//!
//! Code generation must honor the machine it is actually running on, so the
//! engine starts from a [`TargetSpec`] built by inspecting the host: the
//! process triple, the reported CPU name and the full sub-target feature set.
//! The descriptor is immutable once built and one instance is owned per
//! engine. Introspection failure is fatal to engine construction; a partial
//! or guessed target would miscompile kernels silently.

use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::OptimizationLevel;

use crate::error::{JitError, JitResult};

/// Floating-point operation fusion policy for generated code.
///
/// The engine deliberately runs kernels with [`FpFusion::Fast`]: numeric code
/// is allowed to contract and reassociate floating-point operations, trading
/// strict IEEE evaluation order for speed. The IR-generation layer reads this
/// off the descriptor and stamps the matching fast-math attributes onto the
/// functions it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpFusion {
    /// Fuse and reassociate aggressively.
    Fast,
    /// Fuse only where the semantics are unchanged.
    Standard,
    /// No fusion beyond what the source ordering implies.
    Strict,
}

/// Description of the machine the engine generates code for.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    /// Architecture triple of the running process.
    pub triple: String,

    /// CPU name as reported by the host.
    pub cpu: String,

    /// Sub-target feature flags, with LLVM's `+feat`/`-feat` polarity kept.
    pub features: Vec<String>,

    /// Code generation optimization level.
    pub opt_level: OptimizationLevel,

    /// Floating-point fusion policy for emitted kernels.
    pub fp_fusion: FpFusion,
}

impl TargetSpec {
    /// Build a descriptor for the host machine.
    ///
    /// Reads the host CPU name and feature flags, fixes the optimization
    /// level to the default and enables aggressive floating-point fusion.
    pub fn detect_host() -> JitResult<Self> {
        Target::initialize_native(&InitializationConfig::default())
            .map_err(|reason| JitError::HostDetection { reason })?;

        let triple = TargetMachine::get_default_triple();
        let triple = triple.as_str().to_string_lossy().into_owned();
        let cpu = TargetMachine::get_host_cpu_name().to_string();
        let features: Vec<String> = TargetMachine::get_host_cpu_features()
            .to_string()
            .split(',')
            .map(str::trim)
            .filter(|feature| !feature.is_empty())
            .map(String::from)
            .collect();

        log::debug!(
            "host target: {} (cpu {}, {} features)",
            triple,
            cpu,
            features.len()
        );

        Ok(Self {
            triple,
            cpu,
            features,
            opt_level: OptimizationLevel::Default,
            fp_fusion: FpFusion::Fast,
        })
    }

    /// The feature set in LLVM's comma-separated form.
    pub fn feature_string(&self) -> String {
        self.features.join(",")
    }

    /// Materialize a target machine for this descriptor, using the JIT code
    /// model so emitted code is position-correct in the running process.
    pub fn create_target_machine(&self) -> JitResult<TargetMachine> {
        let triple = TargetTriple::create(&self.triple);
        let target = Target::from_triple(&triple).map_err(|err| JitError::HostDetection {
            reason: err.to_string(),
        })?;

        target
            .create_target_machine(
                &triple,
                &self.cpu,
                &self.feature_string(),
                self.opt_level,
                RelocMode::Default,
                CodeModel::JITDefault,
            )
            .ok_or_else(|| JitError::TargetMachine {
                triple: self.triple.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_host_reports_cpu() {
        let spec = TargetSpec::detect_host().unwrap();
        assert!(!spec.triple.is_empty());
        assert_eq!(spec.cpu, TargetMachine::get_host_cpu_name().to_string());
        assert_eq!(spec.opt_level, OptimizationLevel::Default);
        assert_eq!(spec.fp_fusion, FpFusion::Fast);
    }

    #[test]
    fn feature_flags_keep_polarity() {
        let spec = TargetSpec::detect_host().unwrap();
        for feature in &spec.features {
            assert!(feature.starts_with('+') || feature.starts_with('-'));
        }
        assert_eq!(
            spec.feature_string().split(',').count(),
            spec.features.len().max(1)
        );
    }

    #[test]
    fn target_machine_is_buildable() {
        let spec = TargetSpec::detect_host().unwrap();
        let machine = spec.create_target_machine().unwrap();
        assert_eq!(machine.get_cpu().to_string(), spec.cpu);
    }
}
