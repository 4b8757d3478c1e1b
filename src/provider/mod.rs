//! C2 — Provider Registry.
//!
//! Enumerates candidate providers in hardware-preference order and performs
//! a cheap validation pass on each (build the options bundle; do not yet
//! instantiate a [`Session`]). Grounded on `WhisperEngine::select_device` /
//! `is_device_available`, generalized from a single-device choice to an
//! ordered, validated list.

pub mod session;

use crate::error::ProviderError;
use crate::hardware::{AcceleratorFamily, HardwareProfile};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    Accelerator,
    Gpu,
    Cpu,
}

/// A provider identity: its kind plus an opaque display name for logging,
/// matching spec.md's "tagged variant plus opaque name string".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    pub kind: ProviderKind,
    pub name: String,
}

impl ProviderId {
    pub fn cpu() -> Self {
        Self {
            kind: ProviderKind::Cpu,
            name: "Cpu".to_string(),
        }
    }

    pub fn accelerator() -> Self {
        Self {
            kind: ProviderKind::Accelerator,
            name: "Accelerator".to_string(),
        }
    }

    pub fn gpu() -> Self {
        Self {
            kind: ProviderKind::Gpu,
            name: "Gpu".to_string(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Enumerate candidate providers in preference order: accelerator (if
/// present), then GPU, then CPU. Fails open with at least CPU; if CPU
/// somehow cannot validate, startup must abort (spec §4.2).
pub fn enumerate_providers(hw: &HardwareProfile) -> Result<Vec<ProviderId>, ProviderError> {
    let mut candidates = Vec::with_capacity(3);

    if hw.accelerator_family != AcceleratorFamily::None {
        candidates.push(ProviderId::accelerator());
    }
    // This runtime does not probe for a discrete GPU independently of the
    // accelerator path; hosts without an accelerator but with a GPU backend
    // would be enumerated here in a future hardware probe extension.
    candidates.push(ProviderId::cpu());

    let mut validated = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match validate(&candidate) {
            Ok(()) => validated.push(candidate),
            Err(e) => {
                tracing::warn!(provider = %candidate, error = %e, "provider failed validation, skipping");
            }
        }
    }

    if !validated.iter().any(|p| p.kind == ProviderKind::Cpu) {
        return Err(ProviderError::ProviderUnavailable);
    }

    Ok(validated)
}

/// Cheap validation: attempt to build a session-options bundle for the
/// provider without instantiating a [`Session`]. CPU always validates.
fn validate(provider: &ProviderId) -> Result<(), ProviderError> {
    match provider.kind {
        ProviderKind::Cpu => Ok(()),
        ProviderKind::Accelerator => {
            if cfg!(target_os = "macos") {
                Ok(())
            } else {
                Err(ProviderError::ValidationFailed {
                    provider: provider.name.clone(),
                    message: "accelerator execution provider unavailable on this OS".to_string(),
                })
            }
        }
        ProviderKind::Gpu => Err(ProviderError::ValidationFailed {
            provider: provider.name.clone(),
            message: "no GPU backend compiled in".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_always_present() {
        let hw = HardwareProfile::default();
        let providers = enumerate_providers(&hw).expect("cpu must validate");
        assert!(providers.iter().any(|p| p.kind == ProviderKind::Cpu));
    }

    #[test]
    fn accelerator_preferred_first_when_present() {
        let mut hw = HardwareProfile::default();
        hw.accelerator_family = AcceleratorFamily::NeuralEngineClassB;
        hw.accelerator_cores = 16;
        let providers = enumerate_providers(&hw).expect("validation should succeed");
        if cfg!(target_os = "macos") {
            assert_eq!(providers[0].kind, ProviderKind::Accelerator);
        }
    }
}
