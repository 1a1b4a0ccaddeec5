//! Process-wide kernel engine
//!
//! The engine is the only global state of the crate. It is initialised by the
//! first [`Engine::acquire`] and torn down when the last [`EngineHandle`] is
//! dropped; every operator keeps a handle for as long as it exists, so the
//! engine always outlives the operators bound to it.
//!
//! Initialisation selects the kernel backend from runtime CPU feature
//! detection. The first initialisation decides the backend for every handle
//! handed out until the engine is torn down again.

use crate::error::{FlameError, FlameResult};
use log::{debug, info};
use parking_lot::{const_mutex, Mutex};
use std::fmt;
use std::str::FromStr;

/// Environment override for the backend choice (`auto` or `scalar`)
pub const BACKEND_ENV: &str = "FLAME_KERNEL_BACKEND";

struct EngineState {
    users: usize,
    backend: Option<Backend>,
}

static ENGINE: Mutex<EngineState> = const_mutex(EngineState {
    users: 0,
    backend: None,
});

/// Kernel implementation selected at engine initialisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Portable scalar loops
    Scalar,
    /// x86_64 AVX2 + FMA inner products
    Avx2Fma,
}

impl Backend {
    fn select(preference: BackendPreference) -> Self {
        match preference {
            BackendPreference::Scalar => Backend::Scalar,
            BackendPreference::Auto => Self::detect(),
        }
    }

    fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return Backend::Avx2Fma;
            }
        }
        Backend::Scalar
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Scalar => "scalar",
            Backend::Avx2Fma => "avx2-fma",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested backend policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Best backend the CPU supports
    #[default]
    Auto,
    /// Force the portable kernels
    Scalar,
}

impl BackendPreference {
    /// Read [`BACKEND_ENV`]; unset means `Auto`
    pub fn from_env() -> FlameResult<Self> {
        Self::from_env_or(BackendPreference::Auto)
    }

    /// Read [`BACKEND_ENV`], falling back to `configured` when unset
    pub fn from_env_or(configured: Self) -> FlameResult<Self> {
        match std::env::var(BACKEND_ENV) {
            Ok(value) => value.parse(),
            Err(std::env::VarError::NotPresent) => Ok(configured),
            Err(e) => Err(FlameError::engine(BACKEND_ENV, e.to_string())),
        }
    }
}

impl FromStr for BackendPreference {
    type Err = FlameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(BackendPreference::Auto),
            "scalar" => Ok(BackendPreference::Scalar),
            other => Err(FlameError::engine(
                "backend selection",
                format!("unsupported backend {other:?} (expected \"auto\" or \"scalar\")"),
            )),
        }
    }
}

/// Entry point to the process-wide engine
pub struct Engine;

impl Engine {
    /// Acquire a handle, honouring [`BACKEND_ENV`] on first initialisation
    pub fn acquire() -> FlameResult<EngineHandle> {
        Self::acquire_with(BackendPreference::from_env()?)
    }

    /// Acquire a handle; `preference` only matters if this call initialises
    /// the engine
    pub fn acquire_with(preference: BackendPreference) -> FlameResult<EngineHandle> {
        let mut state = ENGINE.lock();
        let backend = match state.backend {
            Some(backend) => {
                if preference == BackendPreference::Scalar && backend != Backend::Scalar {
                    debug!("kernel engine already running on {backend}; scalar request ignored");
                }
                backend
            }
            None => {
                let backend = Backend::select(preference);
                info!("kernel engine initialized (backend={backend})");
                state.backend = Some(backend);
                backend
            }
        };
        state.users += 1;
        Ok(EngineHandle { backend })
    }

    /// Number of live handles
    pub fn active_users() -> usize {
        ENGINE.lock().users
    }

    /// Backend of the running engine, `None` when torn down
    pub fn active_backend() -> Option<Backend> {
        ENGINE.lock().backend
    }
}

/// Reference-counted claim on the engine
#[derive(Debug)]
pub struct EngineHandle {
    backend: Backend,
}

impl EngineHandle {
    #[inline]
    pub fn backend(&self) -> Backend {
        self.backend
    }
}

impl Clone for EngineHandle {
    fn clone(&self) -> Self {
        let mut state = ENGINE.lock();
        state.users += 1;
        EngineHandle {
            backend: self.backend,
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let mut state = ENGINE.lock();
        state.users = state.users.saturating_sub(1);
        if state.users == 0 {
            if let Some(backend) = state.backend.take() {
                info!("kernel engine torn down (backend={backend})");
            }
        }
    }
}
