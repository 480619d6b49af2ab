//! Utility macros for reducing boilerplate

/// Macro to implement `FromRef<AppState>` for state extractors.
///
/// # Example
/// ```ignore
/// impl_from_ref!(Arc<Vault>, vault);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<Vault> {
///     fn from_ref(state: &AppState) -> Self {
///         state.vault.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

/// Read an environment variable and parse it, falling back to `$default`
/// when it is unset or unparsable.
///
/// # Example
/// ```ignore
/// let ttl: u64 = env_or!("PREFAB_SPEC_CACHE_TTL_SECS", DEFAULT_SPEC_CACHE_TTL_SECS);
/// ```
#[macro_export]
macro_rules! env_or {
    ($name:expr, $default:expr) => {
        std::env::var($name)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or($default)
    };
}
