//! Per-operation validators.
//!
//! Each mutating operation that guards a state precondition registers
//! a validator here explicitly; an absent validator is a no-op. The
//! rejection phrases are part of the wire contract and must stay
//! verbatim.

use rack_core::types::App;

use crate::error::{ApiError, ApiResult};

/// Precondition over the current app state.
pub type AppValidator = fn(&App) -> ApiResult<()>;

/// Validator registry, one optional slot per guarded operation.
pub struct Validators {
    pub app_cancel: Option<AppValidator>,
    pub release_promote: Option<AppValidator>,
}

impl Default for Validators {
    fn default() -> Self {
        Self {
            app_cancel: Some(app_cancel),
            release_promote: Some(release_promote),
        }
    }
}

impl Validators {
    /// Run a validator slot; absent means allowed.
    pub fn check(slot: Option<AppValidator>, app: &App) -> ApiResult<()> {
        match slot {
            Some(validate) => validate(app),
            None => Ok(()),
        }
    }
}

fn app_cancel(app: &App) -> ApiResult<()> {
    if app.status != "updating" {
        return Err(ApiError::Validation("app is not updating".to_string()));
    }
    Ok(())
}

fn release_promote(app: &App) -> ApiResult<()> {
    if app.status != "running" {
        return Err(ApiError::Validation("app is currently updating".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn app(status: &str) -> App {
        App {
            name: "app1".to_string(),
            generation: "2".to_string(),
            locked: false,
            release: String::new(),
            status: status.to_string(),
            parameters: HashMap::new(),
        }
    }

    #[test]
    fn cancel_requires_updating() {
        let validators = Validators::default();
        assert!(Validators::check(validators.app_cancel, &app("updating")).is_ok());
        let err = Validators::check(validators.app_cancel, &app("running")).unwrap_err();
        assert_eq!(err.to_string(), "app is not updating");
    }

    #[test]
    fn promote_requires_running() {
        let validators = Validators::default();
        assert!(Validators::check(validators.release_promote, &app("running")).is_ok());
        let err = Validators::check(validators.release_promote, &app("updating")).unwrap_err();
        assert_eq!(err.to_string(), "app is currently updating");
    }

    #[test]
    fn absent_validator_is_noop() {
        assert!(Validators::check(None, &app("deleting")).is_ok());
    }
}
