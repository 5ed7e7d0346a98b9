//! Authorization gate: per-request, per-object write decisions. Pure, no I/O.

use crate::auth::Caller;
use crate::config::{ResolvedEntity, WritePolicy};
use crate::error::{AppError, DenyReason};
use axum::http::Method;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    /// Map an HTTP method; `on_item` distinguishes `/things/:id` from `/things`.
    pub fn from_method(method: &Method, on_item: bool) -> Action {
        if method.is_safe() {
            Action::Read
        } else if method == Method::DELETE {
            Action::Delete
        } else if on_item {
            Action::Update
        } else {
            Action::Create
        }
    }

    pub fn is_safe(self) -> bool {
        matches!(self, Action::Read)
    }
}

/// Request-level check, made before any row is looked up: writes to owned entities need an
/// authenticated caller.
pub fn authorize_request(policy: WritePolicy, action: Action, caller: &Caller) -> Result<(), AppError> {
    if action.is_safe() || policy == WritePolicy::Open || caller.is_authenticated() {
        Ok(())
    } else {
        Err(AppError::Forbidden(DenyReason::NotAuthenticated))
    }
}

/// Decide whether `caller` may perform `action`.
/// `owner` is the stored owner of the target row; `None` for create (row does not exist yet)
/// and for entities that carry no owner.
pub fn authorize(policy: WritePolicy, action: Action, caller: &Caller, owner: Option<&str>) -> Result<(), AppError> {
    authorize_request(policy, action, caller)?;
    if action.is_safe() || policy == WritePolicy::Open || action == Action::Create {
        return Ok(());
    }
    match (caller.username(), owner) {
        (Some(username), Some(owner)) if owner == username => Ok(()),
        _ => Err(AppError::Forbidden(DenyReason::NotOwner)),
    }
}

/// Owner of a stored row, if the entity tracks one.
pub fn row_owner<'a>(entity: &ResolvedEntity, row: &'a Value) -> Option<&'a str> {
    let column = entity.owner_column.as_deref()?;
    row.get(column).and_then(Value::as_str)
}

/// Drop any client-supplied owner; on create, set it to the caller.
pub fn stamp_owner(entity: &ResolvedEntity, action: Action, caller: &Caller, body: &mut HashMap<String, Value>) {
    let Some(column) = entity.owner_column.as_deref() else { return };
    if body.remove(column).is_some() {
        tracing::debug!(entity = %entity.path_segment, "discarded client-supplied owner");
    }
    if action == Action::Create {
        if let Some(username) = caller.username() {
            body.insert(column.to_string(), Value::String(username.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_config, resolve};
    use serde_json::json;

    fn object(v: Value) -> HashMap<String, Value> {
        v.as_object().cloned().unwrap().into_iter().collect()
    }

    fn alice() -> Caller {
        Caller::User("alice".into())
    }

    fn bob() -> Caller {
        Caller::User("bob".into())
    }

    #[test]
    fn reads_are_always_allowed() {
        for caller in [Caller::Anonymous, alice()] {
            assert!(authorize(WritePolicy::Owner, Action::Read, &caller, Some("bob")).is_ok());
        }
    }

    #[test]
    fn anonymous_writes_on_owned_entities_are_denied() {
        for action in [Action::Create, Action::Update, Action::Delete] {
            let err = authorize(WritePolicy::Owner, action, &Caller::Anonymous, Some("alice")).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(DenyReason::NotAuthenticated)));
        }
    }

    #[test]
    fn request_check_runs_before_row_lookup() {
        assert!(authorize_request(WritePolicy::Owner, Action::Delete, &bob()).is_ok());
        assert!(matches!(
            authorize_request(WritePolicy::Owner, Action::Delete, &Caller::Anonymous),
            Err(AppError::Forbidden(DenyReason::NotAuthenticated))
        ));
    }

    #[test]
    fn missing_owner_is_not_a_match() {
        let err = authorize(WritePolicy::Owner, Action::Update, &alice(), None).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(DenyReason::NotOwner)));
    }

    #[test]
    fn authenticated_create_is_allowed() {
        assert!(authorize(WritePolicy::Owner, Action::Create, &bob(), None).is_ok());
    }

    #[test]
    fn only_the_owner_may_update_or_delete() {
        for action in [Action::Update, Action::Delete] {
            assert!(authorize(WritePolicy::Owner, action, &alice(), Some("alice")).is_ok());
            let err = authorize(WritePolicy::Owner, action, &bob(), Some("alice")).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(DenyReason::NotOwner)));
        }
    }

    #[test]
    fn open_entities_accept_any_writer() {
        for action in [Action::Create, Action::Update, Action::Delete] {
            assert!(authorize(WritePolicy::Open, action, &Caller::Anonymous, None).is_ok());
        }
    }

    #[test]
    fn method_mapping() {
        assert_eq!(Action::from_method(&Method::GET, true), Action::Read);
        assert_eq!(Action::from_method(&Method::POST, false), Action::Create);
        assert_eq!(Action::from_method(&Method::PATCH, true), Action::Update);
        assert_eq!(Action::from_method(&Method::PUT, true), Action::Update);
        assert_eq!(Action::from_method(&Method::DELETE, true), Action::Delete);
    }

    #[test]
    fn stamp_owner_replaces_client_owner_on_create() {
        let model = resolve(&builtin_config().unwrap()).unwrap();
        let games = model.entity_by_path("games").unwrap();
        let mut body = object(json!({ "name": "Chess", "owner": "mallory" }));
        stamp_owner(games, Action::Create, &bob(), &mut body);
        assert_eq!(body["owner"], json!("bob"));

        let mut patch = object(json!({ "owner": "mallory", "played": true }));
        stamp_owner(games, Action::Update, &bob(), &mut patch);
        assert!(!patch.contains_key("owner"));
    }
}
