//! Pluggable role extraction and RBAC gating (spec §4.J route table, §6).
//!
//! Role extraction is deliberately not authentication: the spec treats
//! authentication as an external collaborator and only asks that *some*
//! role make it onto the request before the management router's handlers
//! run. The default extractor reads `X-User-Role`; a production deployment
//! swaps in one that reads bearer-token claims by installing a different
//! [`RoleExtractor`] on the [`crate::Server`].

use axum::http::HeaderMap;

/// The two roles the management route table distinguishes (spec §4.J).
/// `Operator` satisfies a route that requires `Viewer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Operator,
}

impl Role {
    pub fn satisfies(&self, required: Role) -> bool {
        *self >= required
    }
}

/// Resolves the caller's [`Role`] from request headers. Implementations
/// must not block or perform I/O beyond what's already in `headers`.
pub trait RoleExtractor: Send + Sync {
    fn extract(&self, headers: &HeaderMap) -> Role;
}

/// Reads `X-User-Role: operator` (case-insensitive); anything else,
/// including a missing header, is `Viewer` (spec §6 "Role extraction uses
/// `X-User-Role` by default").
pub struct HeaderRoleExtractor;

impl RoleExtractor for HeaderRoleExtractor {
    fn extract(&self, headers: &HeaderMap) -> Role {
        match headers.get("x-user-role").and_then(|v| v.to_str().ok()) {
            Some(value) if value.eq_ignore_ascii_case("operator") => Role::Operator,
            _ => Role::Viewer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_satisfies_viewer_requirement() {
        assert!(Role::Operator.satisfies(Role::Viewer));
        assert!(Role::Operator.satisfies(Role::Operator));
    }

    #[test]
    fn viewer_does_not_satisfy_operator_requirement() {
        assert!(!Role::Viewer.satisfies(Role::Operator));
        assert!(Role::Viewer.satisfies(Role::Viewer));
    }

    #[test]
    fn header_extractor_reads_x_user_role_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-role", "Operator".parse().unwrap());
        assert_eq!(HeaderRoleExtractor.extract(&headers), Role::Operator);
    }

    #[test]
    fn header_extractor_defaults_to_viewer() {
        let headers = HeaderMap::new();
        assert_eq!(HeaderRoleExtractor.extract(&headers), Role::Viewer);
    }
}
