//! # Catalog Tenant
//!
//! ## Overview
//!
//! `catalog-tenant` holds the three pieces of the management substrate that
//! are scoped per-tenant rather than per-plugin-section: the
//! [`overlay::OverlayStore`] of user-applied metadata (tags, annotations,
//! lifecycle phase), the [`refresh_limiter::RefreshRateLimiter`] that throttles
//! refresh calls, and the [`refresh_status::RefreshStatusStore`] that
//! remembers the outcome of the last refresh across restarts.
//!
//! All three are namespace-scoped with the same normalization rule: an
//! empty namespace reads and writes as `"default"`.

pub mod overlay;
pub mod refresh_limiter;
pub mod refresh_status;

pub use overlay::{
    apply_annotate, apply_deprecate, apply_tag, DryRunResult, OverlayError, OverlayKey,
    OverlayRecord, OverlayStore,
};
pub use refresh_limiter::{RefreshDecision, RefreshRateLimiter};
pub use refresh_status::{
    RefreshOutcome, RefreshStatusError, RefreshStatusKey, RefreshStatusRecord, RefreshStatusStore,
};
