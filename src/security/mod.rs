// ARCHITECTURE: Security Module - Request Enforcement Layer
//
// Three cooperating pieces, leaves first:
// 1. SANITIZATION (sanitize.rs): pure text/payload hygiene and heuristic
//    injection-pattern detection.
// 2. GATE (gate.rs): rate limiting, IP reputation, request-size limits, and
//    the bounded audit event ledger behind the stats snapshot.
// 3. MIDDLEWARE (middleware.rs): the ordered pipeline wiring both into the
//    HTTP layer, plus identity resolution into a per-request context.

pub mod gate;
pub mod middleware;
pub mod sanitize;

pub use gate::{
    GateMetrics, RateLimitDecision, SecurityEvent, SecurityEventKind, SecurityGate, SecurityStats,
};
pub use middleware::{SecurityContext, security_pipeline};
