/// Payout approval and rejection
pub mod approval;

/// Academy clock, timezone and month bucketing
pub mod clock;

/// Earning disputes and direct finalization
pub mod dispute;

/// Earning calculation from completed sessions
pub mod earning;

/// Meeting room provisioning seam
pub mod meeting;

/// Teacher notifications for payout decisions
pub mod notification;

/// Monthly payout aggregation and queries
pub mod payout;

/// Teacher rate store and session pricing
pub mod rates;

/// Typed teacher and session references
pub mod refs;

/// Session lifecycle state machine
pub mod session;

/// Subscription quota counters
pub mod subscription;
