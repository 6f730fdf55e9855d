//! String-backed enumerations shared by the entity definitions.
//!
//! Each enum is stored as its lowercase `snake_case` name so rows stay readable in
//! the database and in JSON payloads.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Subject domain a session belongs to. Doubles as the polymorphic `session_type` tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum SessionDomain {
    /// Quran memorisation/recitation session
    #[sea_orm(string_value = "quran")]
    Quran,
    /// Academic tutoring session
    #[sea_orm(string_value = "academic")]
    Academic,
    /// Session of an interactive course
    #[sea_orm(string_value = "interactive_course")]
    InteractiveCourse,
}

impl SessionDomain {
    /// Stable string form used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quran => "quran",
            Self::Academic => "academic",
            Self::InteractiveCourse => "interactive_course",
        }
    }

    /// Which kind of teacher delivers sessions of this domain.
    #[must_use]
    pub const fn teacher_kind(self) -> TeacherKind {
        match self {
            Self::Quran => TeacherKind::QuranTeacher,
            Self::Academic | Self::InteractiveCourse => TeacherKind::AcademicTeacher,
        }
    }
}

/// How many students a session serves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// One teacher, one student
    #[sea_orm(string_value = "individual")]
    Individual,
    /// One teacher, several students in a circle/room
    #[sea_orm(string_value = "group")]
    Group,
    /// Free trial session converted from a trial request
    #[sea_orm(string_value = "trial")]
    Trial,
}

impl SessionKind {
    /// Stable string form used in metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Group => "group",
            Self::Trial => "trial",
        }
    }
}

/// Session lifecycle state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Reserved slot without a time yet
    #[sea_orm(string_value = "unscheduled")]
    Unscheduled,
    /// Booked for a time
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    /// Meeting room provisioned
    #[sea_orm(string_value = "ready")]
    Ready,
    /// In progress
    #[sea_orm(string_value = "ongoing")]
    Ongoing,
    /// Finished; triggers the earning
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Called off before it started
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    /// Student did not attend
    #[sea_orm(string_value = "absent")]
    Absent,
}

impl SessionStatus {
    /// Stable string form used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unscheduled => "unscheduled",
            Self::Scheduled => "scheduled",
            Self::Ready => "ready",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Absent => "absent",
        }
    }

    /// Completed, cancelled and absent sessions never move again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Absent)
    }

    /// Whether the state machine has an edge from `self` to `to`.
    #[must_use]
    pub const fn permits(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Unscheduled, Self::Scheduled)
                | (Self::Scheduled, Self::Ready | Self::Ongoing | Self::Cancelled | Self::Absent)
                | (Self::Ready, Self::Ongoing | Self::Cancelled | Self::Absent)
                | (Self::Ongoing, Self::Completed | Self::Absent)
        )
    }
}

/// Polymorphic teacher tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum TeacherKind {
    /// Teacher profile for Quran circles and individual Quran sessions
    #[sea_orm(string_value = "quran_teacher")]
    QuranTeacher,
    /// Teacher profile for academic lessons and interactive courses
    #[sea_orm(string_value = "academic_teacher")]
    AcademicTeacher,
}

impl TeacherKind {
    /// Stable string form used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QuranTeacher => "quran_teacher",
            Self::AcademicTeacher => "academic_teacher",
        }
    }
}

/// Pricing rule used for one earning.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// Per-session rate for one-to-one sessions
    #[sea_orm(string_value = "individual_rate")]
    IndividualRate,
    /// Per-session rate for circle/group sessions
    #[sea_orm(string_value = "group_rate")]
    GroupRate,
    /// Flat contract amount per session regardless of attendance
    #[sea_orm(string_value = "per_session")]
    PerSession,
    /// Amount multiplied by attendee count
    #[sea_orm(string_value = "per_student")]
    PerStudent,
    /// Administrative flat amount
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

impl CalculationMethod {
    /// Stable string form, also the breakdown key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IndividualRate => "individual_rate",
            Self::GroupRate => "group_rate",
            Self::PerSession => "per_session",
            Self::PerStudent => "per_student",
            Self::Fixed => "fixed",
        }
    }
}

/// Payout approval state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Awaiting review
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Approved; linked earnings are final
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Rejected; earnings stay unlinked
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl PayoutStatus {
    /// Stable string form used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Subscription contract state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created, awaiting payment or activation
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Sessions may be scheduled
    #[sea_orm(string_value = "active")]
    Active,
    /// Temporarily frozen
    #[sea_orm(string_value = "paused")]
    Paused,
    /// Ended
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SubscriptionStatus {
    /// Stable string form used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn test_terminal_states_permit_nothing() {
        for from in SessionStatus::iter().filter(|s| s.is_terminal()) {
            for to in SessionStatus::iter() {
                assert!(!from.permits(to), "{} -> {}", from.as_str(), to.as_str());
            }
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        use SessionStatus::{Absent, Cancelled, Completed, Ongoing, Ready, Scheduled, Unscheduled};

        assert!(Unscheduled.permits(Scheduled));
        assert!(!Unscheduled.permits(Ongoing));
        assert!(!Unscheduled.permits(Cancelled));

        assert!(Scheduled.permits(Ready));
        assert!(Scheduled.permits(Ongoing));
        assert!(Scheduled.permits(Cancelled));
        assert!(Scheduled.permits(Absent));
        assert!(!Scheduled.permits(Completed));

        assert!(Ready.permits(Ongoing));
        assert!(Ready.permits(Cancelled));
        assert!(Ready.permits(Absent));
        assert!(!Ready.permits(Completed));

        assert!(Ongoing.permits(Completed));
        assert!(Ongoing.permits(Absent));
        assert!(!Ongoing.permits(Cancelled));
    }

    #[test]
    fn test_domain_teacher_kind() {
        assert_eq!(SessionDomain::Quran.teacher_kind(), TeacherKind::QuranTeacher);
        assert_eq!(
            SessionDomain::InteractiveCourse.teacher_kind(),
            TeacherKind::AcademicTeacher
        );
    }

    #[test]
    fn test_method_serializes_as_breakdown_key() {
        let json = serde_json::to_string(&CalculationMethod::IndividualRate).unwrap();
        assert_eq!(json, "\"individual_rate\"");
        for method in CalculationMethod::iter() {
            let encoded = serde_json::to_value(method).unwrap();
            assert_eq!(encoded.as_str(), Some(method.as_str()));
        }
    }
}
