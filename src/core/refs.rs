//! Polymorphic references to teachers and sessions.
//!
//! Earnings, payouts and rates store a `(type, id)` pair; these structs are the
//! typed form of those pairs used throughout the core.

use crate::entities::enums::{SessionDomain, TeacherKind};
use crate::entities::{earning, payout, session, subscription};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Quran or academic teacher profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeacherRef {
    /// Which teacher table the id points into
    pub kind: TeacherKind,
    /// Teacher profile id
    pub id: i64,
}

impl TeacherRef {
    /// Reference to a Quran teacher.
    #[must_use]
    pub const fn quran(id: i64) -> Self {
        Self {
            kind: TeacherKind::QuranTeacher,
            id,
        }
    }

    /// Reference to an academic teacher.
    #[must_use]
    pub const fn academic(id: i64) -> Self {
        Self {
            kind: TeacherKind::AcademicTeacher,
            id,
        }
    }
}

impl fmt::Display for TeacherRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

/// A session of any domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    /// Session domain tag
    pub domain: SessionDomain,
    /// Session id
    pub id: i64,
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.domain.as_str(), self.id)
    }
}

impl session::Model {
    /// Typed reference to this session.
    #[must_use]
    pub const fn session_ref(&self) -> SessionRef {
        SessionRef {
            domain: self.domain,
            id: self.id,
        }
    }

    /// The teacher delivering this session.
    #[must_use]
    pub const fn teacher(&self) -> TeacherRef {
        TeacherRef {
            kind: self.domain.teacher_kind(),
            id: self.teacher_id,
        }
    }

    /// Enrolled student ids decoded from the JSON column.
    #[must_use]
    pub fn students(&self) -> Vec<i64> {
        serde_json::from_value(self.student_ids.clone()).unwrap_or_default()
    }
}

impl earning::Model {
    /// The teacher this earning is owed to.
    #[must_use]
    pub const fn teacher(&self) -> TeacherRef {
        TeacherRef {
            kind: self.teacher_type,
            id: self.teacher_id,
        }
    }

    /// The session that produced this earning.
    #[must_use]
    pub const fn session_ref(&self) -> SessionRef {
        SessionRef {
            domain: self.session_type,
            id: self.session_id,
        }
    }
}

impl payout::Model {
    /// The teacher this payout belongs to.
    #[must_use]
    pub const fn teacher(&self) -> TeacherRef {
        TeacherRef {
            kind: self.teacher_type,
            id: self.teacher_id,
        }
    }
}

impl subscription::Model {
    /// The teacher this subscription is with.
    #[must_use]
    pub const fn teacher(&self) -> TeacherRef {
        TeacherRef {
            kind: self.teacher_type,
            id: self.teacher_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_kind_and_id() {
        assert_eq!(TeacherRef::quran(7).to_string(), "quran_teacher#7");
        assert_eq!(TeacherRef::academic(3).to_string(), "academic_teacher#3");
        let session = SessionRef {
            domain: SessionDomain::InteractiveCourse,
            id: 12,
        };
        assert_eq!(session.to_string(), "interactive_course#12");
    }
}
