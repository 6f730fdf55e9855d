//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod earning;
pub mod enums;
pub mod payout;
pub mod remediation_item;
pub mod session;
pub mod subscription;
pub mod teacher_rate;

// Re-export specific types to avoid conflicts
pub use earning::{Column as EarningColumn, Entity as Earning, Model as EarningModel};
pub use payout::{Column as PayoutColumn, Entity as Payout, Model as PayoutModel};
pub use remediation_item::{
    Column as RemediationItemColumn, Entity as RemediationItem, Model as RemediationItemModel,
};
pub use session::{Column as SessionColumn, Entity as Session, Model as SessionModel};
pub use subscription::{
    Column as SubscriptionColumn, Entity as Subscription, Model as SubscriptionModel,
};
pub use teacher_rate::{
    Column as TeacherRateColumn, Entity as TeacherRate, Model as TeacherRateModel,
};
