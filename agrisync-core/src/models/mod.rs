mod activity;
mod change_event;
mod credit;
mod crop;
mod de;
mod farm;
mod finance;
mod notice;
mod notification;
mod resource;
mod snapshot;

pub use activity::FarmActivity;
pub use change_event::{record_id, ChangeEvent, ChangeKind, RawChange};
pub use credit::{Credit, CreditTransaction};
pub use crop::Crop;
pub use farm::Farm;
pub use finance::{total_income, FinancialRecord};
pub use notice::{Notice, NoticeLevel};
pub use notification::Notification;
pub use resource::{InsertOrder, ParseScopeError, Resource, ResourceKey, Scope};
pub use snapshot::Snapshot;
