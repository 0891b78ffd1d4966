pub mod lag;
pub mod reconcile;
