pub mod billing;
pub mod finance;
pub mod overdue;
