pub mod check;
pub mod info;
pub mod record;
pub mod synthetic;
