pub mod attr;
pub mod entity;
pub mod join;
pub mod record;
