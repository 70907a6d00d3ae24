mod postgres;

pub use postgres::{PgMessageLog, PgProfileStorage, connect};
