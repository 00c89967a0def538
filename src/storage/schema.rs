use rusqlite_migration::{Migrations, M};

/// Schema migrations for the local store, oldest first.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))])
}
